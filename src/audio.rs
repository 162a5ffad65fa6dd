//! Real-time audio output using cpal
//! Works with JACK, ALSA, OpenSL ES (Android/Termux), etc.
//!
//! This is the host boundary: the engine stays single-threaded, and the
//! device callback pulls rendered blocks from it behind a mutex. If the
//! callback ever finds the lock contended it emits silence for that block
//! rather than stalling the device. Streams can arrive suspended on some
//! hosts, so `ensure_running` resumes before anything is scheduled.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use crate::engine::Engine;

pub struct AudioOutput {
    sample_rate: u32,
    engine: Arc<Mutex<Engine>>,
    _stream: cpal::Stream,
}

impl AudioOutput {
    /// Open the default output device and build an engine at its sample
    /// rate. The stream is created but not yet resumed; call
    /// [`ensure_running`](Self::ensure_running) before scheduling sound.
    pub fn spawn<F>(build: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: FnOnce(f32) -> Engine,
    {
        let host = cpal::default_host();
        info!("Audio host: {:?}", host.id());

        let device = host
            .default_output_device()
            .ok_or("No audio output device found")?;
        info!("Audio device: {}", device.name()?);

        let config = device.default_output_config()?;
        info!("Audio config: {:?}", config);

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        let engine = Arc::new(Mutex::new(build(sample_rate as f32)));
        let engine_clone = engine.clone();

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), engine_clone, channels)
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), engine_clone, channels)
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), engine_clone, channels)
            }
            _ => return Err("Unsupported sample format".into()),
        }?;

        Ok(Self {
            sample_rate,
            engine,
            _stream: stream,
        })
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        engine: Arc<Mutex<Engine>>,
        channels: usize,
    ) -> Result<cpal::Stream, Box<dyn std::error::Error>>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let mut mono: Vec<f32> = Vec::new();
        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                if mono.len() != frames {
                    mono.resize(frames, 0.0);
                }
                match engine.try_lock() {
                    Ok(mut engine) => engine.render(&mut mono),
                    Err(_) => mono.iter_mut().for_each(|s| *s = 0.0),
                }
                for (frame, &sample) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                    for channel in frame.iter_mut() {
                        *channel = T::from_sample(sample);
                    }
                }
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )?;

        Ok(stream)
    }

    /// Resume the stream. Safe to call repeatedly; a stream that arrived
    /// suspended starts here.
    pub fn ensure_running(&self) -> Result<(), Box<dyn std::error::Error>> {
        self._stream.play()?;
        info!("Audio stream running at {} Hz", self.sample_rate);
        Ok(())
    }

    pub fn pause(&self) -> Result<(), Box<dyn std::error::Error>> {
        self._stream.pause()?;
        Ok(())
    }

    /// Shared handle to the engine; lock it to call `update`/`update_rhythm`.
    pub fn engine(&self) -> Arc<Mutex<Engine>> {
        self.engine.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
