//! Audio buffers and procedurally generated material
//!
//! Mono PCM buffers plus the generators the engine seeds itself with at
//! startup: the three noise colors used as looping generator material, the
//! exponentially-decaying noise impulse the convolution reverb runs against,
//! and the band-limited pulse wavetable.

use rand::Rng;
use std::sync::Arc;

/// A mono PCM buffer. Externally decoded sample buffers and internally
/// generated material share this type; the engine never mutates one after
/// creation.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub sample_rate: f32,
    pub data: Vec<f32>,
}

impl AudioBuffer {
    pub fn new(sample_rate: f32, data: Vec<f32>) -> Self {
        Self { sample_rate, data }
    }

    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Linearly interpolated read at a fractional frame position.
    /// Out-of-range positions read as silence.
    pub fn sample_at(&self, pos: f64) -> f32 {
        if pos < 0.0 {
            return 0.0;
        }
        let idx = pos as usize;
        if idx + 1 < self.data.len() {
            let frac = (pos - idx as f64) as f32;
            self.data[idx] * (1.0 - frac) + self.data[idx + 1] * frac
        } else if idx < self.data.len() {
            self.data[idx]
        } else {
            0.0
        }
    }
}

/// The looping noise buffers voices play as generator material.
#[derive(Debug, Clone)]
pub struct NoiseBuffers {
    pub white: Arc<AudioBuffer>,
    pub pink: Arc<AudioBuffer>,
    pub brown: Arc<AudioBuffer>,
}

impl NoiseBuffers {
    /// Generate all three colors, two seconds each.
    pub fn generate(sample_rate: f32) -> Self {
        let len = (sample_rate * 2.0) as usize;
        Self {
            white: Arc::new(white_noise(sample_rate, len)),
            pink: Arc::new(pink_noise(sample_rate, len)),
            brown: Arc::new(brown_noise(sample_rate, len)),
        }
    }
}

pub fn white_noise(sample_rate: f32, len: usize) -> AudioBuffer {
    let mut rng = rand::thread_rng();
    let data = (0..len).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
    AudioBuffer::new(sample_rate, data)
}

/// Pink noise via the Paul Kellet filter bank (-3 dB/octave).
pub fn pink_noise(sample_rate: f32, len: usize) -> AudioBuffer {
    let mut rng = rand::thread_rng();
    let mut data = Vec::with_capacity(len);
    let (mut b0, mut b1, mut b2, mut b3, mut b4, mut b5, mut b6) =
        (0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32);
    for _ in 0..len {
        let white = rng.gen::<f32>() * 2.0 - 1.0;
        b0 = 0.99886 * b0 + white * 0.0555179;
        b1 = 0.99332 * b1 + white * 0.0750759;
        b2 = 0.96900 * b2 + white * 0.1538520;
        b3 = 0.86650 * b3 + white * 0.3104856;
        b4 = 0.55000 * b4 + white * 0.5329522;
        b5 = -0.7616 * b5 - white * 0.0168980;
        let sample = (b0 + b1 + b2 + b3 + b4 + b5 + b6 + white * 0.5362) * 0.11;
        b6 = white * 0.115926;
        data.push(sample);
    }
    AudioBuffer::new(sample_rate, data)
}

/// Brown noise as a leaky random walk (-6 dB/octave).
pub fn brown_noise(sample_rate: f32, len: usize) -> AudioBuffer {
    let mut rng = rand::thread_rng();
    let mut data = Vec::with_capacity(len);
    let mut last = 0.0f32;
    for _ in 0..len {
        let white = rng.gen::<f32>() * 2.0 - 1.0;
        last = (last + 0.02 * white) / 1.02;
        data.push(last * 3.5);
    }
    AudioBuffer::new(sample_rate, data)
}

/// Two-second noise impulse with a `(1 - t)^2.5` decay envelope, the
/// material the convolution reverb runs against.
pub fn reverb_impulse(sample_rate: f32) -> AudioBuffer {
    let mut rng = rand::thread_rng();
    let len = (sample_rate * 2.0) as usize;
    let mut data = Vec::with_capacity(len);
    for i in 0..len {
        let env = (1.0 - i as f32 / len as f32).powf(2.5);
        data.push((rng.gen::<f32>() * 2.0 - 1.0) * env);
    }
    AudioBuffer::new(sample_rate, data)
}

/// Single-cycle wavetable for the pulse waveform, summed from its Fourier
/// series. Partials fall off as 1/n, so 128 of them carry the shape.
pub fn pulse_wavetable() -> Vec<f32> {
    const TABLE_LEN: usize = 4096;
    const PARTIALS: usize = 128;
    let pi = std::f32::consts::PI;
    let mut table = vec![0.0f32; TABLE_LEN];
    for i in 1..PARTIALS {
        let n = i as f32;
        let amp = (2.0 / (n * pi)) * (1.0 - (n * pi / 2.0).cos()) * (n * pi / 4.0).sin();
        for (s, slot) in table.iter_mut().enumerate() {
            let phase = s as f32 / TABLE_LEN as f32;
            *slot += amp * (2.0 * pi * n * phase).sin();
        }
    }
    // Normalize to unit peak so the oscillator's gain staging matches the
    // analytic waveforms.
    let peak = table.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 0.0 {
        for s in &mut table {
            *s /= peak;
        }
    }
    table
}
