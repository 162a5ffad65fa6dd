//! Demo driver: sonify a synthetic set of moving signals.
//!
//! Runs the engine against a handful of slowly wobbling source values,
//! either live through the default audio device or rendered offline to a
//! WAV file for inspection.

use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;

use auralis::audio::AudioOutput;
use auralis::engine::Engine;
use auralis::types::{
    EngineRules, RhythmMapping, RhythmSettings, SourceDescriptor, SourceKind,
};

#[derive(Parser, Debug)]
#[command(name = "auralis_demo", about = "Drive the sonification engine with synthetic sources")]
struct Args {
    /// How long to run, in seconds
    #[arg(long, default_value_t = 10.0)]
    seconds: f32,

    /// Number of synthetic sources
    #[arg(long, default_value_t = 3)]
    sources: usize,

    /// Enable the Euclidean rhythm sequencer
    #[arg(long)]
    rhythm: bool,

    /// Sequencer tempo
    #[arg(long, default_value_t = 120.0)]
    bpm: f32,

    /// JSON file with engine rules (see `EngineRules`)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Render offline to this WAV file instead of playing live
    #[arg(long)]
    render: Option<PathBuf>,
}

/// Synthetic source list: values orbit the nominal domain at staggered
/// phases so every mapping mode has something to chew on.
fn synth_sources(t: f64, count: usize) -> Vec<SourceDescriptor> {
    (0..count)
        .map(|i| {
            let phase = t * 0.4 + i as f64 * 1.3;
            let value = 200.0 + 150.0 * phase.sin() as f32;
            SourceDescriptor::new(format!("signal{}", i), value, SourceKind::Oscillator)
        })
        .collect()
}

fn load_rules(path: Option<&PathBuf>) -> Result<EngineRules, Box<dyn Error>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(EngineRules::default()),
    }
}

fn run_offline(args: &Args, rules: &EngineRules, path: &PathBuf) -> Result<(), Box<dyn Error>> {
    let sample_rate = 44100.0f32;
    let mut engine = Engine::new(sample_rate);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;

    let settings = RhythmSettings {
        enabled: args.rhythm,
        bpm: args.bpm,
        ..RhythmSettings::default()
    };
    let buffers = HashMap::new();
    let blends = HashMap::new();

    engine.start();
    let mut block = vec![0.0f32; 1024];
    let total_samples = (args.seconds * sample_rate) as usize;
    let mut written = 0;
    while written < total_samples {
        let t = engine.current_time();
        let sources = synth_sources(t, args.sources);
        if args.rhythm {
            engine.update_rhythm(&settings, &RhythmMapping::default(), &sources, rules);
        }
        engine.update(&sources, rules, &buffers, &blends, false, None);
        engine.render(&mut block);
        for &s in &block {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        written += block.len();
    }
    writer.finalize()?;
    info!(?path, "offline render complete");
    Ok(())
}

fn run_live(args: &Args, rules: &EngineRules) -> Result<(), Box<dyn Error>> {
    let output = AudioOutput::spawn(Engine::new)?;
    output.ensure_running()?;
    let engine = output.engine();

    let settings = RhythmSettings {
        enabled: args.rhythm,
        bpm: args.bpm,
        ..RhythmSettings::default()
    };
    let buffers = HashMap::new();
    let blends = HashMap::new();

    if let Ok(mut engine) = engine.lock() {
        engine.start();
    }

    let started = Instant::now();
    while started.elapsed().as_secs_f32() < args.seconds {
        if let Ok(mut engine) = engine.lock() {
            let t = engine.current_time();
            let sources = synth_sources(t, args.sources);
            if args.rhythm {
                engine.update_rhythm(&settings, &RhythmMapping::default(), &sources, rules);
            }
            engine.update(&sources, rules, &buffers, &blends, false, None);
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    if let Ok(mut engine) = engine.lock() {
        engine.stop(true);
    }
    output.pause()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let rules = load_rules(args.rules.as_ref())?;
    info!(sources = args.sources, rhythm = args.rhythm, "starting demo");

    match &args.render {
        Some(path) => run_offline(&args, &rules, path),
        None => run_live(&args, &rules),
    }
}
