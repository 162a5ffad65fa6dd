//! # Auralis - Real-Time Data Sonification Engine
//!
//! Auralis turns a continuously changing list of named numeric signals into
//! audible sound. An external collaborator (geometry, physics, anything that
//! produces numbers) hands the engine a fresh source list every interactive
//! tick; the engine reconciles a bounded pool of synthesis voices against it
//! and drives each voice's pitch, amplitude or filter from the mapped
//! values. Independently, a rhythm sequencer fires procedural percussion
//! from Euclidean patterns with sample-accurate lookahead scheduling.
//!
//! ## Core Features
//!
//! - **Voice pool reconciliation**: voices are reused while their
//!   `(kind, waveform, effect)` signature matches, retired with a click-free
//!   fade otherwise, always capped by the configured polyphony
//! - **Signal graph**: an explicit edge-list graph of oscillators, buffer
//!   sources, biquad filters, delays, waveshapers and a partitioned-FFT
//!   convolver, with Web-Audio-style parameter automation
//! - **Musical mapping**: values quantize onto named scales (major, modes,
//!   pentatonic, blues) above a base frequency, with optional global batch
//!   normalization
//! - **Granular synthesis**: per-voice grain schedulers with jitter,
//!   attack/release envelopes and idle-skip
//! - **Euclidean rhythms**: Bjorklund patterns per drum, parameters bound to
//!   live source values, kick/snare/hat synthesized procedurally
//! - **Lookahead scheduling**: software wake-ups only decide when to look
//!   ahead; every audible event is stamped with an audio-clock time
//!
//! ## Quick Start
//!
//! ```rust
//! use auralis::engine::Engine;
//! use auralis::types::{EngineRules, SourceDescriptor, SourceKind};
//! use std::collections::HashMap;
//!
//! let mut engine = Engine::new(44100.0);
//! let rules = EngineRules::default();
//! let sources = vec![
//!     SourceDescriptor::new("radius", 120.0, SourceKind::Oscillator),
//!     SourceDescriptor::new("area", 40.0, SourceKind::Oscillator),
//! ];
//!
//! engine.update(&sources, &rules, &HashMap::new(), &HashMap::new(), false, None);
//! engine.start();
//!
//! let mut block = vec![0.0f32; 512];
//! engine.render(&mut block);
//! assert_eq!(engine.active_voice_count(), 2);
//! ```
//!
//! ## Rhythm Sequencing
//!
//! ```rust
//! use auralis::engine::Engine;
//! use auralis::types::{EngineRules, RhythmMapping, RhythmSettings};
//!
//! let mut engine = Engine::new(44100.0);
//! let mut settings = RhythmSettings::default();
//! settings.enabled = true;
//!
//! engine.update_rhythm(&settings, &RhythmMapping::default(), &[], &EngineRules::default());
//! let mut block = vec![0.0f32; 4410];
//! engine.render(&mut block);
//! engine.stop_rhythm();
//! ```
//!
//! ## Architecture
//!
//! - [`engine`] - the owning engine value: `update`, `update_rhythm`,
//!   lifecycle API, render loop (start here!)
//! - [`graph`] - signal graph, node DSP and parameter modulation
//! - [`param`] - scheduled/smoothed parameter automation
//! - [`mapping`] - value-to-pitch/param mapping and normalization
//! - [`euclid`] - Euclidean pattern generation
//! - [`rhythm`] - the lookahead rhythm clock
//! - [`drums`] - procedural kick/snare/hat/bass one-shots
//! - [`granular`] - per-voice grain scheduling
//! - [`effects`] - distortion/delay/reverb chain factory
//! - [`lfo`] - per-voice modulation routing
//! - [`audio`] - cpal output driver (the host boundary)
//!
//! The engine is a single owned value: no internal threads, no wall-clock
//! timers. The audio device clock (derived from rendered samples) is the
//! only source of timing truth.

pub mod audio;
pub mod buffer;
pub mod drums;
pub mod effects;
pub mod engine;
pub mod euclid;
pub mod granular;
pub mod graph;
pub mod lfo;
pub mod mapping;
pub mod param;
pub mod rhythm;
pub mod types;
pub mod voice;
