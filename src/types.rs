//! Plain-data model shared between the engine and its collaborators
//!
//! Everything here is configuration or per-tick input: the engine reads these
//! values but never stores references into them. Serde derives let a host
//! persist or ship them as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::AudioBuffer;

/// Decoded sample buffers, owned by an external loader and referenced by key.
///
/// The engine only ever reads these. A `buffer_ref` that is missing from the
/// store is not an error: the source degrades to oscillator behavior until
/// the buffer shows up.
pub type BufferStore = HashMap<String, Arc<AudioBuffer>>;

/// Noise colors available as looping generator material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
}

/// What kind of generator a source asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Oscillator,
    Noise(NoiseColor),
    /// Looping playback of an externally decoded buffer.
    Sample,
    /// Granular resynthesis of an externally decoded buffer.
    Granular,
    /// Fixed-interval percussive blips instead of a continuous tone.
    RhythmicPulse,
}

/// Oscillator waveforms. `Pulse` renders from a band-limited wavetable;
/// `Fm` is a sine carrier with a per-voice modulator oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
    Pulse,
    Fm,
}

/// Named interval sets used for pitch quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicalScale {
    Major,
    MinorPentatonic,
    Chromatic,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Blues,
}

/// Which audio dimension the mapped value drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapMode {
    Pitch,
    Volume,
    Filter,
}

/// Batch normalization strategy applied to the incoming source values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    None,
    /// Rescale the batch so its maximum lands on a fixed reference ceiling,
    /// preserving relative ratios.
    Global,
}

/// Per-voice effect selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    None,
    Distortion,
    Delay,
    Reverb,
}

/// How strongly a source contributes to the mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Full,
    ThreeQuarters,
    Half,
    Quarter,
    /// Blend factor follows the mapped source value (0.1 .. 1.0).
    Dynamic,
}

impl Default for BlendMode {
    fn default() -> Self {
        BlendMode::Full
    }
}

/// What the per-voice LFO modulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LfoTarget {
    None,
    Pitch,
    Volume,
    Filter,
}

/// Which LFO parameter is driven by the mapped source value. The other one
/// stays at its configured setting; they are never both source-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LfoModulationTarget {
    Rate,
    Depth,
}

/// Which grain parameter the mapped source value drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GranularModulationTarget {
    Pitch,
    Rate,
    Duration,
}

/// FM pair configuration: modulator frequency ratio and index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FmParams {
    /// Ratio of modulator frequency to carrier frequency.
    pub harmonicity: f32,
    /// Modulation index (depth, in multiples of the carrier frequency).
    pub mod_index: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GranularParams {
    /// Grains per second.
    pub grain_rate: f32,
    /// Grain length in seconds.
    pub grain_duration: f32,
    /// 0..1 randomization of the grain start position.
    pub jitter: f32,
}

impl Default for GranularParams {
    fn default() -> Self {
        Self {
            grain_rate: 20.0,
            grain_duration: 0.09,
            jitter: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayParams {
    pub time: f32,
    pub feedback: f32,
}

impl Default for DelayParams {
    fn default() -> Self {
        Self {
            time: 0.3,
            feedback: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReverbParams {
    /// Wet/dry mix, 0 = dry only, 1 = wet only.
    pub mix: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self { mix: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistortionParams {
    /// Shaping amount, 0..1.
    pub amount: f32,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self { amount: 0.5 }
    }
}

/// Optional per-source synthesis parameters, present only where the source's
/// kind or effect needs them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceParams {
    pub fm: Option<FmParams>,
    pub granular: Option<GranularParams>,
    pub distortion: Option<DistortionParams>,
    pub delay: Option<DelayParams>,
    pub reverb: Option<ReverbParams>,
}

/// One named numeric signal, produced fresh every tick by the domain
/// collaborator. The engine reads it and forgets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Semantic name of the signal, e.g. "radius".
    pub key: String,
    /// Unbounded, but nominally within 0..400.
    pub value: f32,
    pub kind: SourceKind,
    pub effect: EffectKind,
    #[serde(default)]
    pub params: SourceParams,
    /// Key into the external [`BufferStore`] for sample/granular sources.
    #[serde(default)]
    pub buffer_ref: Option<String>,
}

impl SourceDescriptor {
    pub fn new(key: impl Into<String>, value: f32, kind: SourceKind) -> Self {
        Self {
            key: key.into(),
            value,
            kind,
            effect: EffectKind::None,
            params: SourceParams::default(),
            buffer_ref: None,
        }
    }
}

/// Per-voice LFO configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LfoParams {
    pub target: LfoTarget,
    pub waveform: Waveform,
    /// Oscillation rate in Hz.
    pub rate: f32,
    /// Modulation depth, 0..1, scaled per target.
    pub depth: f32,
}

impl Default for LfoParams {
    fn default() -> Self {
        Self {
            target: LfoTarget::None,
            waveform: Waveform::Sine,
            rate: 2.0,
            depth: 0.25,
        }
    }
}

/// Global synthesis configuration, edited by a UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRules {
    pub base_frequency: f32,
    pub waveform: Waveform,
    pub scale: MusicalScale,
    pub mode: MapMode,
    pub normalization: Normalization,
    pub granular_modulation_target: GranularModulationTarget,
    pub lfo: LfoParams,
    pub lfo_modulation_target: LfoModulationTarget,
    /// Upper bound on simultaneous voices; always >= 1.
    pub max_polyphony: usize,
}

impl Default for EngineRules {
    fn default() -> Self {
        Self {
            base_frequency: 220.0,
            waveform: Waveform::Sine,
            scale: MusicalScale::Major,
            mode: MapMode::Pitch,
            normalization: Normalization::None,
            granular_modulation_target: GranularModulationTarget::Pitch,
            lfo: LfoParams::default(),
            lfo_modulation_target: LfoModulationTarget::Rate,
            max_polyphony: 10,
        }
    }
}

/// The three procedural drums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrumKind {
    Kick,
    Snare,
    Hat,
}

/// Rhythm sequencer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RhythmSettings {
    pub enabled: bool,
    pub bpm: f32,
    pub kick_volume: f32,
    pub snare_volume: f32,
    pub hat_volume: f32,
    /// Fire a synchronized sub-bass hit alongside every kick.
    pub harmonic_bass: bool,
}

impl RhythmSettings {
    pub fn volume(&self, drum: DrumKind) -> f32 {
        match drum {
            DrumKind::Kick => self.kick_volume,
            DrumKind::Snare => self.snare_volume,
            DrumKind::Hat => self.hat_volume,
        }
    }
}

impl Default for RhythmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bpm: 120.0,
            kick_volume: 0.8,
            snare_volume: 0.7,
            hat_volume: 0.5,
            harmonic_bass: false,
        }
    }
}

/// Source keys bound to one drum's pattern parameters. `None` means the
/// parameter sits at the middle of its range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrumMapping {
    pub pulses: Option<String>,
    pub steps: Option<String>,
    pub offset: Option<String>,
}

/// Per-drum source bindings for the rhythm sequencer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RhythmMapping {
    pub kick: DrumMapping,
    pub snare: DrumMapping,
    pub hat: DrumMapping,
}

impl RhythmMapping {
    pub fn for_drum(&self, drum: DrumKind) -> &DrumMapping {
        match drum {
            DrumKind::Kick => &self.kick,
            DrumKind::Snare => &self.snare,
            DrumKind::Hat => &self.hat,
        }
    }
}

/// Normalized pointer position for the interactive freeform mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerPos {
    /// 0..1 across the interaction surface.
    pub x: f32,
    /// 0..1 across the interaction surface.
    pub y: f32,
}
