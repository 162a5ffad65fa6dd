//! The rhythm clock: lookahead scheduling over Euclidean patterns
//!
//! The clock is pure state plus an `advance(now, lookahead)` step that
//! returns the drum events falling inside the window, each stamped with an
//! audio-clock time on the sixteenth-note lattice. The engine's render pass
//! is the periodic driver; there is no timer primitive in here. Software
//! wake-ups only decide when to look ahead; the event times are what
//! actually sound.
//!
//! Pattern parameters are resolved from bound source values only when the
//! host reconfigures the sequencer, not on every tick.

use std::collections::HashMap;

use crate::euclid;
use crate::types::{DrumKind, EngineRules, RhythmMapping, RhythmSettings, SourceDescriptor};

/// How far ahead of the audio clock events are scheduled.
pub const LOOKAHEAD: f64 = 0.2;

/// Raw bound-source values are normalized against this ceiling.
const BOUND_CEILING: f32 = 200.0;

/// One scheduled percussion hit.
#[derive(Debug, Clone, PartialEq)]
pub struct DrumEvent {
    pub drum: DrumKind,
    /// Audio-clock time the hit must sound at.
    pub time: f64,
    pub volume: f32,
    /// Fire the synchronized sub-bass hit alongside this (kick only).
    pub harmonic_bass: bool,
}

/// The three current bit patterns.
#[derive(Debug, Clone, Default)]
pub struct DrumPatterns {
    pub kick: Vec<u8>,
    pub snare: Vec<u8>,
    pub hat: Vec<u8>,
}

impl DrumPatterns {
    pub fn for_drum(&self, drum: DrumKind) -> &[u8] {
        match drum {
            DrumKind::Kick => &self.kick,
            DrumKind::Snare => &self.snare,
            DrumKind::Hat => &self.hat,
        }
    }
}

/// Live state of the running sequencer. Exists only between the first
/// enabling `update_rhythm` and `stop_rhythm`.
#[derive(Debug, Clone)]
pub struct RhythmClock {
    /// Next event time on the audio clock.
    pub next_time: f64,
    /// Current step index; patterns are read modulo their own length.
    pub step: usize,
    pub patterns: DrumPatterns,
    pub settings: RhythmSettings,
    pub rules: EngineRules,
}

impl RhythmClock {
    pub fn new(
        now: f64,
        patterns: DrumPatterns,
        settings: RhythmSettings,
        rules: EngineRules,
    ) -> Self {
        Self {
            next_time: now,
            step: 0,
            patterns,
            settings,
            rules,
        }
    }

    /// Advance the clock: emit every hit scheduled before `now + lookahead`
    /// and move the step index past them.
    pub fn advance(&mut self, now: f64, lookahead: f64) -> Vec<DrumEvent> {
        let seconds_per_step = 60.0 / self.settings.bpm.max(1.0) as f64 / 4.0;
        let mut events = Vec::new();

        while self.next_time < now + lookahead {
            for drum in [DrumKind::Kick, DrumKind::Snare, DrumKind::Hat] {
                let pattern = self.patterns.for_drum(drum);
                if pattern.is_empty() || pattern[self.step % pattern.len()] == 0 {
                    continue;
                }
                events.push(DrumEvent {
                    drum,
                    time: self.next_time,
                    volume: self.settings.volume(drum),
                    harmonic_bass: drum == DrumKind::Kick && self.settings.harmonic_bass,
                });
            }
            self.step = self.step.wrapping_add(1);
            self.next_time += seconds_per_step;
        }
        events
    }
}

/// Resolve the three drum patterns from the mapping's bound source values.
/// Each parameter is clamped to its sane range: pulses 1..=16, steps
/// pulses..=32, offset 0..pattern length.
pub fn resolve_patterns(mapping: &RhythmMapping, sources: &[SourceDescriptor]) -> DrumPatterns {
    let values: HashMap<&str, f32> = sources
        .iter()
        .map(|s| (s.key.as_str(), s.value))
        .collect();

    let mut patterns = DrumPatterns::default();
    for drum in [DrumKind::Kick, DrumKind::Snare, DrumKind::Hat] {
        let binding = mapping.for_drum(drum);
        let pulses = bound_value(&values, binding.pulses.as_deref(), 1.0, 16.0);
        let steps = bound_value(&values, binding.steps.as_deref(), pulses as f32, 32.0);
        let mut pattern = euclid::generate(pulses, steps);

        if let Some(offset_key) = binding.offset.as_deref() {
            if !pattern.is_empty() {
                let offset = bound_value(
                    &values,
                    Some(offset_key),
                    0.0,
                    (pattern.len() - 1) as f32,
                );
                pattern = euclid::rotate(&pattern, offset.max(0) as usize);
            }
        }

        match drum {
            DrumKind::Kick => patterns.kick = pattern,
            DrumKind::Snare => patterns.snare = pattern,
            DrumKind::Hat => patterns.hat = pattern,
        }
    }
    patterns
}

/// An unbound parameter sits at the middle of its range; a bound one maps
/// its source value (normalized against the rhythm ceiling) across it.
fn bound_value(values: &HashMap<&str, f32>, key: Option<&str>, min: f32, max: f32) -> i32 {
    match key {
        None => ((min + max) / 2.0).round() as i32,
        Some(key) => {
            let raw = values.get(key).copied().unwrap_or(0.0);
            let normalized = (raw / BOUND_CEILING).clamp(0.0, 1.0);
            (min + normalized * (max - min)).round() as i32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DrumMapping, SourceKind};

    fn four_on_floor() -> DrumPatterns {
        DrumPatterns {
            kick: vec![1, 0, 0, 0],
            snare: vec![0, 0, 1, 0],
            hat: vec![1, 1, 1, 1],
        }
    }

    #[test]
    fn events_land_on_the_sixteenth_lattice() {
        let mut clock = RhythmClock::new(
            0.0,
            four_on_floor(),
            RhythmSettings {
                enabled: true,
                bpm: 120.0,
                ..RhythmSettings::default()
            },
            EngineRules::default(),
        );
        // 120 bpm -> 0.125 s per sixteenth.
        let events = clock.advance(0.0, 0.5);
        assert!(!events.is_empty());
        for e in &events {
            let steps = e.time / 0.125;
            assert!((steps - steps.round()).abs() < 1e-9, "off-lattice: {}", e.time);
            assert!(e.time < 0.5 + 1e-9);
        }
        // Kick fires on steps 0 (within 4 steps of 0.5 s window).
        let kicks: Vec<_> = events
            .iter()
            .filter(|e| e.drum == DrumKind::Kick)
            .collect();
        assert_eq!(kicks.len(), 1);
        let hats = events.iter().filter(|e| e.drum == DrumKind::Hat).count();
        assert_eq!(hats, 4);
    }

    #[test]
    fn advance_is_incremental() {
        let mut clock = RhythmClock::new(
            0.0,
            four_on_floor(),
            RhythmSettings::default(),
            EngineRules::default(),
        );
        let first = clock.advance(0.0, 0.2);
        let again = clock.advance(0.0, 0.2);
        assert!(again.is_empty(), "window already scheduled");
        let later = clock.advance(0.2, 0.2);
        assert!(!later.is_empty());
        for e in &later {
            assert!(first.iter().all(|f| f.time < e.time));
        }
    }

    #[test]
    fn harmonic_bass_rides_only_on_kicks() {
        let mut clock = RhythmClock::new(
            0.0,
            four_on_floor(),
            RhythmSettings {
                harmonic_bass: true,
                ..RhythmSettings::default()
            },
            EngineRules::default(),
        );
        for e in clock.advance(0.0, 1.0) {
            assert_eq!(e.harmonic_bass, e.drum == DrumKind::Kick);
        }
    }

    #[test]
    fn unbound_parameters_sit_mid_range() {
        let patterns = resolve_patterns(&RhythmMapping::default(), &[]);
        // pulses (1+16)/2 ~ 9 (wait for rounding), steps (pulses+32)/2.
        let ones = patterns.kick.iter().filter(|b| **b == 1).count();
        assert_eq!(ones, 9);
        assert_eq!(patterns.kick.len(), 21);
    }

    #[test]
    fn bound_parameters_clamp_to_sane_ranges() {
        let mapping = RhythmMapping {
            kick: DrumMapping {
                pulses: Some("a".into()),
                steps: Some("a".into()),
                offset: None,
            },
            ..RhythmMapping::default()
        };
        // Far beyond the ceiling: clamps to pulses 16, steps 32.
        let sources = vec![SourceDescriptor::new("a", 10_000.0, SourceKind::Oscillator)];
        let patterns = resolve_patterns(&mapping, &sources);
        assert_eq!(patterns.kick.len(), 32);
        assert_eq!(patterns.kick.iter().filter(|b| **b == 1).count(), 16);

        // Bound to a missing source reads as zero: pulses 1, steps = pulses.
        let patterns = resolve_patterns(&mapping, &[]);
        assert_eq!(patterns.kick.len(), 1);
        assert_eq!(patterns.kick, vec![1]);
    }

    #[test]
    fn rotation_binding_rotates_the_pattern() {
        let mapping = RhythmMapping {
            kick: DrumMapping {
                pulses: Some("p".into()),
                steps: Some("s".into()),
                offset: Some("o".into()),
            },
            ..RhythmMapping::default()
        };
        let sources = vec![
            SourceDescriptor::new("p", 200.0 * 2.0 / 15.0, SourceKind::Oscillator),
            SourceDescriptor::new("s", 0.0, SourceKind::Oscillator),
            SourceDescriptor::new("o", 200.0, SourceKind::Oscillator),
        ];
        let patterns = resolve_patterns(&mapping, &sources);
        // pulses = 3, steps = 3 -> all ones regardless of rotation.
        assert_eq!(patterns.kick.iter().filter(|b| **b == 1).count(), patterns.kick.len());
    }
}
