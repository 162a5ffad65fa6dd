//! Value-to-parameter mapping with musical-scale quantization
//!
//! Pure functions turning a raw source value into a pitch, amplitude or
//! filter-cutoff target. Values are nominally 0..400; everything is clamped
//! into [0,1] before it becomes an audio parameter, and non-finite inputs
//! degrade to the safe end of the range instead of poisoning the graph.

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::types::{EngineRules, MusicalScale};

/// Upper end of the nominal input domain for engine mappings.
pub const NOMINAL_CEILING: f32 = 400.0;

/// Reference ceiling global normalization rescales a batch's maximum onto.
pub const GLOBAL_REFERENCE: f32 = 200.0;

/// Number of scale steps the [0,1] domain spreads across.
const SCALE_STEPS: f32 = 48.0;

lazy_static! {
    /// Ascending interval sets mod 12 for each named scale.
    pub static ref SCALE_INTERVALS: HashMap<MusicalScale, Vec<i32>> = {
        let mut m = HashMap::new();
        m.insert(MusicalScale::Major, vec![0, 2, 4, 5, 7, 9, 11]);
        m.insert(MusicalScale::MinorPentatonic, vec![0, 3, 5, 7, 10]);
        m.insert(
            MusicalScale::Chromatic,
            vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        );
        m.insert(MusicalScale::Dorian, vec![0, 2, 3, 5, 7, 9, 10]);
        m.insert(MusicalScale::Phrygian, vec![0, 1, 3, 5, 7, 8, 10]);
        m.insert(MusicalScale::Lydian, vec![0, 2, 4, 6, 7, 9, 11]);
        m.insert(MusicalScale::Mixolydian, vec![0, 2, 4, 5, 7, 9, 10]);
        m.insert(MusicalScale::Blues, vec![0, 3, 5, 6, 7, 10]);
        m
    };
}

/// Interpolation shape for [`map_value_to_param`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaling {
    Linear,
    Log,
}

pub fn midi_to_freq(midi: f32) -> f32 {
    ((midi - 69.0) / 12.0).exp2() * 440.0
}

/// Map a raw value onto the active scale: normalize against the nominal
/// ceiling, spread across 48 scale steps, quantize through the scale's
/// interval set (octave-wrapped) above the base frequency's pitch class.
/// Non-finite input returns the base frequency unchanged.
pub fn map_value_to_pitch(value: f32, rules: &EngineRules) -> f32 {
    if !value.is_finite() {
        return rules.base_frequency;
    }
    let normalized = (value / NOMINAL_CEILING).clamp(0.0, 1.0);
    let base_midi = 69.0 + 12.0 * (rules.base_frequency / 440.0).log2();
    let note_offset = (normalized * SCALE_STEPS).floor() as i32;
    let intervals = &SCALE_INTERVALS[&rules.scale];
    let octave = note_offset / intervals.len() as i32;
    let note = intervals[note_offset as usize % intervals.len()];
    midi_to_freq(base_midi + (octave * 12 + note) as f32)
}

/// Map a raw value into `[min, max]`, linearly or logarithmically.
/// Non-finite input returns `min`.
pub fn map_value_to_param(value: f32, min: f32, max: f32, scaling: Scaling) -> f32 {
    if !value.is_finite() {
        return min;
    }
    let clamped = (value / NOMINAL_CEILING).clamp(0.0, 1.0);
    match scaling {
        Scaling::Log => {
            let min_floor = if min > 0.0 { min } else { 0.001 };
            let max_floor = if max > 0.0 { max } else { 0.001 };
            let min_log = min_floor.ln();
            let max_log = max_floor.ln();
            (min_log + (max_log - min_log) * clamped).exp()
        }
        Scaling::Linear => min + (max - min) * clamped,
    }
}

/// Rescale a batch so its maximum lands on the reference ceiling, preserving
/// relative ratios. Batches without a positive maximum pass through.
pub fn normalize_global(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        values.iter().map(|v| v / max * GLOBAL_REFERENCE).collect()
    } else {
        values.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EngineRules;

    #[test]
    fn non_finite_values_degrade() {
        let rules = EngineRules::default();
        assert_eq!(map_value_to_pitch(f32::NAN, &rules), rules.base_frequency);
        assert_eq!(map_value_to_pitch(f32::INFINITY, &rules), rules.base_frequency);
        assert_eq!(map_value_to_param(f32::NAN, 2.0, 8.0, Scaling::Linear), 2.0);
    }

    #[test]
    fn param_mapping_spans_range() {
        assert_eq!(map_value_to_param(0.0, 1.0, 9.0, Scaling::Linear), 1.0);
        assert_eq!(map_value_to_param(400.0, 1.0, 9.0, Scaling::Linear), 9.0);
        assert_eq!(map_value_to_param(200.0, 1.0, 9.0, Scaling::Linear), 5.0);
        // Log mapping hits the geometric midpoint.
        let mid = map_value_to_param(200.0, 100.0, 10000.0, Scaling::Log);
        assert!((mid - 1000.0).abs() < 1.0, "got {}", mid);
    }

    #[test]
    fn pitch_mapping_at_zero_is_base_pitch_class() {
        let rules = EngineRules::default();
        let f = map_value_to_pitch(0.0, &rules);
        assert!((f - rules.base_frequency).abs() < 0.01, "got {}", f);
    }
}
