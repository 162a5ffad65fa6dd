//! Properties of the Euclidean pattern generator.

use auralis::euclid::{generate, rotate};

#[test]
fn length_and_pulse_count_hold_for_all_valid_inputs() {
    for steps in 1..=32 {
        for pulses in 1..=steps {
            let pattern = generate(pulses, steps);
            assert_eq!(
                pattern.len(),
                steps as usize,
                "E({},{}) length",
                pulses,
                steps
            );
            let ones = pattern.iter().filter(|b| **b == 1).count();
            assert_eq!(ones, pulses as usize, "E({},{}) pulse count", pulses, steps);
        }
    }
}

#[test]
fn canonical_tresillo() {
    assert_eq!(generate(3, 8), vec![1, 0, 0, 1, 0, 0, 1, 0]);
}

#[test]
fn degenerate_inputs_return_all_rests() {
    assert_eq!(generate(0, 8), vec![0; 8]);
    assert_eq!(generate(-3, 8), vec![0; 8]);
    assert_eq!(generate(9, 8), vec![0; 8]);
    assert!(generate(1, 0).is_empty());
}

#[test]
fn patterns_spread_pulses_rather_than_clumping() {
    // Any valid pattern's longest run of rests differs from its shortest by
    // at most one when read cyclically; spot-check a few shapes instead of
    // proving it: no pattern with 2 <= pulses < steps may start with two
    // onsets back to back unless density demands it.
    let p = generate(4, 16);
    assert_eq!(p, vec![1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0]);
    let p = generate(2, 8);
    assert_eq!(p, vec![1, 0, 0, 0, 1, 0, 0, 0]);
}

#[test]
fn rotation_by_offset_then_complement_is_identity() {
    for (pulses, steps) in [(3, 8), (5, 8), (7, 16), (4, 9)] {
        let pattern = generate(pulses, steps);
        for offset in 0..steps as usize {
            let there = rotate(&pattern, offset);
            let back = rotate(&there, steps as usize - offset);
            assert_eq!(back, pattern, "E({},{}) offset {}", pulses, steps, offset);
        }
    }
}

#[test]
fn rotation_preserves_pulse_count() {
    let pattern = generate(5, 13);
    for offset in 0..26 {
        let rotated = rotate(&pattern, offset);
        assert_eq!(rotated.len(), pattern.len());
        assert_eq!(
            rotated.iter().filter(|b| **b == 1).count(),
            pattern.iter().filter(|b| **b == 1).count()
        );
    }
}

#[test]
fn rotation_direction_is_from_the_tail() {
    // The last `offset` steps move to the front.
    assert_eq!(rotate(&[1, 1, 0, 0], 1), vec![0, 1, 1, 0]);
    assert_eq!(rotate(&[1, 1, 0, 0], 2), vec![0, 0, 1, 1]);
}
