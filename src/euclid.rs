//! Euclidean rhythm generation
//!
//! Distributes `pulses` onsets as evenly as possible across `steps` slots
//! using the Bjorklund bucket-merge procedure: start from singleton groups,
//! then repeatedly fold the trailing remainder groups onto the leading
//! groups until at most one remainder group is left.
//!
//! E(3,8) -> [1,0,0,1,0,0,1,0] (the tresillo), E(5,8) -> [1,0,1,1,0,1,1,0].

/// Generate a Euclidean pattern of `steps` slots with exactly `pulses` set,
/// maximally evenly spaced. Degenerate inputs (`pulses <= 0`, `steps <= 0`,
/// `pulses > steps`) return an all-rest pattern of `steps.max(0)` slots.
pub fn generate(pulses: i32, steps: i32) -> Vec<u8> {
    let len = steps.max(0) as usize;
    if pulses <= 0 || steps <= 0 || pulses > steps {
        return vec![0; len];
    }
    let pulses = pulses as usize;

    let mut groups: Vec<Vec<u8>> = (0..len)
        .map(|i| vec![if i < pulses { 1 } else { 0 }])
        .collect();

    loop {
        let last = groups[groups.len() - 1].clone();
        if groups[0] == last {
            // All groups equal: fully folded.
            break;
        }
        let remainder = groups.iter().rev().take_while(|g| **g == last).count();
        let head = groups.len() - remainder;
        if remainder <= 1 || head == 0 {
            break;
        }
        // Fold one trailing group onto each leading group. The remainder
        // groups are identical, so pop order is immaterial.
        let take = remainder.min(head);
        for k in 0..take {
            let g = groups.pop().unwrap_or_default();
            groups[k].extend(g);
        }
    }

    groups.concat()
}

/// Rotate a pattern by `offset` steps from the tail: the last `offset`
/// slots move to the front. Offsets wrap around the pattern length.
pub fn rotate(pattern: &[u8], offset: usize) -> Vec<u8> {
    if pattern.is_empty() {
        return Vec::new();
    }
    let mut rotated = pattern.to_vec();
    rotated.rotate_right(offset % pattern.len());
    rotated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tresillo() {
        assert_eq!(generate(3, 8), vec![1, 0, 0, 1, 0, 0, 1, 0]);
    }

    #[test]
    fn cinquillo() {
        assert_eq!(generate(5, 8), vec![1, 0, 1, 1, 0, 1, 1, 0]);
    }

    #[test]
    fn degenerate_inputs_are_all_rests() {
        assert_eq!(generate(0, 4), vec![0, 0, 0, 0]);
        assert_eq!(generate(-1, 4), vec![0, 0, 0, 0]);
        assert_eq!(generate(5, 4), vec![0, 0, 0, 0]);
        assert!(generate(3, 0).is_empty());
        assert!(generate(3, -2).is_empty());
    }

    #[test]
    fn full_and_single() {
        assert_eq!(generate(4, 4), vec![1, 1, 1, 1]);
        assert_eq!(generate(1, 4), vec![1, 0, 0, 0]);
    }

    #[test]
    fn rotation_moves_tail_to_front() {
        let p = vec![1, 0, 0, 1, 0, 0, 1, 0];
        assert_eq!(rotate(&p, 1), vec![0, 1, 0, 0, 1, 0, 0, 1]);
        assert_eq!(rotate(&p, 0), p);
        assert_eq!(rotate(&p, 8), p);
        assert_eq!(rotate(&p, 9), rotate(&p, 1));
    }
}
