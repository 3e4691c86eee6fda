// src/motion/delay.rs - Start-time offsets that keep the capillary above the ledges
//
// Both curves are sampled at the profile rate. `ledge[k]` is the obstacle height under the
// capillary `k` samples after the XY move starts; `moving` is the Z trajectory from the
// moment its own command is issued. Samples past the end of either curve hold its last
// value.

/// Which way the Z axis travels during the phase being timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Z rises before the XY move; the delay postpones the XY start.
    Rising,
    /// Z descends during the XY move; the delay postpones the Z descent.
    Falling,
}

/// Smallest shift, in samples, for which no Z sample is more than `tolerance` below the
/// ledge height at the same instant.
///
/// The shift is never negative and is zero when the unshifted curves already clear. A Z
/// curve that rises more slowly can only need a later XY start, and a descent started
/// later can only sit higher, so feasibility is monotone in the shift and a bisection over
/// it returns the minimum.
pub fn get_delay(moving: &[f64], ledge: &[f64], tolerance: f64, direction: Direction) -> usize {
    if moving.is_empty() || ledge.is_empty() {
        return 0;
    }
    match direction {
        Direction::Rising => first_feasible(moving.len(), |shift| {
            clears_rising(moving, ledge, tolerance, shift)
        }),
        Direction::Falling => first_feasible(ledge.len(), |shift| {
            clears_falling(moving, ledge, tolerance, shift)
        }),
    }
}

fn at(values: &[f64], index: usize) -> f64 {
    values[index.min(values.len() - 1)]
}

/// XY starts `shift` samples after Z.
fn clears_rising(z: &[f64], ledge: &[f64], tolerance: f64, shift: usize) -> bool {
    ledge
        .iter()
        .enumerate()
        .all(|(k, &height)| at(z, shift + k) >= height - tolerance)
}

/// Z starts descending `shift` samples after XY.
fn clears_falling(z: &[f64], ledge: &[f64], tolerance: f64, shift: usize) -> bool {
    let horizon = ledge.len().max(shift + z.len());
    (0..horizon).all(|k| {
        let height = if k < shift { z[0] } else { at(z, k - shift) };
        height >= at(ledge, k) - tolerance
    })
}

fn first_feasible(upper: usize, feasible: impl Fn(usize) -> bool) -> usize {
    if feasible(0) {
        return 0;
    }
    if !feasible(upper) {
        tracing::warn!(
            "No start offset up to {} samples clears every ledge; using the latest",
            upper
        );
        return upper;
    }
    let (mut lo, mut hi) = (0, upper);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if feasible(mid) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Linear search over every shift, used to cross-check the bisection.
    fn brute_force(moving: &[f64], ledge: &[f64], tolerance: f64, direction: Direction) -> usize {
        let upper = match direction {
            Direction::Rising => moving.len(),
            Direction::Falling => ledge.len(),
        };
        (0..=upper)
            .find(|&shift| match direction {
                Direction::Rising => clears_rising(moving, ledge, tolerance, shift),
                Direction::Falling => clears_falling(moving, ledge, tolerance, shift),
            })
            .unwrap_or(upper)
    }

    fn ramp(from: f64, to: f64, samples: usize) -> Vec<f64> {
        (0..samples)
            .map(|i| from + (to - from) * i as f64 / (samples - 1) as f64)
            .collect()
    }

    #[test]
    fn test_zero_delay_when_already_clear() {
        let z = ramp(5.0, 10.0, 50);
        let ledge = vec![0.0; 100];
        assert_eq!(get_delay(&z, &ledge, 0.5, Direction::Rising), 0);
        assert_eq!(get_delay(&z, &ledge, 0.5, Direction::Falling), 0);
    }

    #[test]
    fn test_rising_waits_for_z_to_clear_ledge() {
        // Z climbs 0 -> 10 over 101 samples, i.e. 0.1 per sample.
        let z = ramp(0.0, 10.0, 101);
        let mut ledge = vec![0.0; 20];
        ledge.extend(vec![10.0; 30]);
        ledge.extend(vec![0.0; 20]);
        let delay = get_delay(&z, &ledge, 0.5, Direction::Rising);
        // At XY sample 20 Z must be >= 9.5, reached at Z sample 95.
        assert_eq!(delay, 75);
        assert_eq!(delay, brute_force(&z, &ledge, 0.5, Direction::Rising));
    }

    #[test]
    fn test_falling_waits_for_stage_to_leave_ledge() {
        let z = ramp(10.0, 3.0, 71);
        let mut ledge = vec![0.0; 20];
        ledge.extend(vec![10.0; 30]);
        ledge.extend(vec![0.0; 20]);
        let delay = get_delay(&z, &ledge, 0.5, Direction::Falling);
        // Last ledge sample is 49; Z may have dropped 0.5 (five samples) by then.
        assert_eq!(delay, 44);
        assert_eq!(delay, brute_force(&z, &ledge, 0.5, Direction::Falling));
    }

    #[test]
    fn test_matches_linear_search_on_irregular_ledges() {
        let z_up = ramp(1.0, 12.0, 137);
        let z_down = ramp(12.0, 2.0, 91);
        let ledge: Vec<f64> = (0..300)
            .map(|k| match k {
                40..=80 => 6.0,
                81..=120 => 11.5,
                200..=230 => 4.0,
                _ => 0.0,
            })
            .collect();
        for tolerance in [0.0, 0.25, 0.5, 1.0] {
            assert_eq!(
                get_delay(&z_up, &ledge, tolerance, Direction::Rising),
                brute_force(&z_up, &ledge, tolerance, Direction::Rising)
            );
            assert_eq!(
                get_delay(&z_down, &ledge, tolerance, Direction::Falling),
                brute_force(&z_down, &ledge, tolerance, Direction::Falling)
            );
        }
    }

    #[test]
    fn test_empty_inputs_need_no_delay() {
        assert_eq!(get_delay(&[], &[1.0], 0.5, Direction::Rising), 0);
        assert_eq!(get_delay(&[1.0], &[], 0.5, Direction::Falling), 0);
    }
}
