// src/motion/profile.rs - Sampled point-to-point motion profiles
//
// A move is modelled as an acceleration phase (jerk-limited ramp up, hold at peak,
// ramp down), an optional cruise at constant velocity and the mirrored deceleration
// phase. The acceleration samples are integrated twice with the trapezoidal rule, so the
// result is the position an axis is expected to report `k / sample_rate` seconds after
// the move command.

use crate::config::ProfileConfig;
use crate::hardware::AxisLimits;
use crate::motion::MotionError;

const NEWTON_ITERATIONS: usize = 50;

/// Sampled single-axis trajectory for one commanded move.
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicProfile {
    positions: Vec<f64>,
    velocities: Vec<f64>,
    accelerations: Vec<f64>,
    time_step: f64,
    peak_velocity: f64,
    peak_acceleration: f64,
    converged: bool,
}

impl KinematicProfile {
    /// Profile of an axis that does not move.
    pub fn stationary(time_step: f64) -> Self {
        Self {
            positions: vec![0.0],
            velocities: vec![0.0],
            accelerations: vec![0.0],
            time_step,
            peak_velocity: 0.0,
            peak_acceleration: 0.0,
            converged: true,
        }
    }

    /// Displacement from the start of the move, one entry per sample.
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn velocities(&self) -> &[f64] {
        &self.velocities
    }

    pub fn accelerations(&self) -> &[f64] {
        &self.accelerations
    }

    /// Seconds between consecutive samples.
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.len().saturating_sub(1) as f64 * self.time_step
    }

    pub fn final_position(&self) -> f64 {
        self.positions.last().copied().unwrap_or(0.0)
    }

    pub fn peak_velocity(&self) -> f64 {
        self.peak_velocity
    }

    pub fn peak_acceleration(&self) -> f64 {
        self.peak_acceleration
    }

    /// False when the short-move velocity search ran out of iterations.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Displacement at `t` seconds after the move started; holds the final value afterwards.
    pub fn position_at(&self, t: f64) -> f64 {
        if t <= 0.0 || self.positions.len() < 2 {
            return self.positions.first().copied().unwrap_or(0.0);
        }
        let exact = t / self.time_step;
        let index = exact.floor() as usize;
        if index + 1 >= self.positions.len() {
            return self.final_position();
        }
        let frac = exact - index as f64;
        self.positions[index] + frac * (self.positions[index + 1] - self.positions[index])
    }

    /// Absolute positions for an axis starting at `start`.
    pub fn offset(&self, start: f64) -> Vec<f64> {
        self.positions.iter().map(|p| start + p).collect()
    }

    /// Absolute positions of a move from `start` that ends exactly on `target`.
    ///
    /// The short-move solver may stop up to its tolerance away from the requested
    /// distance, while the controller always lands on the commanded target; the samples
    /// are stretched by the same factor the controller effectively applies.
    pub fn trajectory(&self, start: f64, target: f64) -> Vec<f64> {
        match self.stretch(target - start) {
            Some(scale) => self.positions.iter().map(|p| start + p * scale).collect(),
            None => vec![target; self.len().max(1)],
        }
    }

    /// [`position_at`](Self::position_at) for the stretched move of
    /// [`trajectory`](Self::trajectory).
    pub fn landing_position_at(&self, t: f64, start: f64, target: f64) -> f64 {
        match self.stretch(target - start) {
            Some(scale) if t < self.duration() => start + self.position_at(t) * scale,
            _ => target,
        }
    }

    fn stretch(&self, distance: f64) -> Option<f64> {
        let reach = self.final_position();
        (reach.abs() >= f64::EPSILON).then(|| distance / reach)
    }
}

/// Extend `values` to `len` samples by repeating its last element.
///
/// Profiles of different lengths are compared sample by sample; repeating the final value
/// keeps a finished axis at its end position rather than snapping it back to zero.
pub fn pad_edge(values: &[f64], len: usize) -> Vec<f64> {
    let mut padded = values.to_vec();
    if let Some(&last) = values.last() {
        padded.resize(len.max(values.len()), last);
    }
    padded
}

/// Outcome of the short-move velocity search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocitySolution {
    pub velocity: f64,
    /// Distance covered by a cruise-free move at `velocity`, minus the requested distance.
    pub residual: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Builds [`KinematicProfile`]s at a fixed sample rate.
#[derive(Debug, Clone, Default)]
pub struct ProfileGenerator {
    config: ProfileConfig,
}

impl ProfileGenerator {
    pub fn new(config: ProfileConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    pub fn time_step(&self) -> f64 {
        1.0 / self.config.sample_rate
    }

    /// Expected trajectory of a move of `distance` mm (negative distances move backwards).
    pub fn compute(&self, distance: f64, limits: AxisLimits) -> Result<KinematicProfile, MotionError> {
        let limits = self.effective_limits(limits)?;
        let dt = self.time_step();
        let span = distance.abs();
        if span < f64::EPSILON {
            return Ok(KinematicProfile::stationary(dt));
        }

        let solution = self.solve_velocity(span, limits)?;
        let phase = self.acceleration_phase(solution.velocity, limits);
        let phase_velocity = cumulative_trapezoid(&phase, dt);
        let cruise_velocity = phase_velocity.last().copied().unwrap_or(0.0);

        let no_cruise = integrate_twice(&mirror(&phase, 0), dt);
        let reach = no_cruise.1.last().copied().unwrap_or(0.0);
        let cruise_samples = if cruise_velocity > 0.0 && span > reach {
            ((span - reach) / (cruise_velocity * dt)).round() as usize
        } else {
            0
        };

        let accelerations = mirror(&phase, cruise_samples);
        let (velocities, positions) = integrate_twice(&accelerations, dt);
        let sign = distance.signum();

        Ok(KinematicProfile {
            positions: positions.into_iter().map(|p| p * sign).collect(),
            velocities: velocities.into_iter().map(|v| v * sign).collect(),
            accelerations: accelerations.into_iter().map(|a| a * sign).collect(),
            time_step: dt,
            peak_velocity: cruise_velocity,
            peak_acceleration: phase.iter().copied().fold(0.0, f64::max),
            converged: solution.converged,
        })
    }

    /// Peak velocity for a move of `distance` mm that stays within the axis limits.
    ///
    /// Returns `velocity_max` when a full ramp fits. Otherwise the trial velocity is
    /// lowered or raised by a step that halves every iteration until the cruise-free move
    /// lands within `solver_tolerance` of the distance. An exhausted iteration budget
    /// yields the best trial seen with `converged == false`.
    pub fn solve_velocity(&self, distance: f64, limits: AxisLimits) -> Result<VelocitySolution, MotionError> {
        let limits = self.effective_limits(limits)?;
        let distance = distance.abs();
        let v_max = limits.velocity_max;
        let full = self.ramp_distance(v_max, limits);
        if full <= distance {
            return Ok(VelocitySolution {
                velocity: v_max,
                residual: full - distance,
                iterations: 0,
                converged: true,
            });
        }
        Ok(self.slow_optimize(distance, limits))
    }

    fn slow_optimize(&self, distance: f64, limits: AxisLimits) -> VelocitySolution {
        let v_max = limits.velocity_max;
        let tolerance = self.config.solver_tolerance;
        let mut trial = v_max;
        let mut step = v_max / 2.0;
        let mut best = VelocitySolution {
            velocity: v_max,
            residual: f64::INFINITY,
            iterations: 0,
            converged: false,
        };

        for iteration in 1..=self.config.max_iterations {
            let residual = self.ramp_distance(trial, limits) - distance;
            if residual.abs() < best.residual.abs() {
                best = VelocitySolution {
                    velocity: trial,
                    residual,
                    iterations: iteration,
                    converged: false,
                };
            }
            if residual.abs() <= tolerance {
                best.converged = true;
                best.iterations = iteration;
                return best;
            }
            trial = if residual > 0.0 { trial - step } else { trial + step };
            trial = trial.clamp(f64::MIN_POSITIVE, v_max);
            step /= 2.0;
        }

        tracing::warn!(
            "Velocity search did not converge for {:.4}mm move: using {:.4}mm/s (residual {:.4}mm after {} iterations)",
            distance,
            best.velocity,
            best.residual,
            self.config.max_iterations
        );
        best.iterations = self.config.max_iterations;
        best
    }

    /// Distance of an accelerate-then-decelerate move peaking at `velocity`.
    fn ramp_distance(&self, velocity: f64, limits: AxisLimits) -> f64 {
        let phase = self.acceleration_phase(velocity, limits);
        let (_, positions) = integrate_twice(&mirror(&phase, 0), self.time_step());
        positions.last().copied().unwrap_or(0.0)
    }

    /// Acceleration samples taking the axis from rest to `velocity`.
    ///
    /// The samples are a palindrome: `min(j*t, a_peak, j*(T - t))` on a grid whose last
    /// point is exactly `T`.
    fn acceleration_phase(&self, velocity: f64, limits: AxisLimits) -> Vec<f64> {
        let jerk = limits.jerk;
        let a_peak = peak_acceleration(velocity, limits.acceleration, jerk);
        let ramp = a_peak / jerk;
        let hold = ((velocity - a_peak * a_peak / jerk) / a_peak).max(0.0);
        let dt = self.time_step();
        let samples = (((2.0 * ramp + hold) / dt).round() as usize).max(2);
        let end = samples as f64 * dt;
        (0..=samples)
            .map(|k| {
                let t = k as f64 * dt;
                (jerk * t).min(a_peak).min(jerk * (end - t)).max(0.0)
            })
            .collect()
    }

    fn effective_limits(&self, limits: AxisLimits) -> Result<AxisLimits, MotionError> {
        if !(limits.velocity_max > 0.0) || !(limits.acceleration > 0.0) || limits.jerk < 0.0 {
            return Err(MotionError::InvalidLimits(format!(
                "velocity_max={} acceleration={} jerk={}",
                limits.velocity_max, limits.acceleration, limits.jerk
            )));
        }
        let jerk = if limits.jerk == 0.0 {
            limits.acceleration * self.config.zero_jerk_factor
        } else {
            limits.jerk
        };
        Ok(AxisLimits { jerk, ..limits })
    }
}

/// Highest acceleration usable when accelerating to `velocity`.
///
/// With `velocity < a_max^2 / jerk` the ramp never reaches `a_max`; the peak is then the
/// root of `f(a) = velocity - a^2 / jerk`, found with Newton's method from `a_max`.
fn peak_acceleration(velocity: f64, a_max: f64, jerk: f64) -> f64 {
    if velocity - a_max * a_max / jerk >= 0.0 {
        return a_max;
    }
    let mut a = a_max;
    for _ in 0..NEWTON_ITERATIONS {
        let f = velocity - a * a / jerk;
        let df = -2.0 * a / jerk;
        let next = a - f / df;
        if (next - a).abs() <= 1e-12 * a_max {
            return next;
        }
        a = next;
    }
    a
}

/// `phase`, `cruise` zero samples, then the negated phase without its leading zero.
fn mirror(phase: &[f64], cruise: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len() * 2 + cruise);
    out.extend_from_slice(phase);
    out.extend(std::iter::repeat_n(0.0, cruise));
    out.extend(phase.iter().skip(1).map(|a| -a));
    out
}

fn cumulative_trapezoid(values: &[f64], dt: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut total = 0.0;
    out.push(0.0);
    for pair in values.windows(2) {
        total += 0.5 * (pair[0] + pair[1]) * dt;
        out.push(total);
    }
    out.truncate(values.len());
    out
}

/// Velocity and position from acceleration. Velocity is clamped at zero so round-off at
/// the end of the deceleration phase cannot move the axis backwards.
fn integrate_twice(accelerations: &[f64], dt: f64) -> (Vec<f64>, Vec<f64>) {
    let velocities: Vec<f64> = cumulative_trapezoid(accelerations, dt)
        .into_iter()
        .map(|v| v.max(0.0))
        .collect();
    let positions = cumulative_trapezoid(&velocities, dt);
    (velocities, positions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(velocity_max: f64, acceleration: f64, jerk: f64) -> AxisLimits {
        AxisLimits { velocity_max, acceleration, jerk }
    }

    fn assert_monotonic(values: &[f64]) {
        for pair in values.windows(2) {
            assert!(pair[1] >= pair[0], "profile decreased: {} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_long_move_reaches_distance_and_cruises() {
        let generator = ProfileGenerator::default();
        let profile = generator.compute(60.0, limits(5.0, 20.0, 5.0)).unwrap();
        assert_monotonic(profile.positions());
        assert!((profile.final_position() - 60.0).abs() < 0.5);
        assert!((profile.peak_velocity() - 5.0).abs() < 0.05);
        assert!(profile.converged());
        // Ramp of ~2 s on either side plus ~10 s of cruise.
        assert!(profile.duration() > 13.0 && profile.duration() < 15.0);
    }

    #[test]
    fn test_peak_acceleration_limited_by_jerk() {
        // 5 - 20^2/5 < 0, so the ramp peaks at sqrt(5 * 5) = 5 mm/s^2.
        assert!((peak_acceleration(5.0, 20.0, 5.0) - 5.0).abs() < 1e-9);
        assert_eq!(peak_acceleration(100.0, 20.0, 5.0), 20.0);
    }

    #[test]
    fn test_short_move_reduces_velocity() {
        let generator = ProfileGenerator::default();
        let profile = generator.compute(2.0, limits(5.0, 20.0, 5.0)).unwrap();
        assert_monotonic(profile.positions());
        assert!((profile.final_position() - 2.0).abs() <= 0.5);
        assert!(profile.peak_velocity() < 5.0);
        assert!(profile.converged());
    }

    #[test]
    fn test_negative_distance_mirrors_profile() {
        let generator = ProfileGenerator::default();
        let forward = generator.compute(7.0, limits(5.0, 20.0, 5.0)).unwrap();
        let backward = generator.compute(-7.0, limits(5.0, 20.0, 5.0)).unwrap();
        assert_eq!(forward.len(), backward.len());
        for (f, b) in forward.positions().iter().zip(backward.positions()) {
            assert_eq!(*f, -*b);
        }
    }

    #[test]
    fn test_zero_distance_is_single_sample() {
        let profile = ProfileGenerator::default().compute(0.0, limits(5.0, 20.0, 5.0)).unwrap();
        assert_eq!(profile.positions(), &[0.0]);
        assert_eq!(profile.duration(), 0.0);
    }

    #[test]
    fn test_zero_jerk_uses_fast_ramp() {
        let generator = ProfileGenerator::default();
        let instant = generator.compute(20.0, limits(5.0, 20.0, 0.0)).unwrap();
        let smooth = generator.compute(20.0, limits(5.0, 20.0, 5.0)).unwrap();
        assert!((instant.peak_acceleration() - 20.0).abs() < 1e-9);
        assert!(instant.duration() < smooth.duration());
        assert!((instant.final_position() - 20.0).abs() < 0.5);
    }

    #[test]
    fn test_acceleration_antisymmetric_velocity_symmetric() {
        let profile = ProfileGenerator::default().compute(30.0, limits(5.0, 20.0, 5.0)).unwrap();
        let acc = profile.accelerations();
        let vel = profile.velocities();
        let n = acc.len();
        for i in 0..n {
            assert!((acc[i] + acc[n - 1 - i]).abs() < 1e-9, "acceleration at {}", i);
            assert!((vel[i] - vel[n - 1 - i]).abs() < 1e-9, "velocity at {}", i);
        }
    }

    #[test]
    fn test_solver_reports_non_convergence() {
        let generator = ProfileGenerator::new(ProfileConfig {
            max_iterations: 1,
            solver_tolerance: 1e-9,
            ..ProfileConfig::default()
        });
        let solution = generator.solve_velocity(1.0, limits(5.0, 20.0, 5.0)).unwrap();
        assert!(!solution.converged);
        assert!(solution.velocity > 0.0 && solution.velocity <= 5.0);
        let profile = generator.compute(1.0, limits(5.0, 20.0, 5.0)).unwrap();
        assert!(!profile.converged());
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let generator = ProfileGenerator::default();
        assert!(matches!(
            generator.compute(1.0, limits(0.0, 20.0, 5.0)),
            Err(MotionError::InvalidLimits(_))
        ));
        assert!(matches!(
            generator.compute(1.0, limits(5.0, 20.0, -1.0)),
            Err(MotionError::InvalidLimits(_))
        ));
    }

    #[test]
    fn test_pad_edge_repeats_last_value() {
        assert_eq!(pad_edge(&[0.0, 1.0, 2.5], 5), vec![0.0, 1.0, 2.5, 2.5, 2.5]);
        assert_eq!(pad_edge(&[1.0, 2.0], 1), vec![1.0, 2.0]);
        assert!(pad_edge(&[], 3).is_empty());
    }

    #[test]
    fn test_position_at_interpolates_and_holds() {
        let profile = ProfileGenerator::default().compute(10.0, limits(5.0, 20.0, 5.0)).unwrap();
        assert_eq!(profile.position_at(-1.0), 0.0);
        assert_eq!(profile.position_at(profile.duration() + 5.0), profile.final_position());
        let mid = profile.position_at(profile.duration() / 2.0);
        assert!(mid > 0.0 && mid < profile.final_position());
    }

    #[test]
    fn test_trajectory_lands_on_target() {
        let profile = ProfileGenerator::default().compute(2.0, limits(5.0, 20.0, 5.0)).unwrap();
        let path = profile.trajectory(3.0, 5.0);
        assert_eq!(path.len(), profile.len());
        assert_eq!(path[0], 3.0);
        assert!((path[path.len() - 1] - 5.0).abs() < 1e-12);
        assert_monotonic(&path);

        let t = profile.duration() / 3.0;
        let expected = 3.0 + profile.position_at(t) * 2.0 / profile.final_position();
        assert!((profile.landing_position_at(t, 3.0, 5.0) - expected).abs() < 1e-12);
        assert_eq!(profile.landing_position_at(profile.duration(), 3.0, 5.0), 5.0);
    }

    #[test]
    fn test_stationary_trajectory_holds_target() {
        let profile = KinematicProfile::stationary(0.001);
        assert_eq!(profile.trajectory(4.0, 4.0), vec![4.0]);
        assert_eq!(profile.landing_position_at(1.0, 4.0, 4.0), 4.0);
    }
}
