//! Joint-space trajectories and trapezoidal time parameterization

use crate::{ArmError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    /// Seconds from trajectory start.
    pub time_from_start: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub points: Vec<TrajectoryPoint>,
    pub total_time: f64,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start(&self) -> Option<&TrajectoryPoint> {
        self.points.first()
    }

    pub fn end(&self) -> Option<&TrajectoryPoint> {
        self.points.last()
    }
}

/// Moves below this joint-space distance collapse to a hold-position plan.
const NULL_MOVE_EPSILON: f64 = 1e-9;

/// Time-parameterize a straight joint-space segment from `start` to `goal`.
///
/// The profile is a synchronized trapezoid on the normalized path parameter:
/// every joint accelerates, cruises and decelerates together, and the joint
/// closest to its limit dictates the pace. Samples are spaced so that no
/// joint moves more than `resolution` radians between consecutive waypoints.
/// Start and end velocities are exactly zero.
pub fn time_parameterize(
    start: &[f64],
    goal: &[f64],
    max_velocity: &[f64],
    max_acceleration: &[f64],
    resolution: f64,
) -> Result<Trajectory> {
    let dof = start.len();
    if goal.len() != dof || max_velocity.len() != dof || max_acceleration.len() != dof {
        return Err(ArmError::Config(format!(
            "dimension mismatch: start {}, goal {}, limits {}/{}",
            dof,
            goal.len(),
            max_velocity.len(),
            max_acceleration.len()
        )));
    }
    if resolution <= 0.0 {
        return Err(ArmError::Config(
            "waypoint resolution must be positive".to_string(),
        ));
    }
    if max_velocity.iter().any(|&v| v <= 0.0) || max_acceleration.iter().any(|&a| a <= 0.0) {
        return Err(ArmError::Config(
            "velocity and acceleration limits must be positive".to_string(),
        ));
    }

    let delta: Vec<f64> = goal.iter().zip(start.iter()).map(|(g, s)| g - s).collect();
    let max_delta = delta.iter().map(|d| d.abs()).fold(0.0, f64::max);

    if max_delta < NULL_MOVE_EPSILON {
        // Already at the goal. One waypoint keeps execution well defined.
        return Ok(Trajectory {
            points: vec![TrajectoryPoint {
                positions: start.to_vec(),
                velocities: vec![0.0; dof],
                time_from_start: 0.0,
            }],
            total_time: 0.0,
        });
    }

    // Limits mapped onto the unit path parameter s in [0, 1]. The binding
    // joint is the one with the smallest limit-to-distance ratio.
    let mut path_velocity = f64::INFINITY;
    let mut path_acceleration = f64::INFINITY;
    for i in 0..dof {
        let d = delta[i].abs();
        if d > 0.0 {
            path_velocity = path_velocity.min(max_velocity[i] / d);
            path_acceleration = path_acceleration.min(max_acceleration[i] / d);
        }
    }

    // Peak parameter velocity; capped so the ramps fit inside the unit path
    // (triangular profile for short moves).
    let peak = path_velocity.min(path_acceleration.sqrt());
    let ramp_time = peak / path_acceleration;
    let ramp_dist = peak * peak / (2.0 * path_acceleration);
    let cruise_dist = (1.0 - 2.0 * ramp_dist).max(0.0);
    let total_time = 2.0 * ramp_time + cruise_dist / peak;

    let time_at = |s: f64| -> f64 {
        if s <= ramp_dist {
            (2.0 * s / path_acceleration).sqrt()
        } else if s < 1.0 - ramp_dist {
            ramp_time + (s - ramp_dist) / peak
        } else {
            total_time - (2.0 * (1.0 - s) / path_acceleration).sqrt()
        }
    };
    let velocity_at = |s: f64| -> f64 {
        if s <= ramp_dist {
            (2.0 * path_acceleration * s).sqrt()
        } else if s < 1.0 - ramp_dist {
            peak
        } else {
            (2.0 * path_acceleration * (1.0 - s)).sqrt()
        }
    };

    let segments = (max_delta / resolution).ceil().max(1.0) as usize;
    let mut points = Vec::with_capacity(segments + 1);
    for k in 0..=segments {
        let s = k as f64 / segments as f64;
        let positions = if k == segments {
            goal.to_vec()
        } else {
            start.iter().zip(delta.iter()).map(|(q, d)| q + s * d).collect()
        };
        let ds = velocity_at(s);
        let velocities = delta.iter().map(|d| d * ds).collect();
        points.push(TrajectoryPoint {
            positions,
            velocities,
            time_from_start: time_at(s),
        });
    }
    // Path endpoints are at rest by construction; pin them against rounding.
    if let Some(first) = points.first_mut() {
        first.velocities = vec![0.0; dof];
        first.time_from_start = 0.0;
    }
    if let Some(last) = points.last_mut() {
        last.velocities = vec![0.0; dof];
        last.time_from_start = total_time;
    }

    Ok(Trajectory { points, total_time })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VMAX: [f64; 3] = [1.5, 1.0, 2.0];
    const AMAX: [f64; 3] = [3.0, 2.0, 4.0];

    fn plan(start: &[f64], goal: &[f64], resolution: f64) -> Trajectory {
        time_parameterize(start, goal, &VMAX, &AMAX, resolution).unwrap()
    }

    #[test]
    fn endpoints_match_request_and_are_at_rest() {
        let start = [0.0, -0.5, 1.0];
        let goal = [1.2, 0.5, -0.7];
        let traj = plan(&start, &goal, 0.05);

        let first = traj.start().unwrap();
        let last = traj.end().unwrap();
        assert_eq!(first.positions, start.to_vec());
        assert_eq!(last.positions, goal.to_vec());
        assert!(first.velocities.iter().all(|&v| v == 0.0));
        assert!(last.velocities.iter().all(|&v| v == 0.0));
        assert_eq!(first.time_from_start, 0.0);
        assert!((last.time_from_start - traj.total_time).abs() < 1e-12);
    }

    #[test]
    fn time_is_strictly_monotonic() {
        let traj = plan(&[0.0, 0.0, 0.0], &[2.0, -1.5, 0.3], 0.05);
        assert!(traj.len() > 10);
        for pair in traj.points.windows(2) {
            assert!(pair[1].time_from_start > pair[0].time_from_start);
        }
    }

    #[test]
    fn velocity_limits_are_respected() {
        let traj = plan(&[0.0, 0.0, 0.0], &[2.5, -2.0, 1.0], 0.01);
        for point in &traj.points {
            for (i, &v) in point.velocities.iter().enumerate() {
                assert!(
                    v.abs() <= VMAX[i] + 1e-9,
                    "joint {} velocity {} exceeds {}",
                    i,
                    v,
                    VMAX[i]
                );
            }
        }
    }

    #[test]
    fn acceleration_limits_hold_between_samples() {
        let traj = plan(&[0.0, 0.0, 0.0], &[2.5, -2.0, 1.0], 0.01);
        for pair in traj.points.windows(2) {
            let dt = pair[1].time_from_start - pair[0].time_from_start;
            for i in 0..3 {
                let dv = pair[1].velocities[i] - pair[0].velocities[i];
                assert!(
                    (dv / dt).abs() <= AMAX[i] + 1e-6,
                    "joint {} acceleration {} exceeds {}",
                    i,
                    dv / dt,
                    AMAX[i]
                );
            }
        }
    }

    #[test]
    fn waypoint_spacing_follows_resolution() {
        let resolution = 0.05;
        let traj = plan(&[0.0, 0.0, 0.0], &[1.0, 0.4, -0.8], resolution);
        for pair in traj.points.windows(2) {
            let step = pair[0]
                .positions
                .iter()
                .zip(pair[1].positions.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            assert!(step <= resolution + 1e-9);
        }
    }

    #[test]
    fn short_move_uses_triangular_profile() {
        // Too short to ever reach max velocity.
        let traj = plan(&[0.0, 0.0, 0.0], &[0.05, 0.0, 0.0], 0.01);
        let peak = traj
            .points
            .iter()
            .map(|p| p.velocities[0].abs())
            .fold(0.0, f64::max);
        assert!(peak > 0.0);
        assert!(peak < VMAX[0] * 0.5);
    }

    #[test]
    fn halved_velocity_limit_slows_the_motion() {
        let start = [0.0, 0.0, 0.0];
        let goal = [2.0, 0.0, 0.0];
        let fast = time_parameterize(&start, &goal, &VMAX, &AMAX, 0.05).unwrap();
        let slow_vmax = [VMAX[0] / 2.0, VMAX[1], VMAX[2]];
        let slow = time_parameterize(&start, &goal, &slow_vmax, &AMAX, 0.05).unwrap();
        assert!(slow.total_time > fast.total_time);
    }

    #[test]
    fn null_move_collapses_to_single_waypoint() {
        let q = [0.3, -0.2, 0.9];
        let traj = plan(&q, &q, 0.05);
        assert_eq!(traj.len(), 1);
        assert_eq!(traj.total_time, 0.0);
        assert_eq!(traj.start().unwrap().positions, q.to_vec());
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let err = time_parameterize(&[0.0], &[1.0, 2.0], &VMAX, &AMAX, 0.05).unwrap_err();
        assert!(matches!(err, ArmError::Config(_)));
    }

    #[test]
    fn rejects_nonpositive_resolution() {
        let err = time_parameterize(&[0.0; 3], &[1.0; 3], &VMAX, &AMAX, 0.0).unwrap_err();
        assert!(matches!(err, ArmError::Config(_)));
    }
}
