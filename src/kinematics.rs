//! Kinematics seam between planning and a concrete arm geometry
//!
//! Poses are `[x, y, z, rx, ry, rz]`: translation in meters plus a rotation
//! vector (axis * angle) in radians.

use crate::{ArmError, Result};

/// Forward and inverse kinematics for named end-effector links.
///
/// Link names are validated against the robot model before calls reach an
/// implementation, so implementations may assume the link exists.
pub trait Kinematics: Send + Sync {
    /// Pose of `link` at the given joint configuration.
    fn forward(&self, link: &str, joints: &[f64]) -> Result<[f64; 6]>;

    /// Joint configuration that places `link` at `pose`, seeded near `seed`.
    ///
    /// Returns `ArmError::Kinematics` when no solution exists; planning
    /// surfaces that as an unreachable-goal failure rather than an error.
    fn inverse(&self, link: &str, pose: &[f64; 6], seed: &[f64]) -> Result<Vec<f64>>;
}

/// Kinematics of a gantry-style rig whose first three joints are prismatic
/// x/y/z axes and whose last three drive the tool rotation vector directly.
///
/// This is the model the simulated backend exercises; hardware arms plug in
/// their own solver through the [`Kinematics`] trait.
pub struct AxisAlignedKinematics {
    dof: usize,
}

impl AxisAlignedKinematics {
    pub fn new(dof: usize) -> Self {
        Self { dof }
    }

    fn pose_axes(&self) -> usize {
        self.dof.min(6)
    }
}

impl Kinematics for AxisAlignedKinematics {
    fn forward(&self, _link: &str, joints: &[f64]) -> Result<[f64; 6]> {
        if joints.len() != self.dof {
            return Err(ArmError::Kinematics(format!(
                "expected {} joint values, got {}",
                self.dof,
                joints.len()
            )));
        }
        let mut pose = [0.0; 6];
        for i in 0..self.pose_axes() {
            pose[i] = joints[i];
        }
        Ok(pose)
    }

    fn inverse(&self, _link: &str, pose: &[f64; 6], seed: &[f64]) -> Result<Vec<f64>> {
        if seed.len() != self.dof {
            return Err(ArmError::Kinematics(format!(
                "expected {} seed values, got {}",
                self.dof,
                seed.len()
            )));
        }
        let mut joints = seed.to_vec();
        for i in 0..self.pose_axes() {
            joints[i] = pose[i];
        }
        Ok(joints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_maps_joints_onto_pose() {
        let kin = AxisAlignedKinematics::new(6);
        let pose = kin
            .forward("tool0", &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6])
            .unwrap();
        assert_eq!(pose, [0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    }

    #[test]
    fn inverse_round_trips_forward() {
        let kin = AxisAlignedKinematics::new(6);
        let joints = vec![0.3, -0.1, 0.7, 0.0, 1.2, -0.4];
        let pose = kin.forward("tool0", &joints).unwrap();
        let solved = kin.inverse("tool0", &pose, &[0.0; 6]).unwrap();
        for (a, b) in joints.iter().zip(solved.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn extra_joints_keep_their_seed() {
        let kin = AxisAlignedKinematics::new(7);
        let seed = vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.9];
        let solved = kin
            .inverse("tool0", &[0.1, 0.2, 0.3, 0.0, 0.0, 0.0], &seed)
            .unwrap();
        assert_eq!(solved[6], 0.9);
        assert_eq!(solved[0], 0.1);
    }

    #[test]
    fn wrong_dimension_is_reported() {
        let kin = AxisAlignedKinematics::new(6);
        assert!(matches!(
            kin.forward("tool0", &[0.0; 3]),
            Err(ArmError::Kinematics(_))
        ));
    }
}
