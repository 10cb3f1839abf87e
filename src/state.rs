//! Measured robot state and the shared state channel

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// One sample of the measured joint state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub timestamp: f64,
    pub sequence: u64,
}

impl RobotState {
    pub fn zeroed(dof: usize) -> Self {
        Self {
            positions: vec![0.0; dof],
            velocities: vec![0.0; dof],
            timestamp: 0.0,
            sequence: 0,
        }
    }

    /// True when every joint is within `tolerance` of `target`.
    pub fn close_to(&self, target: &[f64], tolerance: f64) -> bool {
        self.positions.len() == target.len()
            && self
                .positions
                .iter()
                .zip(target.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Largest per-joint distance to `target`.
    pub fn max_deviation(&self, target: &[f64]) -> f64 {
        self.positions
            .iter()
            .zip(target.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

/// Read side of the backend's state channel.
///
/// Cheap to clone; every clone observes the same stream of updates.
#[derive(Clone)]
pub struct StateMonitor {
    receiver: watch::Receiver<RobotState>,
}

impl StateMonitor {
    pub fn new(receiver: watch::Receiver<RobotState>) -> Self {
        Self { receiver }
    }

    /// Get the latest robot state (non-blocking)
    pub fn latest(&self) -> RobotState {
        self.receiver.borrow().clone()
    }

    /// Wait for the next state update
    pub async fn next_state(&mut self) -> Option<RobotState> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow().clone())
    }
}
