//! Actuation backend seam and the simulated backend
//!
//! The backend is the single funnel through which motion reaches the robot:
//! trajectory waypoints from execution, Cartesian velocity setpoints from
//! teleoperation, and halts. It also owns the measured-state channel that
//! everything above it observes.

use crate::events::current_timestamp;
use crate::state::RobotState;
use crate::trajectory::TrajectoryPoint;
use crate::{ArmError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Transport between the arm core and a concrete actuation layer.
#[async_trait]
pub trait ActuationBackend: Send + Sync {
    /// Drive the actuators to one trajectory waypoint. Resolves when the
    /// waypoint is reached or the backend faults.
    async fn track_waypoint(&self, point: &TrajectoryPoint, controllers: &[String]) -> Result<()>;

    /// Stream one Cartesian velocity setpoint for the given tool link.
    async fn send_velocity(&self, link: &str, twist: [f64; 6]) -> Result<()>;

    /// Stop all motion now. Always admitted, regardless of who is commanding.
    async fn halt(&self) -> Result<()>;

    /// Measured-state channel fed by this backend.
    fn state_channel(&self) -> watch::Receiver<RobotState>;
}

/// Every command a backend accepted, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    Waypoint { positions: Vec<f64> },
    Velocity { link: String, twist: [f64; 6] },
    Halt,
}

/// Per-command integration step for velocity setpoints, seconds.
const VELOCITY_TICK: f64 = 0.02;

/// In-process backend that integrates commands into a simulated state.
///
/// Waypoint tracking sleeps for the trajectory's own timing (scaled by
/// `time_scale`) and then snaps the state to the waypoint. The command log
/// and the concurrent-producer high-water mark exist so tests can check what
/// actually reached the actuators.
pub struct SimBackend {
    dof: usize,
    time_scale: f64,
    state_tx: watch::Sender<RobotState>,
    state_rx: watch::Receiver<RobotState>,
    commands: Mutex<Vec<BackendCommand>>,
    last_waypoint_time: Mutex<f64>,
    waypoint_counter: AtomicUsize,
    fault_at: Mutex<Option<usize>>,
    active_producers: AtomicUsize,
    max_producers_seen: AtomicUsize,
}

impl SimBackend {
    pub fn new(dof: usize) -> Self {
        let (state_tx, state_rx) = watch::channel(RobotState::zeroed(dof));
        Self {
            dof,
            time_scale: 1.0,
            state_tx,
            state_rx,
            commands: Mutex::new(Vec::new()),
            last_waypoint_time: Mutex::new(0.0),
            waypoint_counter: AtomicUsize::new(0),
            fault_at: Mutex::new(None),
            active_producers: AtomicUsize::new(0),
            max_producers_seen: AtomicUsize::new(0),
        }
    }

    /// Scale trajectory timing; below 1.0 runs faster than real time.
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    /// Make the n-th waypoint (counted over the backend's lifetime) fail.
    pub fn inject_waypoint_fault(&self, index: usize) {
        *self
            .fault_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(index);
    }

    pub fn commands(&self) -> Vec<BackendCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_command(&self) -> Option<BackendCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn halt_count(&self) -> usize {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| matches!(c, BackendCommand::Halt))
            .count()
    }

    /// Most producers ever observed inside a command simultaneously. Stays
    /// at 1 while command-stream ownership is respected.
    pub fn max_concurrent_producers(&self) -> usize {
        self.max_producers_seen.load(Ordering::Relaxed)
    }

    fn record(&self, command: BackendCommand) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }

    fn push_state(&self, update: impl FnOnce(&mut RobotState)) {
        self.state_tx.send_modify(|state| {
            update(state);
            state.timestamp = current_timestamp();
            state.sequence += 1;
        });
    }
}

/// Tracks how many commands are in flight at once.
struct ProducerProbe<'a> {
    backend: &'a SimBackend,
}

impl<'a> ProducerProbe<'a> {
    fn enter(backend: &'a SimBackend) -> Self {
        let now = backend.active_producers.fetch_add(1, Ordering::Relaxed) + 1;
        backend.max_producers_seen.fetch_max(now, Ordering::Relaxed);
        if now > 1 {
            warn!("Command stream contention: {} concurrent producers", now);
        }
        Self { backend }
    }
}

impl Drop for ProducerProbe<'_> {
    fn drop(&mut self) {
        self.backend.active_producers.fetch_sub(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl ActuationBackend for SimBackend {
    async fn track_waypoint(&self, point: &TrajectoryPoint, _controllers: &[String]) -> Result<()> {
        if point.positions.len() != self.dof {
            return Err(ArmError::Execution(format!(
                "waypoint has {} joints, backend expects {}",
                point.positions.len(),
                self.dof
            )));
        }
        let _probe = ProducerProbe::enter(self);

        let index = self.waypoint_counter.fetch_add(1, Ordering::Relaxed);
        let faulted = {
            let fault_at = self.fault_at.lock().unwrap_or_else(PoisonError::into_inner);
            *fault_at == Some(index)
        };
        if faulted {
            return Err(ArmError::Device(format!(
                "simulated actuation fault at waypoint {}",
                index
            )));
        }

        self.record(BackendCommand::Waypoint {
            positions: point.positions.clone(),
        });

        let dt = {
            let mut last = self
                .last_waypoint_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // Trajectories restart their clock at zero.
            let dt = (point.time_from_start - *last).max(0.0);
            *last = point.time_from_start;
            dt
        };
        let scaled = dt * self.time_scale;
        if scaled > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(scaled)).await;
        }

        let positions = point.positions.clone();
        let velocities = point.velocities.clone();
        self.push_state(move |state| {
            state.positions = positions;
            state.velocities = velocities;
        });
        Ok(())
    }

    async fn send_velocity(&self, link: &str, twist: [f64; 6]) -> Result<()> {
        let _probe = ProducerProbe::enter(self);
        self.record(BackendCommand::Velocity {
            link: link.to_string(),
            twist,
        });
        let axes = self.dof.min(6);
        self.push_state(move |state| {
            for i in 0..axes {
                state.positions[i] += twist[i] * VELOCITY_TICK;
                state.velocities[i] = twist[i];
            }
        });
        Ok(())
    }

    async fn halt(&self) -> Result<()> {
        // No producer probe: halt is the safety path and is always admitted.
        self.record(BackendCommand::Halt);
        let dof = self.dof;
        self.push_state(move |state| {
            state.velocities = vec![0.0; dof];
        });
        Ok(())
    }

    fn state_channel(&self) -> watch::Receiver<RobotState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn point(positions: Vec<f64>, time_from_start: f64) -> TrajectoryPoint {
        let dof = positions.len();
        TrajectoryPoint {
            positions,
            velocities: vec![0.0; dof],
            time_from_start,
        }
    }

    #[tokio::test]
    async fn waypoints_move_the_simulated_state() {
        let backend = SimBackend::new(3).with_time_scale(0.0);
        backend
            .track_waypoint(&point(vec![0.1, 0.2, 0.3], 0.5), &[])
            .await
            .unwrap();
        let state = backend.state_channel().borrow().clone();
        assert_eq!(state.positions, vec![0.1, 0.2, 0.3]);
        assert_eq!(state.sequence, 1);
        assert_eq!(
            backend.last_command(),
            Some(BackendCommand::Waypoint {
                positions: vec![0.1, 0.2, 0.3]
            })
        );
    }

    #[tokio::test]
    async fn wrong_dof_waypoint_is_rejected() {
        let backend = SimBackend::new(6).with_time_scale(0.0);
        let err = backend
            .track_waypoint(&point(vec![0.0; 3], 0.1), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::Execution(_)));
    }

    #[tokio::test]
    async fn injected_fault_fails_the_right_waypoint() {
        let backend = SimBackend::new(2).with_time_scale(0.0);
        backend.inject_waypoint_fault(1);
        backend
            .track_waypoint(&point(vec![0.1, 0.1], 0.1), &[])
            .await
            .unwrap();
        let err = backend
            .track_waypoint(&point(vec![0.2, 0.2], 0.2), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::Device(_)));
        // The faulted waypoint never reached the command log.
        assert_eq!(backend.commands().len(), 1);
    }

    #[tokio::test]
    async fn velocity_commands_integrate_and_halt_stops() {
        let backend = SimBackend::new(6).with_time_scale(0.0);
        let twist = [1.0, 0.0, -1.0, 0.0, 0.0, 0.5];
        backend.send_velocity("tool0", twist).await.unwrap();
        backend.send_velocity("tool0", twist).await.unwrap();
        let state = backend.state_channel().borrow().clone();
        assert!((state.positions[0] - 2.0 * VELOCITY_TICK).abs() < 1e-12);
        assert!((state.positions[2] + 2.0 * VELOCITY_TICK).abs() < 1e-12);
        assert_eq!(state.velocities[0], 1.0);

        backend.halt().await.unwrap();
        let state = backend.state_channel().borrow().clone();
        assert!(state.velocities.iter().all(|&v| v == 0.0));
        assert_eq!(backend.last_command(), Some(BackendCommand::Halt));
        assert_eq!(backend.halt_count(), 1);
    }

    #[tokio::test]
    async fn probe_sees_overlapping_producers() {
        let backend = Arc::new(SimBackend::new(1).with_time_scale(0.2));
        let a = {
            let backend = backend.clone();
            tokio::spawn(async move {
                backend
                    .track_waypoint(&point(vec![0.1], 0.1), &[])
                    .await
                    .unwrap();
            })
        };
        let b = {
            let backend = backend.clone();
            tokio::spawn(async move {
                backend
                    .track_waypoint(&point(vec![0.2], 0.2), &[])
                    .await
                    .unwrap();
            })
        };
        a.await.unwrap();
        b.await.unwrap();
        // Nothing held the command stream, so the probe catches the overlap.
        assert!(backend.max_concurrent_producers() >= 2);
    }
}
