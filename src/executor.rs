//! Trajectory execution with progress reporting and abort

use crate::arbiter::{CommandStreamArbiter, CommandStreamGuard, StreamOwner};
use crate::backend::ActuationBackend;
use crate::config::RobotModel;
use crate::events::{EventSink, ExecutionEvent};
use crate::state::StateMonitor;
use crate::trajectory::Trajectory;
use crate::{ArmError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Lifecycle of one dispatched trajectory.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    Dispatched,
    Moving {
        waypoints_done: usize,
        waypoints_total: usize,
    },
    Succeeded {
        waypoints_total: usize,
    },
    Failed {
        reason: String,
        waypoints_done: usize,
        waypoints_total: usize,
    },
    Aborted {
        waypoints_done: usize,
        waypoints_total: usize,
    },
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded { .. }
                | ExecutionStatus::Failed { .. }
                | ExecutionStatus::Aborted { .. }
        )
    }
}

/// Terminal outcome of a blocking execution. In-motion faults land here as
/// a `Failed` status with partial progress, not as an `Err`.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub id: Uuid,
    pub status: ExecutionStatus,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, ExecutionStatus::Succeeded { .. })
    }
}

/// Observer side of a dispatched execution.
///
/// Dropping the handle does not stop the motion; it only stops watching.
pub struct ExecutionHandle {
    id: Uuid,
    status_rx: watch::Receiver<ExecutionStatus>,
    abort_flag: Arc<AtomicBool>,
}

impl ExecutionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest status (non-blocking).
    pub fn status(&self) -> ExecutionStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to every status transition.
    pub fn status_channel(&self) -> watch::Receiver<ExecutionStatus> {
        self.status_rx.clone()
    }

    /// Request a stop. The motion ends at the next waypoint boundary with a
    /// halt, reported as `Aborted`.
    pub fn abort(&self) {
        self.abort_flag.store(true, Ordering::Relaxed);
    }

    /// Wait until the execution reaches a terminal status.
    pub async fn wait(&mut self) -> ExecutionStatus {
        loop {
            let current = self.status_rx.borrow().clone();
            if current.is_terminal() {
                return current;
            }
            if self.status_rx.changed().await.is_err() {
                return self.status_rx.borrow().clone();
            }
        }
    }
}

struct ActiveExecution {
    id: Uuid,
    abort: Arc<AtomicBool>,
}

/// Dispatches trajectories to the backend, one at a time.
///
/// The controller claims the command stream for the whole motion, verifies
/// the trajectory starts where the robot actually is, and reports progress
/// per waypoint on a watch channel.
pub struct ExecutionController {
    model: Arc<RobotModel>,
    backend: Arc<dyn ActuationBackend>,
    arbiter: CommandStreamArbiter,
    states: StateMonitor,
    events: Arc<dyn EventSink>,
    active: Arc<Mutex<Option<ActiveExecution>>>,
}

impl ExecutionController {
    pub fn new(
        model: Arc<RobotModel>,
        backend: Arc<dyn ActuationBackend>,
        arbiter: CommandStreamArbiter,
        states: StateMonitor,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            model,
            backend,
            arbiter,
            states,
            events,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Dispatch a trajectory and return once the backend is committed to it.
    ///
    /// A second dispatch while one is in flight fails with `ModeConflict`;
    /// executions are never queued or interleaved.
    pub async fn submit(
        &self,
        trajectory: Trajectory,
        controllers: Option<Vec<String>>,
    ) -> Result<ExecutionHandle> {
        let controllers = self.resolve_controllers(controllers)?;
        let guard = self.arbiter.try_acquire(StreamOwner::Execution)?;
        self.validate(&trajectory)?;

        let id = Uuid::new_v4();
        let total = trajectory.len();
        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Dispatched);
        let abort_flag = Arc::new(AtomicBool::new(false));
        {
            let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(ActiveExecution {
                id,
                abort: abort_flag.clone(),
            });
        }

        if let Err(e) = self
            .events
            .publish_execution(&ExecutionEvent::started(id, total))
            .await
        {
            warn!("Failed to publish execution event: {}", e);
        }
        info!("Execution {} dispatched: {} waypoints", id, total);

        tokio::spawn(run_trajectory(
            self.backend.clone(),
            self.events.clone(),
            self.active.clone(),
            guard,
            trajectory,
            controllers,
            status_tx,
            abort_flag.clone(),
            id,
        ));

        Ok(ExecutionHandle {
            id,
            status_rx,
            abort_flag,
        })
    }

    /// Dispatch a trajectory and wait for its terminal status.
    pub async fn execute_and_wait(
        &self,
        trajectory: Trajectory,
        controllers: Option<Vec<String>>,
    ) -> Result<ExecutionReport> {
        let mut handle = self.submit(trajectory, controllers).await?;
        let status = handle.wait().await;
        Ok(ExecutionReport {
            id: handle.id(),
            status,
        })
    }

    /// Flag the in-flight execution (if any) to stop. Returns whether one
    /// was flagged.
    pub fn abort_active(&self) -> bool {
        let slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(active) => {
                active.abort.store(true, Ordering::Relaxed);
                info!("Abort requested for execution {}", active.id);
                true
            }
            None => false,
        }
    }

    fn validate(&self, trajectory: &Trajectory) -> Result<()> {
        let first = trajectory
            .start()
            .ok_or_else(|| ArmError::Config("trajectory has no waypoints".to_string()))?;
        if first.positions.len() != self.model.dof() {
            return Err(ArmError::Config(format!(
                "trajectory has {} joints, model has {}",
                first.positions.len(),
                self.model.dof()
            )));
        }
        let live = self.states.latest();
        let tolerance = self.model.robot.start_tolerance();
        if !live.close_to(&first.positions, tolerance) {
            return Err(ArmError::StartStateMismatch(format!(
                "trajectory starts {:.4} rad away from the measured state (tolerance {})",
                live.max_deviation(&first.positions),
                tolerance
            )));
        }
        Ok(())
    }

    fn resolve_controllers(&self, controllers: Option<Vec<String>>) -> Result<Vec<String>> {
        match controllers {
            Some(names) => {
                self.model.ensure_controllers(&names)?;
                Ok(names)
            }
            None => Ok(self.model.default_controllers()),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_trajectory(
    backend: Arc<dyn ActuationBackend>,
    events: Arc<dyn EventSink>,
    active: Arc<Mutex<Option<ActiveExecution>>>,
    guard: CommandStreamGuard,
    trajectory: Trajectory,
    controllers: Vec<String>,
    status_tx: watch::Sender<ExecutionStatus>,
    abort_flag: Arc<AtomicBool>,
    id: Uuid,
) {
    let total = trajectory.len();
    let mut done = 0usize;
    let mut terminal = None;

    for point in &trajectory.points {
        if abort_flag.load(Ordering::Relaxed) {
            halt_after(&backend, "abort").await;
            terminal = Some(ExecutionStatus::Aborted {
                waypoints_done: done,
                waypoints_total: total,
            });
            break;
        }
        match backend.track_waypoint(point, &controllers).await {
            Ok(()) => {
                done += 1;
                let _ = status_tx.send(ExecutionStatus::Moving {
                    waypoints_done: done,
                    waypoints_total: total,
                });
            }
            Err(e) => {
                error!("Execution {} failed at waypoint {}: {}", id, done, e);
                halt_after(&backend, "failure").await;
                terminal = Some(ExecutionStatus::Failed {
                    reason: e.to_string(),
                    waypoints_done: done,
                    waypoints_total: total,
                });
                break;
            }
        }
    }
    let terminal = terminal.unwrap_or(ExecutionStatus::Succeeded {
        waypoints_total: total,
    });

    let event = match &terminal {
        ExecutionStatus::Failed {
            reason,
            waypoints_done,
            ..
        } => ExecutionEvent::failed(id, *waypoints_done, total, reason),
        ExecutionStatus::Aborted { waypoints_done, .. } => {
            ExecutionEvent::aborted(id, *waypoints_done, total)
        }
        _ => ExecutionEvent::succeeded(id, total),
    };
    if let Err(e) = events.publish_execution(&event).await {
        warn!("Failed to publish execution event: {}", e);
    }
    match &terminal {
        ExecutionStatus::Succeeded { .. } => info!("Execution {} completed", id),
        ExecutionStatus::Aborted { waypoints_done, .. } => {
            info!(
                "Execution {} aborted after {}/{} waypoints",
                id, waypoints_done, total
            )
        }
        _ => {}
    }

    // Release the stream before the terminal status becomes observable, so
    // a caller woken by completion can dispatch again immediately.
    {
        let mut slot = active.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|a| a.id) == Some(id) {
            *slot = None;
        }
    }
    drop(guard);
    let _ = status_tx.send(terminal);
}

async fn halt_after(backend: &Arc<dyn ActuationBackend>, cause: &str) {
    if let Err(e) = backend.halt().await {
        warn!("Halt after {} failed: {}", cause, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCommand, SimBackend};
    use crate::config::sample_model;
    use crate::events::NoOpSink;
    use crate::trajectory::time_parameterize;
    use std::time::Duration;

    fn rig(time_scale: f64) -> (Arc<SimBackend>, CommandStreamArbiter, ExecutionController) {
        let model = Arc::new(sample_model());
        let backend = Arc::new(SimBackend::new(6).with_time_scale(time_scale));
        let arbiter = CommandStreamArbiter::new();
        let controller = ExecutionController::new(
            model,
            backend.clone(),
            arbiter.clone(),
            StateMonitor::new(backend.state_channel()),
            Arc::new(NoOpSink),
        );
        (backend, arbiter, controller)
    }

    fn trajectory_from(start: [f64; 6], goal: [f64; 6]) -> Trajectory {
        time_parameterize(&start, &goal, &[1.5; 6], &[3.0; 6], 0.05).unwrap()
    }

    #[tokio::test]
    async fn blocking_execution_reaches_the_goal() {
        let (backend, arbiter, controller) = rig(0.0);
        let goal = [0.5, -0.5, 0.5, 0.0, 0.5, 0.0];
        let trajectory = trajectory_from([0.0; 6], goal);
        let report = controller
            .execute_and_wait(trajectory, None)
            .await
            .unwrap();
        assert!(report.succeeded());
        let state = backend.state_channel().borrow().clone();
        assert_eq!(state.positions, goal.to_vec());
        assert!(arbiter.is_free());
    }

    #[tokio::test]
    async fn start_state_mismatch_is_rejected_before_motion() {
        let (backend, arbiter, controller) = rig(0.0);
        let trajectory = trajectory_from([0.4; 6], [0.8; 6]);
        let err = controller
            .execute_and_wait(trajectory, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::StartStateMismatch(_)));
        assert!(backend.commands().is_empty());
        assert!(arbiter.is_free());
    }

    #[tokio::test]
    async fn empty_trajectory_is_rejected() {
        let (_, _, controller) = rig(0.0);
        let empty = Trajectory {
            points: Vec::new(),
            total_time: 0.0,
        };
        assert!(matches!(
            controller.execute_and_wait(empty, None).await,
            Err(ArmError::Config(_))
        ));
    }

    #[tokio::test]
    async fn unknown_controller_is_rejected() {
        let (_, _, controller) = rig(0.0);
        let trajectory = trajectory_from([0.0; 6], [0.2; 6]);
        let err = controller
            .execute_and_wait(trajectory, Some(vec!["leg_controller".to_string()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::Config(_)));
    }

    #[tokio::test]
    async fn overlapping_execution_is_a_mode_conflict() {
        let (_, _, controller) = rig(0.05);
        let first = trajectory_from([0.0; 6], [0.6; 6]);
        let mut handle = controller.submit(first, None).await.unwrap();

        let second = trajectory_from([0.0; 6], [0.3; 6]);
        let err = controller
            .execute_and_wait(second, None)
            .await
            .unwrap_err();
        match err {
            ArmError::ModeConflict { held_by, requested } => {
                assert_eq!(held_by, StreamOwner::Execution);
                assert_eq!(requested, StreamOwner::Execution);
            }
            other => panic!("expected ModeConflict, got {:?}", other),
        }

        assert!(matches!(
            handle.wait().await,
            ExecutionStatus::Succeeded { .. }
        ));
    }

    #[tokio::test]
    async fn backend_fault_reports_partial_progress_and_halts() {
        let (backend, arbiter, controller) = rig(0.0);
        backend.inject_waypoint_fault(3);
        let trajectory = trajectory_from([0.0; 6], [0.5; 6]);
        let total = trajectory.len();
        let report = controller
            .execute_and_wait(trajectory, None)
            .await
            .unwrap();
        match report.status {
            ExecutionStatus::Failed {
                waypoints_done,
                waypoints_total,
                ref reason,
            } => {
                assert_eq!(waypoints_done, 3);
                assert_eq!(waypoints_total, total);
                assert!(reason.contains("fault"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(backend.last_command(), Some(BackendCommand::Halt));
        assert!(arbiter.is_free());

        // The robot sits at the last tracked waypoint; a fresh trajectory
        // from there is accepted.
        let live = backend.state_channel().borrow().positions.clone();
        let mut resume_start = [0.0; 6];
        resume_start.copy_from_slice(&live);
        let resume = trajectory_from(resume_start, [0.0; 6]);
        let report = controller.execute_and_wait(resume, None).await.unwrap();
        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn abort_stops_mid_flight_and_releases_the_stream() {
        let (backend, arbiter, controller) = rig(0.05);
        let trajectory = trajectory_from([0.0; 6], [1.0; 6]);
        let total = trajectory.len();
        let mut handle = controller.submit(trajectory, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort();
        match handle.wait().await {
            ExecutionStatus::Aborted {
                waypoints_done,
                waypoints_total,
            } => {
                assert!(waypoints_done > 0);
                assert!(waypoints_done < waypoints_total);
                assert_eq!(waypoints_total, total);
            }
            other => panic!("expected Aborted, got {:?}", other),
        }
        assert_eq!(backend.last_command(), Some(BackendCommand::Halt));
        assert!(arbiter.is_free());
    }

    #[tokio::test]
    async fn abort_active_flags_the_running_execution() {
        let (_, _, controller) = rig(0.05);
        assert!(!controller.abort_active());
        let trajectory = trajectory_from([0.0; 6], [0.8; 6]);
        let mut handle = controller.submit(trajectory, None).await.unwrap();
        assert!(controller.abort_active());
        assert!(matches!(
            handle.wait().await,
            ExecutionStatus::Aborted { .. }
        ));
        assert!(!controller.abort_active());
    }

    #[tokio::test]
    async fn handle_reports_terminal_status_after_completion() {
        let (_, _, controller) = rig(0.0);
        let trajectory = trajectory_from([0.0; 6], [0.2; 6]);
        let mut handle = controller.submit(trajectory, None).await.unwrap();
        let status = handle.wait().await;
        assert!(status.is_terminal());
        assert_eq!(handle.status(), status);
    }
}
