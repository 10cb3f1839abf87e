//! Arm service - high-level wrapper for planning, execution and teleop
//!
//! Provides a simple interface for embedding the arm control core in other
//! applications, regardless of transport mechanism.

use crate::arbiter::CommandStreamArbiter;
use crate::backend::ActuationBackend;
use crate::config::RobotModel;
use crate::events::{EventSink, NoOpSink};
use crate::executor::{ExecutionController, ExecutionHandle, ExecutionReport};
use crate::kinematics::Kinematics;
use crate::planner::{Goal, PlanResult, PlanningParams, PlanningSession};
use crate::state::{RobotState, StateMonitor};
use crate::teleop::{InputDevice, TeleopArbiter, TeleopParams};
use crate::trajectory::Trajectory;
use crate::Result;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Outcome of a combined plan-and-execute request.
#[derive(Debug, Clone)]
pub enum MoveOutcome {
    Executed(ExecutionReport),
    PlanningFailed { reason: String },
}

impl MoveOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, MoveOutcome::Executed(report) if report.succeeded())
    }
}

/// One robot, one command stream, any number of observers.
///
/// The service wires the planner, executor and teleoperation arbiter to a
/// shared actuation backend and hands out planning sessions. Clones share
/// all state, so a clone per task is the intended usage.
#[derive(Clone)]
pub struct ArmService {
    model: Arc<RobotModel>,
    kinematics: Arc<dyn Kinematics>,
    backend: Arc<dyn ActuationBackend>,
    arbiter: CommandStreamArbiter,
    states: StateMonitor,
    executor: Arc<ExecutionController>,
    teleop: Arc<TeleopArbiter>,
    events: Arc<dyn EventSink>,
}

impl ArmService {
    /// Create a service around a validated robot model.
    pub fn new(
        model: RobotModel,
        kinematics: Arc<dyn Kinematics>,
        backend: Arc<dyn ActuationBackend>,
    ) -> Result<Self> {
        Self::with_events(model, kinematics, backend, Arc::new(NoOpSink))
    }

    /// Create a service from a model bundle on disk.
    pub fn load(
        path: &str,
        kinematics: Arc<dyn Kinematics>,
        backend: Arc<dyn ActuationBackend>,
    ) -> Result<Self> {
        let model = RobotModel::load_from_path(path)?;
        Self::new(model, kinematics, backend)
    }

    pub fn with_events(
        model: RobotModel,
        kinematics: Arc<dyn Kinematics>,
        backend: Arc<dyn ActuationBackend>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        model.validate()?;
        info!("Initializing arm service for '{}'", model.robot.name);
        let model = Arc::new(model);
        let arbiter = CommandStreamArbiter::new();
        let states = StateMonitor::new(backend.state_channel());
        let executor = Arc::new(ExecutionController::new(
            model.clone(),
            backend.clone(),
            arbiter.clone(),
            states.clone(),
            events.clone(),
        ));
        let teleop = Arc::new(TeleopArbiter::new(
            model.clone(),
            backend.clone(),
            arbiter.clone(),
            events.clone(),
        ));
        Ok(Self {
            model,
            kinematics,
            backend,
            arbiter,
            states,
            executor,
            teleop,
            events,
        })
    }

    /// Swap the event sink. Call at construction time, before any sessions
    /// or executions exist.
    pub fn with_event_sink(self, events: Arc<dyn EventSink>) -> Self {
        let executor = Arc::new(ExecutionController::new(
            self.model.clone(),
            self.backend.clone(),
            self.arbiter.clone(),
            self.states.clone(),
            events.clone(),
        ));
        let teleop = Arc::new(TeleopArbiter::new(
            self.model.clone(),
            self.backend.clone(),
            self.arbiter.clone(),
            events.clone(),
        ));
        Self {
            executor,
            teleop,
            events,
            ..self
        }
    }

    /// Start a new planning conversation.
    pub fn planning_session(&self) -> PlanningSession {
        PlanningSession::new(
            self.model.clone(),
            self.kinematics.clone(),
            self.states.clone(),
            self.events.clone(),
        )
    }

    /// Plan to `goal` from the current state and execute the result,
    /// blocking until the motion ends.
    pub async fn move_to(&self, goal: Goal, params: PlanningParams) -> Result<MoveOutcome> {
        let mut session = self.planning_session();
        session.set_goal_state(goal)?;
        match session.plan(params).await? {
            PlanResult::Planned { trajectory, .. } => {
                let report = self.execute_and_wait(trajectory, None).await?;
                Ok(MoveOutcome::Executed(report))
            }
            PlanResult::Failure { reason } => Ok(MoveOutcome::PlanningFailed { reason }),
        }
    }

    /// Execute a trajectory and wait for its terminal status.
    pub async fn execute_and_wait(
        &self,
        trajectory: Trajectory,
        controllers: Option<Vec<String>>,
    ) -> Result<ExecutionReport> {
        self.executor.execute_and_wait(trajectory, controllers).await
    }

    /// Dispatch a trajectory without waiting; completion is observed on the
    /// returned handle.
    pub async fn submit_execution(
        &self,
        trajectory: Trajectory,
        controllers: Option<Vec<String>>,
    ) -> Result<ExecutionHandle> {
        self.executor.submit(trajectory, controllers).await
    }

    /// Begin streaming `device` input to `link`.
    pub async fn start_teleop(
        &self,
        device: Arc<dyn InputDevice>,
        link: &str,
        params: TeleopParams,
    ) -> Result<Uuid> {
        self.teleop.start_teleop(device, link, params).await
    }

    /// Stop the active teleoperation session; a no-op when idle.
    pub async fn stop_teleop(&self) -> Result<()> {
        self.teleop.stop_teleop().await
    }

    pub async fn teleop_active(&self) -> bool {
        self.teleop.is_active().await
    }

    pub fn current_state(&self) -> RobotState {
        self.states.latest()
    }

    pub fn state_monitor(&self) -> StateMonitor {
        self.states.clone()
    }

    pub fn model(&self) -> &RobotModel {
        &self.model
    }

    /// Service status snapshot.
    pub async fn status(&self) -> serde_json::Value {
        let state = self.states.latest();
        let teleop = self.teleop.active_session().await;
        serde_json::json!({
            "robot": self.model.robot.name,
            "dof": self.model.dof(),
            "positions": state.positions,
            "velocities": state.velocities,
            "state_sequence": state.sequence,
            "command_stream_owner": self.arbiter.current_owner().map(|o| o.to_string()),
            "teleop_session": teleop.map(|(id, link)| serde_json::json!({
                "id": id,
                "link": link,
            })),
        })
    }

    /// Stop all motion: abort the in-flight execution, end teleoperation
    /// and send a halt straight to the backend.
    pub async fn halt(&self) -> Result<()> {
        if self.executor.abort_active() {
            info!("Halt: in-flight execution flagged to abort");
        }
        self.teleop.stop_teleop().await?;
        self.backend.halt().await?;
        info!("Motion halted");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.halt().await?;
        info!("Arm service shut down");
        Ok(())
    }
}
