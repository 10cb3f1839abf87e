//! Planning sessions: start state, goal state and trajectory computation

use crate::config::{PipelineConfig, RobotModel};
use crate::events::{EventSink, PlanEvent};
use crate::kinematics::Kinematics;
use crate::state::StateMonitor;
use crate::trajectory::{time_parameterize, Trajectory};
use crate::{ArmError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Where a plan begins.
#[derive(Debug, Clone)]
pub enum StartState {
    /// Resolve against the live measured state when `plan` runs.
    Current,
    /// A named preset from the robot model. Planning fails if the robot has
    /// moved away from it.
    Preset(String),
}

/// Where a plan ends.
#[derive(Debug, Clone)]
pub enum Goal {
    /// A named preset from the robot model.
    Named(String),
    /// A Cartesian pose for a named link, solved through inverse kinematics.
    Pose { link: String, pose: [f64; 6] },
}

/// Pipeline selection for one planning attempt.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub pipeline: String,
    pub velocity_scaling: Option<f64>,
    pub acceleration_scaling: Option<f64>,
}

impl PipelineParams {
    pub fn named(pipeline: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            velocity_scaling: None,
            acceleration_scaling: None,
        }
    }
}

/// How to drive the planning attempt(s).
#[derive(Debug, Clone)]
pub enum PlanningParams {
    /// The model's default pipeline with its own settings.
    Default,
    /// One named pipeline, optionally overriding its scaling.
    Single(PipelineParams),
    /// Several pipelines; the fastest resulting trajectory wins.
    Multi(Vec<PipelineParams>),
}

/// Outcome of a planning call. Infeasibility is a result, not an error:
/// errors are reserved for invalid references and stale start states.
#[derive(Debug, Clone)]
pub enum PlanResult {
    Planned {
        trajectory: Trajectory,
        pipeline: String,
        planning_time_s: f64,
    },
    Failure {
        reason: String,
    },
}

impl PlanResult {
    pub fn succeeded(&self) -> bool {
        matches!(self, PlanResult::Planned { .. })
    }

    pub fn into_trajectory(self) -> Option<Trajectory> {
        match self {
            PlanResult::Planned { trajectory, .. } => Some(trajectory),
            PlanResult::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            PlanResult::Planned { .. } => None,
            PlanResult::Failure { reason } => Some(reason),
        }
    }
}

enum GoalResolution {
    Joints(Vec<f64>),
    Infeasible(String),
}

/// One planning conversation: set a start state, set a goal, plan.
///
/// Sessions are cheap; create one per motion request. The cancel handle can
/// be shared with a supervisor to end a long-running plan early.
pub struct PlanningSession {
    model: Arc<RobotModel>,
    kinematics: Arc<dyn Kinematics>,
    states: StateMonitor,
    events: Arc<dyn EventSink>,
    cancel: Arc<AtomicBool>,
    start: StartState,
    goal: Option<Goal>,
}

impl PlanningSession {
    pub fn new(
        model: Arc<RobotModel>,
        kinematics: Arc<dyn Kinematics>,
        states: StateMonitor,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            model,
            kinematics,
            states,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
            start: StartState::Current,
            goal: None,
        }
    }

    /// Choose the start state. Preset names are validated here; whether the
    /// robot still matches the preset is checked when `plan` runs.
    pub fn set_start_state(&mut self, start: StartState) -> Result<()> {
        if let StartState::Preset(name) = &start {
            self.model.preset(name)?;
        }
        self.start = start;
        Ok(())
    }

    /// Plan from wherever the robot is when `plan` runs.
    pub fn set_start_state_to_current_state(&mut self) {
        self.start = StartState::Current;
    }

    /// Choose the goal. Preset and link names are validated here.
    pub fn set_goal_state(&mut self, goal: Goal) -> Result<()> {
        match &goal {
            Goal::Named(name) => {
                self.model.preset(name)?;
            }
            Goal::Pose { link, .. } => {
                self.model.ensure_link(link)?;
            }
        }
        self.goal = Some(goal);
        Ok(())
    }

    /// Setting this flag ends the planning call with a cancellation failure.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Compute a time-parameterized trajectory to the goal.
    ///
    /// Unknown names and a start state the robot has left are `Err`;
    /// an unreachable or unschedulable goal is `Ok(PlanResult::Failure)`.
    pub async fn plan(&self, params: PlanningParams) -> Result<PlanResult> {
        let started = Instant::now();
        let goal = self
            .goal
            .as_ref()
            .ok_or_else(|| ArmError::Config("no goal state set".to_string()))?;
        let attempts = self.resolve_attempts(&params)?;
        let label = attempts[0].0.name.clone();

        let start = self.resolve_start()?;
        let goal_joints = match self.resolve_goal(goal, &start)? {
            GoalResolution::Joints(joints) => joints,
            GoalResolution::Infeasible(reason) => {
                return self.finish_failure(&label, started, reason).await;
            }
        };
        if let Some(violation) = self.model.position_violation(&goal_joints) {
            let reason = format!("goal violates joint limits: {}", violation);
            return self.finish_failure(&label, started, reason).await;
        }

        let mut best: Option<(Trajectory, String)> = None;
        let mut reasons = Vec::new();
        for (pipeline, overrides) in &attempts {
            if self.cancel.load(Ordering::Relaxed) {
                return self
                    .finish_failure(&label, started, "planning cancelled".to_string())
                    .await;
            }
            match self.plan_with_pipeline(pipeline, overrides, &start, &goal_joints) {
                Ok(trajectory) => {
                    let faster = best
                        .as_ref()
                        .map(|(b, _)| trajectory.total_time < b.total_time)
                        .unwrap_or(true);
                    if faster {
                        best = Some((trajectory, pipeline.name.clone()));
                    }
                }
                Err(reason) => reasons.push(format!("{}: {}", pipeline.name, reason)),
            }
        }

        let planning_time_s = started.elapsed().as_secs_f64();
        match best {
            Some((trajectory, pipeline)) => {
                info!(
                    "Planned {} waypoints ({:.2}s motion) via '{}'",
                    trajectory.len(),
                    trajectory.total_time,
                    pipeline
                );
                self.publish(PlanEvent::succeeded(&pipeline, planning_time_s, trajectory.len()))
                    .await;
                Ok(PlanResult::Planned {
                    trajectory,
                    pipeline,
                    planning_time_s,
                })
            }
            None => {
                let reason = if reasons.is_empty() {
                    "no pipeline produced a trajectory".to_string()
                } else {
                    reasons.join("; ")
                };
                self.finish_failure(&label, started, reason).await
            }
        }
    }

    fn resolve_attempts(
        &self,
        params: &PlanningParams,
    ) -> Result<Vec<(PipelineConfig, PipelineParams)>> {
        match params {
            PlanningParams::Default => {
                let pipeline = self.model.default_pipeline()?.clone();
                let overrides = PipelineParams::named(&pipeline.name);
                Ok(vec![(pipeline, overrides)])
            }
            PlanningParams::Single(p) => {
                Ok(vec![(self.model.pipeline(&p.pipeline)?.clone(), p.clone())])
            }
            PlanningParams::Multi(list) => {
                if list.is_empty() {
                    return Err(ArmError::Config(
                        "multi-pipeline planning needs at least one pipeline".to_string(),
                    ));
                }
                list.iter()
                    .map(|p| Ok((self.model.pipeline(&p.pipeline)?.clone(), p.clone())))
                    .collect()
            }
        }
    }

    fn resolve_start(&self) -> Result<Vec<f64>> {
        let live = self.states.latest();
        match &self.start {
            StartState::Current => {
                if live.positions.len() != self.model.dof() {
                    return Err(ArmError::Config(format!(
                        "measured state has {} joints, model has {}",
                        live.positions.len(),
                        self.model.dof()
                    )));
                }
                Ok(live.positions)
            }
            StartState::Preset(name) => {
                let preset = self.model.preset(name)?;
                let tolerance = self.model.robot.start_tolerance();
                if !live.close_to(preset, tolerance) {
                    return Err(ArmError::StaleStartState(format!(
                        "robot is {:.4} rad away from preset '{}' (tolerance {})",
                        live.max_deviation(preset),
                        name,
                        tolerance
                    )));
                }
                Ok(preset.to_vec())
            }
        }
    }

    fn resolve_goal(&self, goal: &Goal, start: &[f64]) -> Result<GoalResolution> {
        match goal {
            Goal::Named(name) => Ok(GoalResolution::Joints(self.model.preset(name)?.to_vec())),
            Goal::Pose { link, pose } => {
                self.model.ensure_link(link)?;
                match self.kinematics.inverse(link, pose, start) {
                    Ok(joints) => Ok(GoalResolution::Joints(joints)),
                    Err(ArmError::Kinematics(reason)) => Ok(GoalResolution::Infeasible(format!(
                        "no inverse kinematics solution for '{}': {}",
                        link, reason
                    ))),
                    Err(other) => Err(other),
                }
            }
        }
    }

    fn plan_with_pipeline(
        &self,
        pipeline: &PipelineConfig,
        overrides: &PipelineParams,
        start: &[f64],
        goal: &[f64],
    ) -> std::result::Result<Trajectory, String> {
        let velocity_scaling = overrides
            .velocity_scaling
            .unwrap_or_else(|| pipeline.velocity_scaling());
        let acceleration_scaling = overrides
            .acceleration_scaling
            .unwrap_or_else(|| pipeline.acceleration_scaling());
        if !(velocity_scaling > 0.0 && velocity_scaling <= 1.0) {
            return Err(format!(
                "velocity scaling {} outside (0, 1]",
                velocity_scaling
            ));
        }
        if !(acceleration_scaling > 0.0 && acceleration_scaling <= 1.0) {
            return Err(format!(
                "acceleration scaling {} outside (0, 1]",
                acceleration_scaling
            ));
        }
        let max_velocity: Vec<f64> = self
            .model
            .max_velocities()
            .iter()
            .map(|v| v * velocity_scaling)
            .collect();
        let max_acceleration: Vec<f64> = self
            .model
            .max_accelerations()
            .iter()
            .map(|a| a * acceleration_scaling)
            .collect();
        time_parameterize(
            start,
            goal,
            &max_velocity,
            &max_acceleration,
            pipeline.waypoint_resolution(),
        )
        .map_err(|e| e.to_string())
    }

    async fn finish_failure(
        &self,
        pipeline: &str,
        started: Instant,
        reason: String,
    ) -> Result<PlanResult> {
        let planning_time_s = started.elapsed().as_secs_f64();
        warn!("Planning failed: {}", reason);
        self.publish(PlanEvent::failed(pipeline, planning_time_s, &reason))
            .await;
        Ok(PlanResult::Failure { reason })
    }

    async fn publish(&self, event: PlanEvent) {
        if let Err(e) = self.events.publish_plan(&event).await {
            warn!("Failed to publish plan event: {}", e);
        }
    }
}
