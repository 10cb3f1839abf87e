//! Event publishing abstraction
//!
//! Provides trait-based interface for publishing planning, execution and
//! mode-change events to any transport mechanism without coupling the core
//! to a specific IPC layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as epoch seconds with millisecond precision.
pub fn current_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Outcome of one planning call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub pipeline: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub planning_time_s: f64,
    pub waypoints: usize,
    pub timestamp: f64,
}

impl PlanEvent {
    pub fn succeeded(pipeline: &str, planning_time_s: f64, waypoints: usize) -> Self {
        Self {
            event_type: "plan".to_string(),
            pipeline: pipeline.to_string(),
            succeeded: true,
            reason: None,
            planning_time_s,
            waypoints,
            timestamp: current_timestamp(),
        }
    }

    pub fn failed(pipeline: &str, planning_time_s: f64, reason: &str) -> Self {
        Self {
            event_type: "plan".to_string(),
            pipeline: pipeline.to_string(),
            succeeded: false,
            reason: Some(reason.to_string()),
            planning_time_s,
            waypoints: 0,
            timestamp: current_timestamp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPhase {
    Started,
    Succeeded,
    Failed,
    Aborted,
}

/// Lifecycle event for one trajectory execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub execution_id: Uuid,
    pub phase: ExecutionPhase,
    pub waypoints_done: usize,
    pub waypoints_total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: f64,
}

impl ExecutionEvent {
    pub fn started(execution_id: Uuid, waypoints_total: usize) -> Self {
        Self::phase(execution_id, ExecutionPhase::Started, 0, waypoints_total, None)
    }

    pub fn succeeded(execution_id: Uuid, waypoints_total: usize) -> Self {
        Self::phase(
            execution_id,
            ExecutionPhase::Succeeded,
            waypoints_total,
            waypoints_total,
            None,
        )
    }

    pub fn failed(
        execution_id: Uuid,
        waypoints_done: usize,
        waypoints_total: usize,
        message: &str,
    ) -> Self {
        Self::phase(
            execution_id,
            ExecutionPhase::Failed,
            waypoints_done,
            waypoints_total,
            Some(message.to_string()),
        )
    }

    pub fn aborted(execution_id: Uuid, waypoints_done: usize, waypoints_total: usize) -> Self {
        Self::phase(
            execution_id,
            ExecutionPhase::Aborted,
            waypoints_done,
            waypoints_total,
            None,
        )
    }

    fn phase(
        execution_id: Uuid,
        phase: ExecutionPhase,
        waypoints_done: usize,
        waypoints_total: usize,
        message: Option<String>,
    ) -> Self {
        Self {
            event_type: "execution".to_string(),
            execution_id,
            phase,
            waypoints_done,
            waypoints_total,
            message,
            timestamp: current_timestamp(),
        }
    }
}

/// Command-stream mode transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub mode: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub timestamp: f64,
}

impl ModeEvent {
    pub fn teleop_started(session_id: Uuid, link: &str) -> Self {
        Self {
            event_type: "mode".to_string(),
            mode: "teleoperation".to_string(),
            active: true,
            session_id: Some(session_id),
            link: Some(link.to_string()),
            timestamp: current_timestamp(),
        }
    }

    pub fn teleop_stopped(session_id: Uuid) -> Self {
        Self {
            event_type: "mode".to_string(),
            mode: "teleoperation".to_string(),
            active: false,
            session_id: Some(session_id),
            link: None,
            timestamp: current_timestamp(),
        }
    }
}

/// Trait for publishing arm lifecycle events
///
/// This allows the core to be used with any event backend without being
/// coupled to specific transport mechanisms.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish the outcome of a planning call
    async fn publish_plan(&self, event: &PlanEvent) -> anyhow::Result<()>;

    /// Publish an execution lifecycle event
    async fn publish_execution(&self, event: &ExecutionEvent) -> anyhow::Result<()>;

    /// Publish a command-stream mode transition
    async fn publish_mode(&self, event: &ModeEvent) -> anyhow::Result<()>;
}

/// No-operation event sink
///
/// Default implementation that discards all events.
#[derive(Debug, Clone)]
pub struct NoOpSink;

#[async_trait]
impl EventSink for NoOpSink {
    async fn publish_plan(&self, _event: &PlanEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_execution(&self, _event: &ExecutionEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_mode(&self, _event: &ModeEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Console event sink for debugging
///
/// Prints all events to stdout in JSON format.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    pub pretty_print: bool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            pretty_print: false,
        }
    }

    pub fn pretty() -> Self {
        Self { pretty_print: true }
    }

    fn print(&self, tag: &str, json: serde_json::Result<String>) -> anyhow::Result<()> {
        println!("[{}] {}", tag, json?);
        Ok(())
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for ConsoleSink {
    async fn publish_plan(&self, event: &PlanEvent) -> anyhow::Result<()> {
        if self.pretty_print {
            self.print("PLAN", serde_json::to_string_pretty(event))
        } else {
            self.print("PLAN", serde_json::to_string(event))
        }
    }

    async fn publish_execution(&self, event: &ExecutionEvent) -> anyhow::Result<()> {
        if self.pretty_print {
            self.print("EXEC", serde_json::to_string_pretty(event))
        } else {
            self.print("EXEC", serde_json::to_string(event))
        }
    }

    async fn publish_mode(&self, event: &ModeEvent) -> anyhow::Result<()> {
        if self.pretty_print {
            self.print("MODE", serde_json::to_string_pretty(event))
        } else {
            self.print("MODE", serde_json::to_string(event))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_event_serializes_with_type_tag() {
        let event = PlanEvent::succeeded("default", 0.004, 42);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "plan");
        assert_eq!(json["succeeded"], true);
        assert_eq!(json["waypoints"], 42);
        // Reason is omitted on success
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn failed_plan_carries_reason() {
        let event = PlanEvent::failed("careful", 0.002, "goal outside joint limits");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["succeeded"], false);
        assert_eq!(json["reason"], "goal outside joint limits");
    }

    #[test]
    fn execution_phases_serialize_lowercase() {
        let id = Uuid::new_v4();
        let event = ExecutionEvent::failed(id, 3, 10, "actuation fault");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "failed");
        assert_eq!(json["waypoints_done"], 3);
        assert_eq!(json["waypoints_total"], 10);
        assert_eq!(json["execution_id"], id.to_string());
    }

    #[test]
    fn mode_event_marks_teleop_lifecycle() {
        let id = Uuid::new_v4();
        let start = ModeEvent::teleop_started(id, "tool0");
        assert!(start.active);
        assert_eq!(start.link.as_deref(), Some("tool0"));
        let stop = ModeEvent::teleop_stopped(id);
        assert!(!stop.active);
        assert_eq!(stop.session_id, Some(id));
    }

    #[tokio::test]
    async fn noop_sink_accepts_everything() {
        let sink = NoOpSink;
        let id = Uuid::new_v4();
        sink.publish_plan(&PlanEvent::succeeded("default", 0.0, 1))
            .await
            .unwrap();
        sink.publish_execution(&ExecutionEvent::started(id, 5))
            .await
            .unwrap();
        sink.publish_mode(&ModeEvent::teleop_stopped(id))
            .await
            .unwrap();
    }
}
