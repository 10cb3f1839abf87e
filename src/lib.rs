//! ARMD Core - IPC-agnostic manipulator motion control library
//!
//! This library provides pure motion planning, execution and teleoperation
//! functionality without any transport or IPC dependencies. It can be
//! embedded in applications using any communication framework (gRPC, HTTP,
//! Zenoh, MQTT, etc.).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use armd::{ArmService, AxisAlignedKinematics, ConsoleSink, Goal, PlanningParams, RobotModel, SimBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load the robot model and wire up a simulated actuation backend
//!     let model = RobotModel::load_from_path("config/default_config.yaml")?;
//!     let dof = model.dof();
//!     let service = ArmService::new(
//!         model,
//!         Arc::new(AxisAlignedKinematics::new(dof)),
//!         Arc::new(SimBackend::new(dof)),
//!     )?
//!     .with_event_sink(Arc::new(ConsoleSink::new()));
//!
//!     // Plan and execute a motion to a named preset
//!     let outcome = service
//!         .move_to(Goal::Named("home".to_string()), PlanningParams::Default)
//!         .await?;
//!     println!("Motion succeeded: {}", outcome.succeeded());
//!
//!     // Get service status
//!     let status = service.status().await;
//!     println!("Arm status: {}", status);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **ArmService**: High-level facade bundling planning, execution and teleoperation
//! - **PlanningSession**: Start/goal resolution and time-parameterized trajectory planning
//! - **ExecutionController**: Trajectory dispatch with live progress reporting
//! - **TeleopArbiter**: Streamed velocity control driven by an input device
//! - **CommandStreamArbiter**: Exclusive ownership of the robot command stream
//! - **ActuationBackend**: Transport-agnostic actuation and state feedback interface
//! - **EventSink**: Transport-agnostic event publishing interface

pub mod arbiter;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod kinematics;
pub mod planner;
pub mod service;
pub mod state;
pub mod teleop;
pub mod trajectory;

// High-level exports for easy usage
pub use service::{ArmService, MoveOutcome};
pub use config::{RobotModel, RobotConfig, JointConfig, ControllerConfig, PipelineConfig, TeleopConfig};
pub use error::{ArmError, Result};
pub use planner::{Goal, PlanResult, PlanningParams, PlanningSession, PipelineParams, StartState};
pub use executor::{ExecutionHandle, ExecutionReport, ExecutionStatus};
pub use events::{ConsoleSink, EventSink, NoOpSink};
pub use state::{RobotState, StateMonitor};

// Core component exports for advanced usage
pub use arbiter::{CommandStreamArbiter, CommandStreamGuard, StreamOwner};
pub use backend::{ActuationBackend, BackendCommand, SimBackend};
pub use executor::ExecutionController;
pub use kinematics::{AxisAlignedKinematics, Kinematics};
pub use teleop::{InputDevice, InputSample, ScriptedDevice, TeleopArbiter, TeleopParams};
pub use trajectory::{time_parameterize, Trajectory, TrajectoryPoint};

// Event payload exports
pub use events::{current_timestamp, ExecutionEvent, ExecutionPhase, ModeEvent, PlanEvent};
