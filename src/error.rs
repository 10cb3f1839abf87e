//! Error types for arm planning and execution

use crate::arbiter::StreamOwner;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArmError>;

#[derive(Error, Debug)]
pub enum ArmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stale start state: {0}")]
    StaleStartState(String),

    #[error("Start state mismatch: {0}")]
    StartStateMismatch(String),

    #[error("Command stream is held by {held_by}, refusing {requested}")]
    ModeConflict {
        held_by: StreamOwner,
        requested: StreamOwner,
    },

    #[error("Kinematics error: {0}")]
    Kinematics(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Input device error: {0}")]
    Device(String),

    #[error("Tokio task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
