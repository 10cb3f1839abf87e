//! Robot model bundle loading and lookup
//!
//! The model bundle is produced offline (from URDF/SRDF-style tooling) and
//! consumed here as a single YAML document: joints with limits, named links,
//! joint-space presets, controller names and planning pipeline settings.

use crate::{ArmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RobotModel {
    pub robot: RobotConfig,
    pub controllers: Vec<ControllerConfig>,
    pub pipelines: Vec<PipelineConfig>,
    pub teleop: Option<TeleopConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RobotConfig {
    pub name: String,
    pub joints: Vec<JointConfig>,
    pub links: Vec<String>,
    pub presets: HashMap<String, Vec<f64>>,
    pub start_tolerance: Option<f64>,
    pub goal_tolerance: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JointConfig {
    pub name: String,
    pub min_position: f64,
    pub max_position: f64,
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    pub name: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub name: String,
    pub velocity_scaling: Option<f64>,
    pub acceleration_scaling: Option<f64>,
    pub waypoint_resolution: Option<f64>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TeleopConfig {
    pub command_rate_hz: Option<u32>,
    pub max_linear_speed: Option<f64>,
    pub max_angular_speed: Option<f64>,
}

impl RobotModel {
    pub fn load_from_path(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ArmError::Config(format!("Failed to read {}: {}", path, e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let model: RobotModel = serde_yaml::from_str(contents)?;
        model.validate()?;
        Ok(model)
    }

    /// Sanity checks on the bundle before anything trusts it.
    pub fn validate(&self) -> Result<()> {
        if self.robot.joints.is_empty() {
            return Err(ArmError::Config("model declares no joints".to_string()));
        }
        for joint in &self.robot.joints {
            if joint.min_position >= joint.max_position {
                return Err(ArmError::Config(format!(
                    "joint '{}' has empty position range [{}, {}]",
                    joint.name, joint.min_position, joint.max_position
                )));
            }
            if joint.max_velocity <= 0.0 || joint.max_acceleration <= 0.0 {
                return Err(ArmError::Config(format!(
                    "joint '{}' needs positive velocity and acceleration limits",
                    joint.name
                )));
            }
        }
        let dof = self.dof();
        for (name, positions) in &self.robot.presets {
            if positions.len() != dof {
                return Err(ArmError::Config(format!(
                    "preset '{}' has {} values, model has {} joints",
                    name,
                    positions.len(),
                    dof
                )));
            }
            if let Some(violation) = self.position_violation(positions) {
                return Err(ArmError::Config(format!(
                    "preset '{}' violates joint limits: {}",
                    name, violation
                )));
            }
        }
        if self.pipelines.is_empty() {
            return Err(ArmError::Config(
                "model declares no planning pipelines".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dof(&self) -> usize {
        self.robot.joints.len()
    }

    pub fn preset(&self, name: &str) -> Result<&[f64]> {
        self.robot
            .presets
            .get(name)
            .map(|p| p.as_slice())
            .ok_or_else(|| ArmError::Config(format!("unknown preset state '{}'", name)))
    }

    pub fn ensure_link(&self, name: &str) -> Result<()> {
        if self.robot.links.iter().any(|l| l == name) {
            Ok(())
        } else {
            Err(ArmError::Config(format!("unknown link '{}'", name)))
        }
    }

    pub fn pipeline(&self, name: &str) -> Result<&PipelineConfig> {
        self.pipelines
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ArmError::Config(format!("unknown planning pipeline '{}'", name)))
    }

    /// First pipeline flagged as default, else the first declared one.
    pub fn default_pipeline(&self) -> Result<&PipelineConfig> {
        self.pipelines
            .iter()
            .find(|p| p.default)
            .or_else(|| self.pipelines.first())
            .ok_or_else(|| ArmError::Config("model declares no planning pipelines".to_string()))
    }

    /// Controllers flagged as default, else every declared controller.
    pub fn default_controllers(&self) -> Vec<String> {
        let defaults: Vec<String> = self
            .controllers
            .iter()
            .filter(|c| c.default)
            .map(|c| c.name.clone())
            .collect();
        if defaults.is_empty() {
            self.controllers.iter().map(|c| c.name.clone()).collect()
        } else {
            defaults
        }
    }

    pub fn ensure_controllers(&self, names: &[String]) -> Result<()> {
        for name in names {
            if !self.controllers.iter().any(|c| &c.name == name) {
                return Err(ArmError::Config(format!("unknown controller '{}'", name)));
            }
        }
        Ok(())
    }

    /// First joint-limit violation in `positions`, if any.
    pub fn position_violation(&self, positions: &[f64]) -> Option<String> {
        for (joint, &q) in self.robot.joints.iter().zip(positions.iter()) {
            if q < joint.min_position || q > joint.max_position {
                return Some(format!(
                    "joint '{}' target {:.4} outside [{:.4}, {:.4}]",
                    joint.name, q, joint.min_position, joint.max_position
                ));
            }
        }
        None
    }

    pub fn max_velocities(&self) -> Vec<f64> {
        self.robot.joints.iter().map(|j| j.max_velocity).collect()
    }

    pub fn max_accelerations(&self) -> Vec<f64> {
        self.robot
            .joints
            .iter()
            .map(|j| j.max_acceleration)
            .collect()
    }

    /// Teleoperation settings with defaults filled in.
    pub fn teleop(&self) -> TeleopConfig {
        self.teleop.clone().unwrap_or_default()
    }
}

impl RobotConfig {
    /// Tolerance for matching a planned start state against the measured
    /// state, radians per joint.
    pub fn start_tolerance(&self) -> f64 {
        self.start_tolerance.unwrap_or(0.01)
    }

    /// Tolerance for declaring a goal reached, radians per joint.
    pub fn goal_tolerance(&self) -> f64 {
        self.goal_tolerance.unwrap_or(0.01)
    }
}

impl PipelineConfig {
    /// Get velocity scaling with default fallback
    pub fn velocity_scaling(&self) -> f64 {
        self.velocity_scaling.unwrap_or(1.0)
    }

    /// Get acceleration scaling with default fallback
    pub fn acceleration_scaling(&self) -> f64 {
        self.acceleration_scaling.unwrap_or(1.0)
    }

    /// Get joint-space waypoint spacing with default fallback
    pub fn waypoint_resolution(&self) -> f64 {
        self.waypoint_resolution.unwrap_or(0.05)
    }
}

impl TeleopConfig {
    /// Get command rate with default fallback
    pub fn command_rate_hz(&self) -> u32 {
        self.command_rate_hz.unwrap_or(50)
    }

    /// Get linear speed cap with default fallback
    pub fn max_linear_speed(&self) -> f64 {
        self.max_linear_speed.unwrap_or(0.25)
    }

    /// Get angular speed cap with default fallback
    pub fn max_angular_speed(&self) -> f64 {
        self.max_angular_speed.unwrap_or(0.5)
    }
}

/// Six-axis model used across unit tests.
#[cfg(test)]
pub(crate) fn sample_model() -> RobotModel {
    let joints = (0..6)
        .map(|i| JointConfig {
            name: format!("joint_{}", i),
            min_position: -3.0,
            max_position: 3.0,
            max_velocity: 1.5,
            max_acceleration: 3.0,
        })
        .collect();
    let mut presets = HashMap::new();
    presets.insert("home".to_string(), vec![0.0; 6]);
    presets.insert("ready".to_string(), vec![0.5, -0.5, 0.5, 0.0, 0.5, 0.0]);
    RobotModel {
        robot: RobotConfig {
            name: "sim-arm".to_string(),
            joints,
            links: vec!["base".to_string(), "tool0".to_string()],
            presets,
            start_tolerance: Some(0.01),
            goal_tolerance: Some(0.01),
        },
        controllers: vec![
            ControllerConfig {
                name: "arm_controller".to_string(),
                default: true,
            },
            ControllerConfig {
                name: "gripper_controller".to_string(),
                default: false,
            },
        ],
        pipelines: vec![
            PipelineConfig {
                name: "default".to_string(),
                velocity_scaling: Some(1.0),
                acceleration_scaling: Some(1.0),
                waypoint_resolution: Some(0.05),
                default: true,
            },
            PipelineConfig {
                name: "careful".to_string(),
                velocity_scaling: Some(0.2),
                acceleration_scaling: Some(0.2),
                waypoint_resolution: Some(0.02),
                default: false,
            },
        ],
        teleop: Some(TeleopConfig {
            command_rate_hz: Some(200),
            max_linear_speed: Some(0.25),
            max_angular_speed: Some(0.5),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
robot:
  name: sim-arm
  joints:
    - { name: j0, min_position: -3.14, max_position: 3.14, max_velocity: 1.5, max_acceleration: 3.0 }
    - { name: j1, min_position: -3.14, max_position: 3.14, max_velocity: 1.5, max_acceleration: 3.0 }
  links: [base, tool0]
  presets:
    home: [0.0, 0.0]
controllers:
  - { name: arm_controller, default: true }
pipelines:
  - { name: default, default: true }
  - { name: careful, velocity_scaling: 0.2, acceleration_scaling: 0.2, waypoint_resolution: 0.02 }
teleop:
  command_rate_hz: 100
"#;

    #[test]
    fn loads_model_from_yaml() {
        let model = RobotModel::load_from_str(SAMPLE_YAML).unwrap();
        assert_eq!(model.dof(), 2);
        assert_eq!(model.robot.name, "sim-arm");
        assert_eq!(model.preset("home").unwrap(), &[0.0, 0.0]);
        assert_eq!(model.default_pipeline().unwrap().name, "default");
        assert_eq!(model.teleop().command_rate_hz(), 100);
    }

    #[test]
    fn pipeline_defaults_fill_missing_fields() {
        let model = RobotModel::load_from_str(SAMPLE_YAML).unwrap();
        let default = model.pipeline("default").unwrap();
        assert_eq!(default.velocity_scaling(), 1.0);
        assert_eq!(default.waypoint_resolution(), 0.05);
        let careful = model.pipeline("careful").unwrap();
        assert_eq!(careful.velocity_scaling(), 0.2);
        assert_eq!(careful.waypoint_resolution(), 0.02);
    }

    #[test]
    fn teleop_defaults_when_section_missing() {
        let mut model = RobotModel::load_from_str(SAMPLE_YAML).unwrap();
        model.teleop = None;
        let teleop = model.teleop();
        assert_eq!(teleop.command_rate_hz(), 50);
        assert_eq!(teleop.max_linear_speed(), 0.25);
    }

    #[test]
    fn rejects_preset_with_wrong_dof() {
        let model = sample_model();
        let mut broken = model.clone();
        broken
            .robot
            .presets
            .insert("bad".to_string(), vec![0.0, 0.0]);
        let err = broken.validate().unwrap_err();
        assert!(matches!(err, ArmError::Config(_)));
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn rejects_preset_outside_limits() {
        let mut model = sample_model();
        model
            .robot
            .presets
            .insert("far".to_string(), vec![9.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(model.validate().is_err());
    }

    #[test]
    fn rejects_nonpositive_limits() {
        let mut model = sample_model();
        model.robot.joints[2].max_velocity = 0.0;
        assert!(model.validate().is_err());
    }

    #[test]
    fn unknown_lookups_are_config_errors() {
        let model = sample_model();
        assert!(matches!(
            model.preset("nope"),
            Err(ArmError::Config(_))
        ));
        assert!(matches!(
            model.ensure_link("elbow"),
            Err(ArmError::Config(_))
        ));
        assert!(matches!(
            model.pipeline("warp"),
            Err(ArmError::Config(_))
        ));
        assert!(matches!(
            model.ensure_controllers(&["leg_controller".to_string()]),
            Err(ArmError::Config(_))
        ));
    }

    #[test]
    fn default_controllers_fall_back_to_all() {
        let mut model = sample_model();
        assert_eq!(model.default_controllers(), vec!["arm_controller"]);
        for c in &mut model.controllers {
            c.default = false;
        }
        assert_eq!(
            model.default_controllers(),
            vec!["arm_controller", "gripper_controller"]
        );
    }

    #[test]
    fn position_violation_names_the_joint() {
        let model = sample_model();
        let violation = model
            .position_violation(&[0.0, 4.0, 0.0, 0.0, 0.0, 0.0])
            .unwrap();
        assert!(violation.contains("joint_1"));
        assert!(model.position_violation(&[0.0; 6]).is_none());
    }
}
