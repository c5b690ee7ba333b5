//! Axis state to drive command mapping.
//!
//! The mapping is an ordered rule table evaluated top to bottom, first match
//! wins. When no rule matches the idle command is produced, so every tick
//! yields a command.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use teleop::DriveCommand;

use crate::config::{ConfigError, ServoProfile};

/// Latest normalized value of every axis the device has reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisState {
    values: BTreeMap<u8, f64>,
}

impl AxisState {
    pub fn set(&mut self, axis: u8, value: f64) {
        self.values.insert(axis, value);
    }

    pub fn get(&self, axis: u8) -> Option<f64> {
        self.values.get(&axis).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Deflection {
    Negative,
    Rest,
    Positive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisMatch {
    Any,
    Rest,
    Positive,
    Negative,
}

impl AxisMatch {
    fn matches(&self, deflection: Option<Deflection>) -> bool {
        match self {
            AxisMatch::Any => true,
            AxisMatch::Rest => deflection == Some(Deflection::Rest),
            AxisMatch::Positive => deflection == Some(Deflection::Positive),
            AxisMatch::Negative => deflection == Some(Deflection::Negative),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveAction {
    Neutral,
    RotatePositive,
    RotateNegative,
    Forward,
    Reverse,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub lateral: AxisMatch,
    pub forward: AxisMatch,
    pub action: DriveAction,
}

impl MappingRule {
    const fn new(lateral: AxisMatch, forward: AxisMatch, action: DriveAction) -> Self {
        MappingRule { lateral, forward, action }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub lateral_axis: u8,
    pub forward_axis: u8,
    pub invert_forward: bool,
    pub rest_threshold: f64,
    pub deflection_threshold: f64,
    pub rules: Vec<MappingRule>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        use AxisMatch::*;
        MappingConfig {
            lateral_axis: 0,
            forward_axis: 1,
            invert_forward: false,
            rest_threshold: 0.5,
            deflection_threshold: 0.5,
            rules: vec![
                MappingRule::new(Rest, Rest, DriveAction::Neutral),
                MappingRule::new(Positive, Any, DriveAction::RotatePositive),
                MappingRule::new(Negative, Any, DriveAction::RotateNegative),
                MappingRule::new(Any, Positive, DriveAction::Forward),
                MappingRule::new(Any, Negative, DriveAction::Reverse),
            ],
        }
    }
}

impl MappingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_range = |v: f64| (0.0..1.0).contains(&v);
        if !in_range(self.rest_threshold) || !in_range(self.deflection_threshold) {
            return Err(ConfigError::Invalid("axis thresholds must lie in [0, 1)".into()));
        }
        if self.rest_threshold > self.deflection_threshold {
            return Err(ConfigError::Invalid(format!(
                "rest threshold {} exceeds deflection threshold {}",
                self.rest_threshold, self.deflection_threshold
            )));
        }
        if self.lateral_axis == self.forward_axis {
            return Err(ConfigError::Invalid("lateral and forward axis must differ".into()));
        }
        Ok(())
    }

    /// `None` for an axis never reported or deflected only part way. A value
    /// exactly on a threshold counts as the lesser state, so ±0.5 is at rest.
    pub fn classify(&self, value: Option<f64>) -> Option<Deflection> {
        let value = value?;
        if value.abs() <= self.rest_threshold {
            Some(Deflection::Rest)
        } else if value > self.deflection_threshold {
            Some(Deflection::Positive)
        } else if value < -self.deflection_threshold {
            Some(Deflection::Negative)
        } else {
            None
        }
    }
}

/// Duty values that do not come from a servo envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrivePresets {
    pub neutral: f64,
    pub idle: f64,
    pub rotate_positive: f64,
    pub rotate_negative: f64,
}

pub struct DriveMapping {
    config: MappingConfig,
    presets: DrivePresets,
}

impl DriveMapping {
    pub fn new(config: MappingConfig, presets: DrivePresets) -> Self {
        DriveMapping { config, presets }
    }

    pub fn action(&self, axes: &AxisState) -> DriveAction {
        let lateral = self.config.classify(axes.get(self.config.lateral_axis));
        let forward = self
            .config
            .classify(axes.get(self.config.forward_axis).map(|v| {
                if self.config.invert_forward { -v } else { v }
            }));

        self.config
            .rules
            .iter()
            .find(|rule| rule.lateral.matches(lateral) && rule.forward.matches(forward))
            .map(|rule| rule.action)
            .unwrap_or(DriveAction::Idle)
    }

    pub fn command(&self, axes: &AxisState, left: &ServoProfile, right: &ServoProfile) -> DriveCommand {
        match self.action(axes) {
            DriveAction::Neutral => DriveCommand::uniform(self.presets.neutral),
            DriveAction::RotatePositive => DriveCommand::uniform(self.presets.rotate_positive),
            DriveAction::RotateNegative => DriveCommand::uniform(self.presets.rotate_negative),
            DriveAction::Forward => DriveCommand::new(left.duty_cycle_max, right.duty_cycle_min),
            DriveAction::Reverse => DriveCommand::new(left.duty_cycle_min, right.duty_cycle_max),
            DriveAction::Idle => DriveCommand::uniform(self.presets.idle),
        }
    }

    pub fn neutral(&self) -> DriveCommand {
        DriveCommand::uniform(self.presets.neutral)
    }
}
