use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use teleop::DUTY_RANGE;
use teleop::logging::LogLevel;

use crate::mapping::MappingConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access settings file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("settings file {path:?} is malformed: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{wheel} servo envelope [{min}, {max}] is not an ordered band inside 0..=100")]
    InvalidEnvelope { wheel: Wheel, min: f64, max: f64 },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wheel {
    Left,
    Right,
}

impl fmt::Display for Wheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wheel::Left => write!(f, "left"),
            Wheel::Right => write!(f, "right"),
        }
    }
}

/// Servo envelope as written in the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoConfig {
    pub duty_cycle_max: f64,
    pub duty_cycle_min: f64,
    // Tightens the band from both sides
    #[serde(default)]
    pub gain: f64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        ServoConfig {
            duty_cycle_max: 12.0,
            duty_cycle_min: 2.5,
            gain: 4.0,
        }
    }
}

/// Usable duty band of one wheel, gain already applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoProfile {
    pub duty_cycle_max: f64,
    pub duty_cycle_min: f64,
}

// Trim results are kept to a millionth so repeated steps do not drift.
const TRIM_RESOLUTION: f64 = 1e6;

fn snap(value: f64) -> f64 {
    (value * TRIM_RESOLUTION).round() / TRIM_RESOLUTION
}

fn is_band(min: f64, max: f64) -> bool {
    DUTY_RANGE.contains(&min) && DUTY_RANGE.contains(&max) && min <= max
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trim {
    Expand,
    Shrink,
}

impl ServoProfile {
    pub fn from_config(wheel: Wheel, config: &ServoConfig) -> Result<Self, ConfigError> {
        let max = config.duty_cycle_max - config.gain;
        let min = config.duty_cycle_min + config.gain;
        if !is_band(min, max) {
            return Err(ConfigError::InvalidEnvelope { wheel, min, max });
        }
        Ok(ServoProfile {
            duty_cycle_max: max,
            duty_cycle_min: min,
        })
    }

    /// Moves both bounds by `step`. Returns false, leaving the profile
    /// untouched, when a shrink would leave min above max or an expand would
    /// leave the 0..=100 duty range.
    pub fn trim(&mut self, trim: Trim, step: f64) -> bool {
        let (min, max) = match trim {
            Trim::Expand => (self.duty_cycle_min - step, self.duty_cycle_max + step),
            Trim::Shrink => (self.duty_cycle_min + step, self.duty_cycle_max - step),
        };
        let (min, max) = (snap(min), snap(max));
        if !is_band(min, max) {
            return false;
        }
        self.duty_cycle_min = min;
        self.duty_cycle_max = max;
        true
    }
}

impl fmt::Display for ServoProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.duty_cycle_max, self.duty_cycle_min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Trigger,
    Trim(Wheel, Trim),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ButtonBindings {
    pub trigger: u8,
    pub left_expand: u8,
    pub left_shrink: u8,
    pub right_expand: u8,
    pub right_shrink: u8,
}

impl Default for ButtonBindings {
    fn default() -> Self {
        ButtonBindings {
            trigger: 3,
            left_expand: 4,
            left_shrink: 6,
            right_expand: 5,
            right_shrink: 7,
        }
    }
}

impl ButtonBindings {
    pub fn action(&self, button: u8) -> Option<ButtonAction> {
        match button {
            b if b == self.trigger => Some(ButtonAction::Trigger),
            b if b == self.left_expand => Some(ButtonAction::Trim(Wheel::Left, Trim::Expand)),
            b if b == self.left_shrink => Some(ButtonAction::Trim(Wheel::Left, Trim::Shrink)),
            b if b == self.right_expand => Some(ButtonAction::Trim(Wheel::Right, Trim::Expand)),
            b if b == self.right_shrink => Some(ButtonAction::Trim(Wheel::Right, Trim::Shrink)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub robot_name: String,
    pub hosts: Vec<String>,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub reconnect_secs: u64,
    pub joystick_index: u32,
    pub tick_ms: u64,

    pub left: ServoConfig,
    pub right: ServoConfig,
    pub left_rotate: f64,
    pub right_rotate: f64,
    pub neutral_duty: f64,
    pub idle_duty: f64,
    pub trim_step: f64,

    pub buttons: ButtonBindings,
    pub mapping: MappingConfig,
    pub log_level: LogLevel,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            robot_name: String::from("nobunaga"),
            hosts: vec![String::from("localhost")],
            port: 1883,
            keep_alive_secs: 60,
            reconnect_secs: 5,
            joystick_index: 0,
            tick_ms: 20,
            left: ServoConfig::default(),
            right: ServoConfig::default(),
            left_rotate: 7.2,
            right_rotate: 7.6,
            neutral_duty: 0.0,
            idle_duty: 0.1,
            trim_step: 0.1,
            buttons: ButtonBindings::default(),
            mapping: MappingConfig::default(),
            log_level: LogLevel::Info,
        }
    }
}

impl ControllerSettings {
    /// Reads the settings file, writing the defaults out if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let settings = ControllerSettings::default();
            settings.save(path)?;
            info!("wrote default settings to {:?}", path);
            return Ok(settings);
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file = fs::File::create(path).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        Ok(())
    }

    /// Checks everything that must hold before a device or the network is
    /// touched, and resolves the two servo profiles.
    pub fn validate(&self) -> Result<(ServoProfile, ServoProfile), ConfigError> {
        if self.robot_name.is_empty() || self.robot_name.contains(['/', '+', '#']) {
            return Err(ConfigError::Invalid(format!(
                "robot name {:?} is not a valid topic level",
                self.robot_name
            )));
        }
        if self.hosts.is_empty() {
            return Err(ConfigError::Invalid("no broker host configured".into()));
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be positive".into()));
        }
        if !(self.trim_step.is_finite() && self.trim_step > 0.0) {
            return Err(ConfigError::Invalid(format!("trim step {} must be positive", self.trim_step)));
        }
        for (name, value) in [
            ("left_rotate", self.left_rotate),
            ("right_rotate", self.right_rotate),
            ("neutral_duty", self.neutral_duty),
            ("idle_duty", self.idle_duty),
        ] {
            if !DUTY_RANGE.contains(&value) {
                return Err(ConfigError::Invalid(format!("{} {} is outside 0..=100", name, value)));
            }
        }
        self.mapping.validate()?;

        let left = ServoProfile::from_config(Wheel::Left, &self.left)?;
        let right = ServoProfile::from_config(Wheel::Right, &self.right)?;
        Ok((left, right))
    }
}
