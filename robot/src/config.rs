use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use teleop::logging::LogLevel;

const HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";

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
    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    Gpio,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotSettings {
    /// Falls back to the host name (`<prefix>-<name>`) when unset.
    pub robot_name: Option<String>,
    pub hosts: Vec<String>,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub reconnect_secs: u64,

    pub left_pin: u8,
    pub right_pin: u8,
    pub pwm_frequency: f64,
    pub output: OutputKind,
    pub release_on_controller_loss: bool,

    pub log_level: LogLevel,
}

impl Default for RobotSettings {
    fn default() -> Self {
        RobotSettings {
            robot_name: None,
            hosts: vec![String::from("localhost")],
            port: 1883,
            keep_alive_secs: 60,
            reconnect_secs: 5,
            left_pin: 13,
            right_pin: 12,
            pwm_frequency: 50.0,
            output: OutputKind::Gpio,
            release_on_controller_loss: true,
            log_level: LogLevel::Info,
        }
    }
}

impl RobotSettings {
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let settings = RobotSettings::default();
            let json = serde_json::to_string_pretty(&settings).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            fs::write(path, json).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
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

    /// Validates the settings and resolves the robot name.
    pub fn validate(&self) -> Result<String, ConfigError> {
        let name = match &self.robot_name {
            Some(name) => name.clone(),
            None => {
                let hostname = fs::read_to_string(HOSTNAME_PATH)
                    .map_err(|e| ConfigError::Invalid(format!("robot name unset and host name unreadable: {}", e)))?;
                robot_name_from_hostname(&hostname).ok_or_else(|| {
                    ConfigError::Invalid(format!("robot name unset and host name {:?} has no suffix", hostname.trim()))
                })?
            }
        };

        if name.is_empty() || name.contains(['/', '+', '#']) {
            return Err(ConfigError::Invalid(format!("robot name {:?} is not a valid topic level", name)));
        }
        if self.hosts.is_empty() {
            return Err(ConfigError::Invalid("no broker host configured".into()));
        }
        if self.left_pin == self.right_pin {
            return Err(ConfigError::Invalid(format!("both wheels on GPIO {}", self.left_pin)));
        }
        if !(self.pwm_frequency.is_finite() && self.pwm_frequency > 0.0) {
            return Err(ConfigError::Invalid(format!("PWM frequency {} must be positive", self.pwm_frequency)));
        }
        Ok(name)
    }
}

/// `robot-nobunaga` gives `nobunaga`.
pub fn robot_name_from_hostname(hostname: &str) -> Option<String> {
    hostname
        .trim()
        .split('-')
        .nth(1)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn robot_name_is_second_host_name_segment() {
        assert_eq!(robot_name_from_hostname("raspi-nobunaga\n"), Some("nobunaga".to_string()));
        assert_eq!(robot_name_from_hostname("raspi-nobunaga-2"), Some("nobunaga".to_string()));
        assert_eq!(robot_name_from_hostname("raspberrypi"), None);
        assert_eq!(robot_name_from_hostname("raspi-"), None);
    }

    #[test]
    fn explicit_name_wins() {
        let settings = RobotSettings {
            robot_name: Some("hideyoshi".into()),
            ..RobotSettings::default()
        };
        assert_eq!(settings.validate().unwrap(), "hideyoshi");
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let named = RobotSettings {
            robot_name: Some("hideyoshi".into()),
            ..RobotSettings::default()
        };

        let mut settings = named.clone();
        settings.right_pin = settings.left_pin;
        assert!(settings.validate().is_err());

        let mut settings = named.clone();
        settings.pwm_frequency = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = named.clone();
        settings.robot_name = Some("a/b".into());
        assert!(settings.validate().is_err());

        let mut settings = named;
        settings.hosts.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("robot.json");

        let created = RobotSettings::load_or_create(&path).unwrap();
        assert_eq!(created, RobotSettings::default());

        fs::write(&path, r#"{ "robot_name": "ieyasu", "output": "DryRun" }"#).unwrap();
        let loaded = RobotSettings::load_or_create(&path).unwrap();
        assert_eq!(loaded.robot_name.as_deref(), Some("ieyasu"));
        assert_eq!(loaded.output, OutputKind::DryRun);
        assert_eq!(loaded.left_pin, 13);
    }
}
