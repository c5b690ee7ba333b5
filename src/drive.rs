use std::fmt;
use std::ops::RangeInclusive;

use thiserror::Error;

/// Duty cycles outside this range are never sent nor applied.
pub const DUTY_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// Duty cycles (percent) requested for the two wheels on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveCommand {
    pub left: f64,
    pub right: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("expected 2 comma separated fields, got {0}")]
    FieldCount(usize),
    #[error("field {index} ({value:?}) is not a finite number")]
    NotNumeric { index: usize, value: String },
    #[error("field {index} ({value}) is outside 0..=100")]
    OutOfRange { index: usize, value: f64 },
}

impl DriveCommand {
    pub fn new(left: f64, right: f64) -> Self {
        DriveCommand { left, right }
    }

    /// Same duty on both wheels, used for rotation, neutral and idle.
    pub fn uniform(duty: f64) -> Self {
        DriveCommand { left: duty, right: duty }
    }

    /// Canonical wire form: `"<left>,<right>"`.
    pub fn to_payload(&self) -> String {
        format!("{},{}", self.left, self.right)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
        let fields: Vec<&str> = text.split(',').collect();
        if fields.len() != 2 {
            return Err(PayloadError::FieldCount(fields.len()));
        }

        let mut values = [0.0f64; 2];
        for (index, field) in fields.iter().enumerate() {
            values[index] = field
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| PayloadError::NotNumeric {
                    index,
                    value: field.to_string(),
                })?;
            if !DUTY_RANGE.contains(&values[index]) {
                return Err(PayloadError::OutOfRange {
                    index,
                    value: values[index],
                });
            }
        }

        Ok(DriveCommand::new(values[0], values[1]))
    }
}

impl fmt::Display for DriveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "left {} right {}", self.left, self.right)
    }
}
