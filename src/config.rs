//! Session tuning.
//!
//! Both ends must agree on `max_message_size`. The window sizes are local.

use serde::Deserialize;

use crate::error::{Result, ShellError};
use crate::protocol::{HIGH_WATER_MARK, MAX_MESSAGE_SIZE};

/// Default high-water mark for caller-facing output buffers.
pub const OUTPUT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Limits and windows shared by both session roles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest DATA payload per frame.
    pub max_message_size: usize,
    /// Unacknowledged output bytes before the executor pauses the command.
    pub high_water_mark: usize,
    /// Buffered bytes before an output stream stops accepting without backlog.
    pub output_high_water_mark: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            high_water_mark: HIGH_WATER_MARK,
            output_high_water_mark: OUTPUT_HIGH_WATER_MARK,
        }
    }
}

impl SessionConfig {
    /// Set the per-frame payload limit.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the executor's unacknowledged output window.
    pub fn with_high_water_mark(mut self, hwm: usize) -> Self {
        self.high_water_mark = hwm;
        self
    }

    /// Set the caller-facing output buffer threshold.
    pub fn with_output_high_water_mark(mut self, hwm: usize) -> Self {
        self.output_high_water_mark = hwm;
        self
    }

    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall a session.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(ShellError::InvalidRequest(
                "max_message_size must be greater than zero".to_string(),
            ));
        }
        if self.high_water_mark == 0 {
            return Err(ShellError::InvalidRequest(
                "high_water_mark must be greater than zero".to_string(),
            ));
        }
        if self.output_high_water_mark == 0 {
            return Err(ShellError::InvalidRequest(
                "output_high_water_mark must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
