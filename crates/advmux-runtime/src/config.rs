//! Runtime Configuration

use advmux_core::ManagerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

/// Channel sizing for the runtime task plus the scheduler it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of the client command channel
    pub command_buffer_size: usize,
    /// Capacity of the controller event channel
    pub event_buffer_size: usize,
    pub manager: ManagerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 64,
            event_buffer_size: 256,
            manager: ManagerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 16,
            event_buffer_size: 64,
            manager: ManagerConfig::testing(),
        }
    }

    pub fn with_manager(mut self, manager: ManagerConfig) -> Self {
        self.manager = manager;
        self
    }

    pub fn with_command_buffer_size(mut self, size: usize) -> Self {
        self.command_buffer_size = size;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        if self.command_buffer_size == 0 || self.event_buffer_size == 0 {
            return Err(RuntimeError::Configuration {
                reason: "channel buffers must be non-zero".to_string(),
            });
        }
        self.manager.validate()?;
        Ok(())
    }
}
