//! Runtime error types

use advmux_core::{AdvmuxError, ContractError};

/// Failures of the runtime plumbing around the scheduler
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Scheduler error: {0}")]
    Core(#[from] AdvmuxError),

    #[error("{channel} channel closed")]
    ChannelClosed { channel: &'static str },

    #[error("Runtime task failed: {message}")]
    TaskJoin { message: String },

    #[error("Controller unavailable: {reason}")]
    Controller { reason: String },

    #[error("Invalid runtime configuration: {reason}")]
    Configuration { reason: String },
}

impl From<ContractError> for RuntimeError {
    fn from(err: ContractError) -> Self {
        Self::Core(AdvmuxError::Contract(err))
    }
}

impl RuntimeError {
    pub fn channel_closed(channel: &'static str) -> Self {
        Self::ChannelClosed { channel }
    }

    pub fn controller(reason: impl Into<String>) -> Self {
        Self::Controller {
            reason: reason.into(),
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
