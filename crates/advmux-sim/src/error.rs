//! Error handling for the simulator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] advmux_runtime::RuntimeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration loading failed: {0}")]
    Figment(#[from] figment::Error),

    #[error("Demo item {name} has invalid data: {source}")]
    ItemData {
        name: String,
        source: hex::FromHexError,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
