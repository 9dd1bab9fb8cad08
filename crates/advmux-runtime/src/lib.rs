//! Advmux Runtime
//!
//! Tokio host for the sans-IO scheduler in `advmux-core`:
//! - `AdvertisingRuntime`: the task that owns the scheduler and executes its effects
//! - `Controller`: the seam to the radio, plus an in-memory `SimulatedController`
//! - `RuntimeBuilder` and `RuntimeHandle`: setup and the client-facing API

pub mod builder;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod handle;
mod runtime;

pub use builder::{create_test_runtime, create_test_runtime_with, join_runtime, RuntimeBuilder};
pub use command::Command;
pub use config::RuntimeConfig;
pub use controller::{Controller, SimulatedController};
pub use error::{RuntimeError, RuntimeResult};
pub use handle::RuntimeHandle;
pub use runtime::AdvertisingRuntime;

// Re-export core types for convenience
pub use advmux_core::{
    AdvertisingItem, AdvmuxError, ControllerCommand, ControllerEvent, DefaultParametersTable,
    DiagnosticsSnapshot, HciStatus, ItemHandle, ItemInfo, ItemParams, ManagerConfig, SetLayout,
};
