//! Advmux Simulator
//!
//! Library half of the `advmux-sim` binary: command-line parsing, layered
//! configuration and the simulation driver.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;

pub use app::{run_simulation, RunOptions, SimReport};
pub use config::SimConfig;
pub use error::{Result, SimError};
