//! Controller-facing message types
//!
//! The core never performs IO. It emits [`Effect`]s and consumes
//! [`ControllerEvent`]s; the runtime carries both over its channels.

pub mod communication;

pub use communication::{
    ControllerCommand, ControllerEvent, Effect, HciStatus, SetParams, TimerId,
};
