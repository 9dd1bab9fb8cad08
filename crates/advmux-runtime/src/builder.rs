//! Runtime Builder API
//!
//! Assembles a scheduler, its controller and the channels between them, then
//! spawns the runtime task and hands back a [`RuntimeHandle`].

use std::time::Duration;

use advmux_core::{AdvertisingManager, DefaultParametersTable, ManagerConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::controller::{Controller, SimulatedController};
use crate::error::{RuntimeError, RuntimeResult};
use crate::handle::RuntimeHandle;
use crate::runtime::AdvertisingRuntime;

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    controller: Option<Box<dyn Controller>>,
    defaults: Option<DefaultParametersTable>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_manager_config(mut self, manager: ManagerConfig) -> Self {
        self.config.manager = manager;
        self
    }

    pub fn with_controller(mut self, controller: impl Controller + 'static) -> Self {
        self.controller = Some(Box::new(controller));
        self
    }

    /// Install a default interval table before the first item is registered
    pub fn with_default_parameters(mut self, table: DefaultParametersTable) -> Self {
        self.defaults = Some(table);
        self
    }

    /// Build the runtime task without spawning it
    pub fn build(self) -> RuntimeResult<(RuntimeHandle, AdvertisingRuntime)> {
        self.config.validate()?;
        let controller = self
            .controller
            .ok_or_else(|| RuntimeError::controller("no controller attached to the runtime"))?;

        let mut manager = AdvertisingManager::new(self.config.manager.clone());
        if let Some(table) = self.defaults {
            manager.register_default_parameters(table)?;
        }

        let (sender, receiver) = mpsc::channel(self.config.command_buffer_size);
        let runtime = AdvertisingRuntime::new(
            manager,
            controller,
            receiver,
            self.config.event_buffer_size,
        );
        Ok((RuntimeHandle::new(sender), runtime))
    }

    /// Build and spawn the runtime task
    pub fn build_and_start(self) -> RuntimeResult<(RuntimeHandle, JoinHandle<RuntimeResult<()>>)> {
        info!(
            sets = self.config.manager.max_advertising_sets,
            items = self.config.manager.max_items,
            "Starting advertising runtime"
        );
        let (handle, runtime) = self.build()?;
        Ok((handle, tokio::spawn(runtime.run())))
    }
}

/// Wait for a spawned runtime task, flattening a join failure into the runtime error
pub async fn join_runtime(task: JoinHandle<RuntimeResult<()>>) -> RuntimeResult<()> {
    task.await.map_err(|err| RuntimeError::TaskJoin {
        message: err.to_string(),
    })?
}

// ----------------------------------------------------------------------------
// Convenience Functions
// ----------------------------------------------------------------------------

/// Runtime over a fast simulated controller with the testing scheduler config
pub fn create_test_runtime() -> RuntimeResult<(RuntimeHandle, SimulatedController, JoinHandle<RuntimeResult<()>>)> {
    create_test_runtime_with(ManagerConfig::testing())
}

pub fn create_test_runtime_with(
    manager: ManagerConfig,
) -> RuntimeResult<(RuntimeHandle, SimulatedController, JoinHandle<RuntimeResult<()>>)> {
    let controller = SimulatedController::new(Duration::from_millis(1));
    let (handle, task) = RuntimeBuilder::new()
        .with_config(RuntimeConfig::testing().with_manager(manager))
        .with_controller(controller.clone())
        .build_and_start()?;
    Ok((handle, controller, task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_controller() {
        let result = RuntimeBuilder::new().build();
        assert!(matches!(result, Err(RuntimeError::Controller { .. })));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = RuntimeBuilder::new()
            .with_manager_config(ManagerConfig::default().with_max_items(0))
            .with_controller(SimulatedController::default())
            .build();
        assert!(matches!(result, Err(RuntimeError::Core(_))));
    }

    #[test]
    fn test_build_rejects_empty_default_table() {
        let mut table = DefaultParametersTable::standard();
        table.presets.clear();
        let result = RuntimeBuilder::new()
            .with_controller(SimulatedController::default())
            .with_default_parameters(table)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let (handle, _controller, task) = create_test_runtime().unwrap();
        assert!(handle.is_running());
        handle.shutdown().await.unwrap();
        join_runtime(task).await.unwrap();
        assert!(!handle.is_running());
    }
}
