//! Client handle for a running advertising runtime

use advmux_core::{
    AdvertisingItem, DefaultParametersTable, DiagnosticsSnapshot, ItemHandle, SetLayout,
};
use tokio::sync::{mpsc, oneshot};

use crate::command::Command;
use crate::error::{RuntimeError, RuntimeResult};

/// Cloneable front door to the runtime task
///
/// Every method resolves once the task has applied the request. Controller
/// traffic caused by the request continues in the background; use
/// [`RuntimeHandle::refresh`] to wait until the layout has settled.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    sender: mpsc::Sender<Command>,
}

impl RuntimeHandle {
    pub(crate) fn new(sender: mpsc::Sender<Command>) -> Self {
        Self { sender }
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn send(&self, command: Command) -> RuntimeResult<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| RuntimeError::channel_closed("runtime command"))
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> RuntimeResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply)).await?;
        response
            .await
            .map_err(|_| RuntimeError::channel_closed("runtime reply"))
    }

    // ------------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------------

    pub async fn register_item(&self, item: Box<dyn AdvertisingItem>) -> RuntimeResult<Option<ItemHandle>> {
        self.request(|reply| Command::RegisterItem { item, reply }).await
    }

    pub async fn register_gap_flags(&self, item: Box<dyn AdvertisingItem>) -> RuntimeResult<Option<ItemHandle>> {
        self.request(|reply| Command::RegisterGapFlags { item, reply }).await
    }

    pub async fn update_item(&self, handle: ItemHandle) -> RuntimeResult<bool> {
        self.request(|reply| Command::UpdateItem { handle, reply }).await
    }

    pub async fn unregister_item(&self, handle: ItemHandle) -> RuntimeResult<bool> {
        self.request(|reply| Command::UnregisterItem { handle, reply }).await
    }

    /// Queue a full state update and wait until it has settled
    pub async fn refresh(&self) -> RuntimeResult<()> {
        self.request(|reply| Command::Refresh { reply }).await
    }

    // ------------------------------------------------------------------------
    // Policy
    // ------------------------------------------------------------------------

    pub async fn allow_advertising(&self, allowed: bool) -> RuntimeResult<()> {
        self.send(Command::AllowAdvertising { allowed }).await
    }

    pub async fn enable_connectable(&self, allowed: bool) -> RuntimeResult<()> {
        self.send(Command::EnableConnectable { allowed }).await
    }

    pub async fn refresh_directed_advertising(&self) -> RuntimeResult<()> {
        self.send(Command::RefreshDirected).await
    }

    pub async fn register_default_parameters(&self, table: DefaultParametersTable) -> RuntimeResult<()> {
        self.request(|reply| Command::RegisterDefaults { table, reply })
            .await?
            .map_err(RuntimeError::from)
    }

    pub async fn select_default_preset(&self, index: usize) -> RuntimeResult<bool> {
        self.request(|reply| Command::SelectPreset { index, reply }).await
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    pub async fn diagnostics(&self) -> RuntimeResult<DiagnosticsSnapshot> {
        self.request(|reply| Command::Diagnostics { reply }).await
    }

    pub async fn set_layouts(&self) -> RuntimeResult<Vec<SetLayout>> {
        self.request(|reply| Command::Layouts { reply }).await
    }

    pub async fn disable_set(&self, id: u8) -> RuntimeResult<bool> {
        self.request(|reply| Command::DisableSet { id, reply }).await
    }

    /// Ask the runtime task to stop; pending controller traffic is abandoned
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        self.send(Command::Shutdown).await
    }
}
