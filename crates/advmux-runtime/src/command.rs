//! Requests sent from a [`RuntimeHandle`](crate::RuntimeHandle) to the runtime task

use advmux_core::{
    AdvertisingItem, ContractError, DefaultParametersTable, DiagnosticsSnapshot, ItemHandle,
    SetLayout,
};
use tokio::sync::oneshot;

/// One request to the scheduler task, with the channel its answer goes back on
#[derive(Debug)]
pub enum Command {
    RegisterItem {
        item: Box<dyn AdvertisingItem>,
        reply: oneshot::Sender<Option<ItemHandle>>,
    },
    RegisterGapFlags {
        item: Box<dyn AdvertisingItem>,
        reply: oneshot::Sender<Option<ItemHandle>>,
    },
    UpdateItem {
        handle: ItemHandle,
        reply: oneshot::Sender<bool>,
    },
    UnregisterItem {
        handle: ItemHandle,
        reply: oneshot::Sender<bool>,
    },
    /// Answered once the queued state update has fully settled
    Refresh {
        reply: oneshot::Sender<()>,
    },
    AllowAdvertising {
        allowed: bool,
    },
    EnableConnectable {
        allowed: bool,
    },
    RefreshDirected,
    RegisterDefaults {
        table: DefaultParametersTable,
        reply: oneshot::Sender<Result<(), ContractError>>,
    },
    SelectPreset {
        index: usize,
        reply: oneshot::Sender<bool>,
    },
    Diagnostics {
        reply: oneshot::Sender<DiagnosticsSnapshot>,
    },
    Layouts {
        reply: oneshot::Sender<Vec<SetLayout>>,
    },
    DisableSet {
        id: u8,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterItem { .. } => "register_item",
            Self::RegisterGapFlags { .. } => "register_gap_flags",
            Self::UpdateItem { .. } => "update_item",
            Self::UnregisterItem { .. } => "unregister_item",
            Self::Refresh { .. } => "refresh",
            Self::AllowAdvertising { .. } => "allow_advertising",
            Self::EnableConnectable { .. } => "enable_connectable",
            Self::RefreshDirected => "refresh_directed",
            Self::RegisterDefaults { .. } => "register_defaults",
            Self::SelectPreset { .. } => "select_preset",
            Self::Diagnostics { .. } => "diagnostics",
            Self::Layouts { .. } => "layouts",
            Self::DisableSet { .. } => "disable_set",
            Self::Shutdown => "shutdown",
        }
    }
}
