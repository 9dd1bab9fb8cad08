//! Error types for the advertising scheduler
//!
//! Two kinds of failure exist at this layer. Contract breaches are defects in a
//! collaborator (a stale handle, destroying something still in use, a payload
//! that does not match what its owner declared) and are reported through
//! [`ContractError`]. Expected runtime conditions such as a full table or a
//! failed controller exchange never use these types; they surface as `Option`,
//! `bool` or a confirmation flag instead.

use crate::types::{AdvHandle, GroupId, ItemHandle, SetId};

// ----------------------------------------------------------------------------
// Contract Errors
// ----------------------------------------------------------------------------

/// Invariant breaches detected by the core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("Unknown or stale item handle {0}")]
    UnknownItem(ItemHandle),
    #[error("Unknown or stale group {0}")]
    UnknownGroup(GroupId),
    #[error("Unknown or stale set {0}")]
    UnknownSet(SetId),
    #[error("No state machine instance for {0}")]
    UnknownInstance(AdvHandle),
    #[error("Set {set} still holds {items} item(s) and cannot be destroyed")]
    SetNotEmpty { set: SetId, items: usize },
    #[error("Group {0} is not empty and cannot be destroyed")]
    GroupNotEmpty(GroupId),
    #[error("Instance {handle} cannot be destroyed in state {state}")]
    InstanceNotUnregistered { handle: AdvHandle, state: &'static str },
    #[error("Payload capacity {requested} exceeds the {limit} octet limit")]
    PayloadTooLarge { requested: usize, limit: usize },
    #[error("Item {item} needs {size} octets but the set only holds {capacity}")]
    ItemTooLarge {
        item: ItemHandle,
        size: usize,
        capacity: usize,
    },
    #[error("Set {set} has {free} octets free, cannot add {size}")]
    SetOverflow { set: SetId, size: usize, free: usize },
    #[error("Item {item} was packed as {expected} octets but produced {observed}")]
    ItemSizeMismatch {
        item: ItemHandle,
        expected: usize,
        observed: usize,
    },
    #[error("Invalid default parameter table: {reason}")]
    InvalidDefaults { reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Crate-level error unifying contract breaches with configuration issues
#[derive(Debug, thiserror::Error)]
pub enum AdvmuxError {
    #[error("Contract violation: {0}")]
    Contract(#[from] ContractError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl AdvmuxError {
    /// Create a configuration error
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Returns true when the error reflects a defect rather than an environmental condition
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_))
    }
}

/// Result type alias for crate operations
pub type Result<T> = core::result::Result<T, AdvmuxError>;
