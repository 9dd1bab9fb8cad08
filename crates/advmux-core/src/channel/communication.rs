//! Controller Communication Types
//!
//! The vocabulary spoken between the scheduler and the radio controller, plus
//! the effects the scheduler asks its host to perform. Every command is fire
//! and forget; its outcome arrives later as a [`ControllerEvent`] carrying the
//! same handle.

use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_millis;
use crate::item::{AdvType, ItemParams};
use crate::payload::SegmentedPayload;
use crate::types::{AdvHandle, BdAddr, LocalAddressKind};

// ----------------------------------------------------------------------------
// Status Codes
// ----------------------------------------------------------------------------

/// Status carried by every controller confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HciStatus {
    Success,
    ControllerBusy,
    Other(u8),
}

impl HciStatus {
    pub const CONTROLLER_BUSY_CODE: u8 = 0x3A;

    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Success,
            Self::CONTROLLER_BUSY_CODE => Self::ControllerBusy,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::ControllerBusy => Self::CONTROLLER_BUSY_CODE,
            Self::Other(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for HciStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.code())
    }
}

// ----------------------------------------------------------------------------
// Controller Commands
// ----------------------------------------------------------------------------

/// Parameters applied to one hardware advertising set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetParams {
    pub adv_type: AdvType,
    pub params: ItemParams,
}

/// Commands issued to the radio controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerCommand {
    Register {
        handle: AdvHandle,
    },
    Unregister {
        handle: AdvHandle,
    },
    SetParams {
        handle: AdvHandle,
        params: SetParams,
    },
    SetRandomAddress {
        handle: AdvHandle,
        kind: LocalAddressKind,
        address: BdAddr,
    },
    SetAdvertisingData {
        handle: AdvHandle,
        payload: SegmentedPayload,
    },
    SetScanResponseData {
        handle: AdvHandle,
        payload: SegmentedPayload,
    },
    Enable {
        handle: AdvHandle,
        enable: bool,
    },
}

impl ControllerCommand {
    pub fn handle(&self) -> AdvHandle {
        match self {
            Self::Register { handle }
            | Self::Unregister { handle }
            | Self::SetParams { handle, .. }
            | Self::SetRandomAddress { handle, .. }
            | Self::SetAdvertisingData { handle, .. }
            | Self::SetScanResponseData { handle, .. }
            | Self::Enable { handle, .. } => *handle,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "Register",
            Self::Unregister { .. } => "Unregister",
            Self::SetParams { .. } => "SetParams",
            Self::SetRandomAddress { .. } => "SetRandomAddress",
            Self::SetAdvertisingData { .. } => "SetAdvertisingData",
            Self::SetScanResponseData { .. } => "SetScanResponseData",
            Self::Enable { enable: true, .. } => "Enable",
            Self::Enable { enable: false, .. } => "Disable",
        }
    }
}

// ----------------------------------------------------------------------------
// Controller Events
// ----------------------------------------------------------------------------

/// Confirmations and indications delivered by the radio controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerEvent {
    RegisterCfm {
        handle: AdvHandle,
        status: HciStatus,
    },
    SetParamsCfm {
        handle: AdvHandle,
        status: HciStatus,
    },
    SetRandomAddressCfm {
        handle: AdvHandle,
        status: HciStatus,
        address: BdAddr,
    },
    SetDataCfm {
        handle: AdvHandle,
        status: HciStatus,
    },
    SetScanResponseDataCfm {
        handle: AdvHandle,
        status: HciStatus,
    },
    EnableCfm {
        handle: AdvHandle,
        status: HciStatus,
    },
    /// The controller stopped an active set on its own
    Terminated {
        handle: AdvHandle,
        reason: u8,
    },
    UnregisterCfm {
        handle: AdvHandle,
        status: HciStatus,
    },
}

impl ControllerEvent {
    pub fn handle(&self) -> AdvHandle {
        match self {
            Self::RegisterCfm { handle, .. }
            | Self::SetParamsCfm { handle, .. }
            | Self::SetRandomAddressCfm { handle, .. }
            | Self::SetDataCfm { handle, .. }
            | Self::SetScanResponseDataCfm { handle, .. }
            | Self::EnableCfm { handle, .. }
            | Self::Terminated { handle, .. }
            | Self::UnregisterCfm { handle, .. } => *handle,
        }
    }

    /// Successful confirmation answering `command`
    pub fn success_for(command: &ControllerCommand, resolved_address: BdAddr) -> Self {
        Self::answering(command, HciStatus::Success, resolved_address)
    }

    /// Confirmation with the given status answering `command`
    pub fn answering(command: &ControllerCommand, status: HciStatus, resolved_address: BdAddr) -> Self {
        let handle = command.handle();
        match command {
            ControllerCommand::Register { .. } => Self::RegisterCfm { handle, status },
            ControllerCommand::Unregister { .. } => Self::UnregisterCfm { handle, status },
            ControllerCommand::SetParams { .. } => Self::SetParamsCfm { handle, status },
            ControllerCommand::SetRandomAddress { address, .. } => Self::SetRandomAddressCfm {
                handle,
                status,
                address: if address.is_zero() {
                    resolved_address
                } else {
                    *address
                },
            },
            ControllerCommand::SetAdvertisingData { .. } => Self::SetDataCfm { handle, status },
            ControllerCommand::SetScanResponseData { .. } => {
                Self::SetScanResponseDataCfm { handle, status }
            }
            ControllerCommand::Enable { .. } => Self::EnableCfm { handle, status },
        }
    }
}

// ----------------------------------------------------------------------------
// Effects
// ----------------------------------------------------------------------------

/// Deferred work the scheduler can ask its host to time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerId {
    /// Random address rotation for one hardware set
    AddressRotation(AdvHandle),
    /// Check whether a held refresh can be released
    RefreshRecheck,
    /// Fall back to the slow default interval preset
    DefaultsFallback,
}

/// Side effects produced by the scheduler, executed by its host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Controller(ControllerCommand),
    /// Start `timer`, replacing it if it is already running
    StartTimer {
        timer: TimerId,
        #[serde(with = "duration_millis")]
        after: Duration,
    },
    CancelTimer {
        timer: TimerId,
    },
}
