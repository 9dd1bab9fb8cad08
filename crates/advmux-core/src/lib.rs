//! Advmux Core
//!
//! Sans-IO core of a BLE advertising resource scheduler. Clients register
//! advertising items; the scheduler groups parameter-compatible items, packs
//! them into a bounded number of hardware advertising sets and drives each set
//! through the controller protocol with one state machine per set.
//!
//! Nothing in this crate performs IO. Controller commands and timer requests
//! come out as [`Effect`]s, and controller events and timer expiries go back
//! in through the [`AdvertisingManager`].

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod aggregator;
pub mod arena;
pub mod channel;
pub mod config;
pub mod defaults;
pub mod diagnostics;
pub mod errors;
pub mod gate;
pub mod group;
pub mod item;
pub mod payload;
pub mod registry;
pub mod set;
pub mod set_sm;
pub mod types;
pub mod wire;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use aggregator::{AdvertisingManager, RefreshCallback, RefreshRequest, SetLayout};
pub use channel::{ControllerCommand, ControllerEvent, Effect, HciStatus, SetParams, TimerId};
pub use config::ManagerConfig;
pub use defaults::{DefaultParameterPolicy, DefaultParametersTable, IntervalPreset};
pub use diagnostics::{DiagnosticsSnapshot, SetDiagnostics, UNKNOWN_EVENT_TYPE};
pub use errors::{AdvmuxError, ContractError, Result};
pub use group::AdmissionPolicy;
pub use item::{
    AdvType, AdvertisingEvent, AdvertisingItem, FilterPolicy, IntervalRange, ItemInfo, ItemParams,
    ParamsSource, Phy, Placement, RotationTimeout, EXTENDED_DATA_CAPACITY, LEGACY_DATA_CAPACITY,
};
pub use payload::{ChunkedPayload, SegmentedPayload};
pub use set_sm::{SetState, SmNotification};
pub use types::{AdvHandle, BdAddr, GroupId, ItemHandle, LocalAddressKind, OwnAddressType, SetId};
pub use wire::{AdElement, EventLog, GapFlagsItem, StaticItem};
