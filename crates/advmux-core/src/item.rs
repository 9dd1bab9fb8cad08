//! Advertising items and the client capability trait
//!
//! An item is a client-owned piece of advertisement or scan-response content.
//! The scheduler only ever talks to it through [`AdvertisingItem`]: it asks for
//! the item's [`ItemInfo`] to decide where it may be packed, for its parameters
//! to decide which group it joins, and for its data when a payload is built.

use std::borrow::Cow;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::types::{BdAddr, LocalAddressKind, OwnAddressType};

/// Largest payload of a legacy advertising PDU
pub const LEGACY_DATA_CAPACITY: usize = 31;
/// Largest payload accepted for an extended advertising set
pub const EXTENDED_DATA_CAPACITY: usize = 255;

// ----------------------------------------------------------------------------
// Advertising Type
// ----------------------------------------------------------------------------

bitflags! {
    /// Advertising event properties requested by an item
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AdvType: u16 {
        const CONNECTABLE = 1 << 0;
        const SCANNABLE = 1 << 1;
        const DIRECTED = 1 << 2;
        const HIGH_DUTY = 1 << 3;
        const LEGACY = 1 << 4;
        const ANONYMOUS = 1 << 5;

        const LEGACY_CONNECTABLE_SCANNABLE = Self::LEGACY.bits() | Self::CONNECTABLE.bits() | Self::SCANNABLE.bits();
        const LEGACY_SCANNABLE = Self::LEGACY.bits() | Self::SCANNABLE.bits();
        const LEGACY_NON_CONNECTABLE = Self::LEGACY.bits();
        const LEGACY_DIRECTED = Self::LEGACY.bits() | Self::CONNECTABLE.bits() | Self::DIRECTED.bits();
        const EXTENDED_CONNECTABLE = Self::CONNECTABLE.bits();
        const EXTENDED_SCANNABLE = Self::SCANNABLE.bits();
    }
}

impl AdvType {
    pub fn is_legacy(&self) -> bool {
        self.contains(Self::LEGACY)
    }

    pub fn is_connectable(&self) -> bool {
        self.contains(Self::CONNECTABLE)
    }

    pub fn is_legacy_directed(&self) -> bool {
        self.contains(Self::LEGACY | Self::DIRECTED)
    }

    /// Extended PDU that accepts scan requests
    pub fn is_extended_scannable(&self) -> bool {
        self.contains(Self::SCANNABLE) && !self.is_legacy()
    }

    /// Octets available to a set advertising with this type
    pub fn data_capacity(&self) -> usize {
        if self.is_legacy() {
            LEGACY_DATA_CAPACITY
        } else {
            EXTENDED_DATA_CAPACITY
        }
    }
}

// ----------------------------------------------------------------------------
// Item Info
// ----------------------------------------------------------------------------

/// Which payload an item contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Placement {
    #[default]
    Advertisement,
    ScanResponse,
}

/// Packing constraints declared by an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub placement: Placement,
    pub adv_type: AdvType,
    /// Octets the item will produce from `data()`
    pub data_size: usize,
    pub needs_own_set: bool,
    pub dont_include_flags: bool,
    pub override_connectable_state: bool,
}

impl ItemInfo {
    /// Advertisement-placed item of the given type and size
    pub fn advert(adv_type: AdvType, data_size: usize) -> Self {
        Self {
            placement: Placement::Advertisement,
            adv_type,
            data_size,
            needs_own_set: false,
            dont_include_flags: false,
            override_connectable_state: false,
        }
    }

    /// Scan-response-placed item of the given type and size
    pub fn scan_response(adv_type: AdvType, data_size: usize) -> Self {
        Self {
            placement: Placement::ScanResponse,
            ..Self::advert(adv_type, data_size)
        }
    }

    pub fn with_own_set(mut self, needs_own_set: bool) -> Self {
        self.needs_own_set = needs_own_set;
        self
    }

    pub fn without_flags(mut self) -> Self {
        self.dont_include_flags = true;
        self
    }

    pub fn overriding_connectable_state(mut self) -> Self {
        self.override_connectable_state = true;
        self
    }

    /// Whether two items may share a group
    pub fn matches(&self, other: &ItemInfo) -> bool {
        self.adv_type == other.adv_type
            && self.override_connectable_state == other.override_connectable_state
            && !self.needs_own_set
            && !other.needs_own_set
            && self.placement == other.placement
    }
}

// ----------------------------------------------------------------------------
// Item Parameters
// ----------------------------------------------------------------------------

/// Advertising interval bounds in 0.625 ms slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntervalRange {
    pub min: u32,
    pub max: u32,
}

impl IntervalRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

/// Random address rotation bounds in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RotationTimeout {
    pub min_secs: u32,
    pub max_secs: u32,
}

impl RotationTimeout {
    pub const fn new(min_secs: u32, max_secs: u32) -> Self {
        Self { min_secs, max_secs }
    }

    /// A timer is only ever armed when the window is non-empty
    pub fn is_enabled(&self) -> bool {
        self.max_secs > self.min_secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterPolicy {
    #[default]
    AllowAll,
    FilterScan,
    FilterConnect,
    FilterBoth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phy {
    #[default]
    Le1M,
    Le2M,
    LeCoded,
}

/// All three primary advertising channels
pub const ALL_CHANNELS: u8 = 0x07;

/// Advertising parameters requested by an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemParams {
    pub interval: IntervalRange,
    pub channel_map: u8,
    pub own_address_type: OwnAddressType,
    pub random_address_kind: LocalAddressKind,
    /// Explicit random address, if the caller supplies one
    pub random_address: Option<BdAddr>,
    pub rotation: RotationTimeout,
    pub filter_policy: FilterPolicy,
    pub primary_phy: Phy,
    pub secondary_phy: Phy,
    pub sid: u8,
}

impl Default for ItemParams {
    fn default() -> Self {
        Self {
            interval: IntervalRange::new(160, 240), // 100 ms to 150 ms
            channel_map: ALL_CHANNELS,
            own_address_type: OwnAddressType::Public,
            random_address_kind: LocalAddressKind::WriteStatic,
            random_address: None,
            rotation: RotationTimeout::default(),
            filter_policy: FilterPolicy::AllowAll,
            primary_phy: Phy::Le1M,
            secondary_phy: Phy::Le1M,
            sid: 0,
        }
    }
}

impl ItemParams {
    pub fn with_interval(mut self, min: u32, max: u32) -> Self {
        self.interval = IntervalRange::new(min, max);
        self
    }

    pub fn with_random_address(mut self, kind: LocalAddressKind, address: Option<BdAddr>) -> Self {
        self.own_address_type = OwnAddressType::Random;
        self.random_address_kind = kind;
        self.random_address = address;
        self
    }

    pub fn with_rotation(mut self, min_secs: u32, max_secs: u32) -> Self {
        self.rotation = RotationTimeout::new(min_secs, max_secs);
        self
    }

    pub fn with_filter_policy(mut self, policy: FilterPolicy) -> Self {
        self.filter_policy = policy;
        self
    }

    pub fn with_channel_map(mut self, channel_map: u8) -> Self {
        self.channel_map = channel_map;
        self
    }

    /// Whether two items may share hardware parameters
    pub fn matches(&self, other: &ItemParams) -> bool {
        let address_matches = match self.random_address_kind {
            LocalAddressKind::WriteStatic => self.random_address == other.random_address,
            _ => true,
        };

        self.interval == other.interval
            && self.filter_policy == other.filter_policy
            && self.own_address_type == other.own_address_type
            && self.random_address_kind == other.random_address_kind
            && self.rotation == other.rotation
            && address_matches
    }

    /// The controller derives a fresh resolvable address every time these params are applied
    pub fn generates_resolvable_address(&self) -> bool {
        self.own_address_type.requires_address_write()
            && self.random_address_kind == LocalAddressKind::GenerateResolvable
    }

    /// Whether a set using these params should run a rotation timer
    pub fn rotates_address(&self) -> bool {
        self.own_address_type.requires_address_write()
            && self.random_address_kind.is_generated()
            && self.rotation.is_enabled()
    }
}

/// Where an item's parameters come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsSource {
    /// Follow the default parameter policy, including preset changes
    Defaults,
    Custom(ItemParams),
}

// ----------------------------------------------------------------------------
// Client Capability
// ----------------------------------------------------------------------------

/// Notifications delivered to every item of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertisingEvent {
    SetEnabled,
    SetSuspended,
    RandomAddressChanged(BdAddr),
}

/// Capability set implemented by a client for each item it registers
///
/// `data` must produce exactly `info().data_size` octets whenever the item is
/// packed. A mismatch is treated as a contract breach and the payload is not sent.
pub trait AdvertisingItem: Send {
    fn info(&self) -> ItemInfo;

    /// Current payload, already formatted as AD structures
    fn data(&self) -> Option<Cow<'_, [u8]>>;

    /// Called right after every `data` call that produced a non-empty payload
    fn release_data(&mut self) {}

    fn parameters(&self) -> ParamsSource {
        ParamsSource::Defaults
    }

    fn notify(&mut self, _event: &AdvertisingEvent) {}
}

impl fmt::Debug for dyn AdvertisingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvertisingItem")
            .field("info", &self.info())
            .finish()
    }
}
