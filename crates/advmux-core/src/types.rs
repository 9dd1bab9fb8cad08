//! Core identifier and address types

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Arena Keys
// ----------------------------------------------------------------------------

/// Index/generation pair naming one slot of an [`Arena`](crate::arena::Arena)
///
/// The generation is bumped every time a slot is vacated, so a key that
/// outlives its value can never resolve to whatever moves in next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    index: u16,
    generation: u32,
}

impl SlotKey {
    pub const fn new(index: u16, generation: u32) -> Self {
        Self { index, generation }
    }

    pub const fn index(&self) -> usize {
        self.index as usize
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

macro_rules! arena_key {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(SlotKey);

        impl From<SlotKey> for $name {
            fn from(key: SlotKey) -> Self {
                Self(key)
            }
        }

        impl From<$name> for SlotKey {
            fn from(key: $name) -> SlotKey {
                key.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}.{}", $prefix, self.0.index(), self.0.generation())
            }
        }
    };
}

arena_key!(
    /// Opaque handle issued to a client when it registers an advertising item
    ItemHandle,
    "item"
);
arena_key!(
    /// Identifies a group of parameter-compatible items
    GroupId,
    "group"
);
arena_key!(
    /// Identifies a logical advertising or scan-response set
    SetId,
    "set"
);

// ----------------------------------------------------------------------------
// Hardware Handle
// ----------------------------------------------------------------------------

/// Controller advertising-set handle, 1-based
///
/// This is also the small numeric identifier used by the diagnostic surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdvHandle(u8);

impl AdvHandle {
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Zero-based slot in the state machine table
    pub(crate) fn slot(&self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl fmt::Display for AdvHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adv#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Device Addresses
// ----------------------------------------------------------------------------

/// 48-bit Bluetooth device address, most significant octet first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    pub const ZERO: BdAddr = BdAddr([0; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Error returned when parsing a [`BdAddr`] from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid device address: {0}")]
pub struct ParseBdAddrError(String);

impl FromStr for BdAddr {
    type Err = ParseBdAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseBdAddrError(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseBdAddrError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseBdAddrError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

/// Own address type used by an advertising set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OwnAddressType {
    #[default]
    Public,
    Random,
    /// Controller-generated resolvable address, public identity as fallback
    ResolvableOrPublic,
    /// Controller-generated resolvable address, random identity as fallback
    ResolvableOrRandom,
}

impl OwnAddressType {
    /// Whether configuring the set requires writing a random address to the controller
    pub fn requires_address_write(&self) -> bool {
        matches!(self, Self::Random | Self::ResolvableOrRandom)
    }
}

/// How the random address of a set is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LocalAddressKind {
    /// Caller supplies the address explicitly
    #[default]
    WriteStatic,
    GenerateResolvable,
    GenerateNonResolvable,
}

impl LocalAddressKind {
    pub fn is_generated(&self) -> bool {
        !matches!(self, Self::WriteStatic)
    }
}
