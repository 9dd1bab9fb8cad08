//! Diagnostic surface
//!
//! Introspection addressed by the numeric hardware set id (1-based), the way a
//! host test shell or vendor tool would query the controller. Everything here
//! is read-only apart from [`AdvertisingManager::disable_set`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregator::AdvertisingManager;
use crate::item::ALL_CHANNELS;
use crate::set_sm::SmRequest;
use crate::types::{AdvHandle, BdAddr, SetId};

/// Event type reported for a set that has no known group
pub const UNKNOWN_EVENT_TYPE: u16 = 0xFFFF;

/// Point-in-time view of one hardware set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDiagnostics {
    pub id: u8,
    pub state: String,
    pub active: bool,
    pub busy: bool,
    pub space_used: usize,
    pub event_type: u16,
    pub min_interval: u32,
    pub max_interval: u32,
    pub channel_map: u8,
    pub resolved_address: Option<BdAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub supported_sets: usize,
    pub items: usize,
    pub groups: usize,
    pub refreshing: bool,
    pub sets: Vec<SetDiagnostics>,
}

impl AdvertisingManager {
    fn set_by_id(&self, id: u8) -> Option<SetId> {
        self.sets.by_hardware(AdvHandle::new(id))
    }

    pub fn supported_sets(&self) -> usize {
        self.machines.supported()
    }

    pub fn is_set_active(&self, id: u8) -> bool {
        self.set_by_id(id)
            .and_then(|set| self.sets.get(set))
            .map_or(false, |set| set.active)
    }

    pub fn space_used(&self, id: u8) -> usize {
        self.set_by_id(id)
            .and_then(|set| self.sets.get(set))
            .map_or(0, |set| set.space_used())
    }

    /// Advertising type bits of the set's group
    pub fn event_type(&self, id: u8) -> u16 {
        self.set_by_id(id)
            .and_then(|set| self.groups.group_for_set(set))
            .and_then(|group| self.groups.get(group))
            .map_or(UNKNOWN_EVENT_TYPE, |group| group.info.adv_type.bits())
    }

    pub fn min_interval(&self, id: u8) -> u32 {
        self.machines
            .get(AdvHandle::new(id))
            .and_then(|sm| sm.params())
            .map_or(0, |params| params.params.interval.min)
    }

    pub fn max_interval(&self, id: u8) -> u32 {
        self.machines
            .get(AdvHandle::new(id))
            .and_then(|sm| sm.params())
            .map_or(0, |params| params.params.interval.max)
    }

    pub fn channel_map(&self, id: u8) -> u8 {
        self.machines
            .get(AdvHandle::new(id))
            .and_then(|sm| sm.params())
            .map_or(ALL_CHANNELS, |params| params.params.channel_map)
    }

    pub fn resolved_address(&self, id: u8) -> Option<BdAddr> {
        self.machines.get(AdvHandle::new(id))?.resolved_address()
    }

    /// Stop an active, idle set; false if it is busy or not advertising
    pub fn disable_set(&mut self, id: u8) -> bool {
        let handle = AdvHandle::new(id);
        let Some(set) = self.set_by_id(id) else {
            return false;
        };
        let eligible = self
            .sets
            .get(set)
            .map_or(false, |set| set.active && !set.is_busy());
        if !eligible || !self.sets.lock(set) {
            return false;
        }

        debug!(adv_handle = %handle, "disabling set on request");
        self.update_flags(set, |flags| flags.needs_disabling = true);
        self.submit_to_machine(handle, SmRequest::Disable);
        self.check_release_refresh_lock();
        self.run_to_completion();
        true
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        let mut sets: Vec<SetDiagnostics> = self
            .sets
            .iter()
            .filter_map(|(_, set)| set.hardware())
            .map(|handle| {
                let id = handle.raw();
                SetDiagnostics {
                    id,
                    state: self
                        .machines
                        .get(handle)
                        .map_or("Null", |sm| sm.state().name())
                        .to_string(),
                    active: self.is_set_active(id),
                    busy: self
                        .set_by_id(id)
                        .and_then(|set| self.sets.get(set))
                        .map_or(false, |set| set.is_busy()),
                    space_used: self.space_used(id),
                    event_type: self.event_type(id),
                    min_interval: self.min_interval(id),
                    max_interval: self.max_interval(id),
                    channel_map: self.channel_map(id),
                    resolved_address: self.resolved_address(id),
                }
            })
            .collect();
        sets.sort_by_key(|set| set.id);

        DiagnosticsSnapshot {
            supported_sets: self.supported_sets(),
            items: self.item_count(),
            groups: self.group_count(),
            refreshing: self.is_refreshing(),
            sets,
        }
    }
}
