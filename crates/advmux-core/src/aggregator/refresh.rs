//! Refresh pass
//!
//! One pass regroups dirty groups, decides which sets should be advertising,
//! drops empty groups and then drives every idle set one step along its
//! lifecycle. The refresh gate stays held until no set is busy.

use tracing::{debug, error, trace, warn};

use super::{AdvertisingManager, RefreshRequest};
use crate::channel::{Effect, SetParams, TimerId};
use crate::errors::ContractError;
use crate::item::Placement;
use crate::payload::ChunkedPayload;
use crate::set::{SetEntry, SetFlags, SetPacker};
use crate::set_sm::{SetData, SetState, SmRequest};
use crate::types::{AdvHandle, GroupId, ItemHandle, SetId};

impl AdvertisingManager {
    pub(super) fn refresh_pass(&mut self) {
        trace!(groups = self.groups.len(), sets = self.sets.len(), "refresh pass");
        for group in self.groups.keys() {
            let passing = self.regroup(group);
            self.enable_advertising_for_group(group, passing);
        }
        self.drain_empty_groups();
        self.drive_sets();
    }

    // ------------------------------------------------------------------------
    // Regroup
    // ------------------------------------------------------------------------

    /// Repack a dirty group; returns whether the group may advertise
    fn regroup(&mut self, id: GroupId) -> bool {
        let passing = self.groups.passes_criteria(id, self.policy, &mut self.registry);
        let Some(group) = self.groups.get(id) else {
            return false;
        };
        if !group.needs_refresh() {
            return passing;
        }

        if passing {
            self.repack_group(id);
            return true;
        }

        if self.sets_hold_only_gap_flags(id) {
            debug!(group = %id, "only gap flags left, tearing sets down");
            let sets = group.sets().to_vec();
            for set in sets {
                self.sets.clear(set);
                self.update_flags(set, |flags| flags.needs_data_update = true);
            }
            if let Some(group) = self.groups.get_mut(id) {
                group.clear_dirty();
            }
        }
        false
    }

    fn sets_hold_only_gap_flags(&self, id: GroupId) -> bool {
        let (Some(flags), Some(group)) = (self.gap_flags_item, self.groups.get(id)) else {
            return false;
        };
        let mut saw_flags = false;
        for set in group.sets().iter().filter_map(|set| self.sets.get(*set)) {
            for item in set.items() {
                if item != flags {
                    return false;
                }
                saw_flags = true;
            }
        }
        saw_flags
    }

    fn repack_group(&mut self, id: GroupId) {
        let Some(group) = self.groups.get(id) else {
            return;
        };
        let info = group.info;
        let members = group.items().to_vec();
        let flags_item = self.gap_flags_item.filter(|_| group.gap_flags_apply());
        let scan_response_applies = group.scan_response_applies();
        for set in group.sets().to_vec() {
            self.sets.clear(set);
        }

        let capacity = info.adv_type.data_capacity();
        let reserved = match flags_item {
            Some(flags) => self.declared_size(flags).unwrap_or(0),
            None => 0,
        };

        let mut unplaced = false;
        if info.placement == Placement::Advertisement {
            for item in members {
                unplaced |= !self.place_item(id, item, capacity, reserved);
            }

            if let Some(flags) = flags_item {
                for set in self.group_sets(id) {
                    if self.sets.get(set).map_or(true, |set| set.is_empty()) {
                        continue;
                    }
                    if let Err(err) = self.sets.prepend_item(set, flags, reserved) {
                        error!(set = %set, %err, "could not prepend gap flags");
                    }
                }
            }

            for set in self.group_sets(id) {
                if self.sets.get(set).map_or(false, |set| !set.is_empty()) {
                    self.update_flags(set, |flags| flags.needs_data_update = true);
                }
            }
        }

        if scan_response_applies {
            self.pack_scan_response(id, capacity);
        } else if let Some(set) = self.groups.get(id).and_then(|group| group.scan_response_set()) {
            self.sets.clear(set);
        }

        self.sets.check_single_membership(&self.group_sets(id));
        if let Some(group) = self.groups.get_mut(id) {
            group.set_unplaced(unplaced);
            group.clear_dirty();
        }
    }

    /// Pack one member; `false` only when no hardware set could be opened for it
    fn place_item(&mut self, group: GroupId, item: ItemHandle, capacity: usize, reserved: usize) -> bool {
        let Some(size) = self.declared_size(item) else {
            return true;
        };
        if size + reserved > capacity {
            let err = ContractError::ItemTooLarge {
                item,
                size: size + reserved,
                capacity,
            };
            error!(%err, "item skipped");
            return true;
        }

        let directed = self
            .groups
            .get(group)
            .map_or(false, |group| group.info.adv_type.is_legacy_directed());
        if size == 0 && !directed {
            return true;
        }

        let candidates = self.group_sets(group);
        let set = match self.sets.find_set_with_free_space(&candidates, size + reserved) {
            Some(set) => set,
            None => match self.open_set(group, capacity) {
                Some(set) => set,
                None => {
                    warn!(item = %item, group = %group, "no free advertising set, item waits for one");
                    return false;
                }
            },
        };

        if let Err(err) = self.sets.add_item(set, item, size) {
            error!(item = %item, %err, "packing failed");
        }
        true
    }

    fn pack_scan_response(&mut self, id: GroupId, capacity: usize) {
        let Some(group) = self.groups.get(id) else {
            return;
        };
        let existing = group.scan_response_set();
        let Some(source) = self.groups.matching_scan_response_group(group.info.adv_type) else {
            if let Some(set) = existing {
                self.sets.clear(set);
            }
            return;
        };
        let members = self
            .groups
            .get(source)
            .map(|group| group.items().to_vec())
            .unwrap_or_default();

        let set = match existing {
            Some(set) => set,
            None => {
                let Some(set) = self.sets.create_scan_response(capacity) else {
                    warn!(group = %id, "no room for a scan response set");
                    return;
                };
                if let Err(err) = self.groups.set_scan_response_set(id, set) {
                    error!(%err, "could not attach scan response set");
                }
                set
            }
        };

        self.sets.clear(set);
        for item in members {
            let Some(size) = self.declared_size(item) else {
                continue;
            };
            if size == 0 {
                continue;
            }
            let free = self.sets.get(set).map_or(0, |set| set.free_space());
            if size > free {
                warn!(item = %item, size, free, "scan response full, item skipped");
                continue;
            }
            if let Err(err) = self.sets.add_item(set, item, size) {
                error!(item = %item, %err, "scan response packing failed");
            }
        }
    }

    /// Claim a hardware instance and a set for `group`
    fn open_set(&mut self, group: GroupId, capacity: usize) -> Option<SetId> {
        let handle = self.machines.create()?;
        let Some(set) = self.sets.create_advertising(capacity, handle) else {
            if let Err(err) = self.machines.destroy(handle) {
                error!(%err, "could not release unused instance");
            }
            return None;
        };
        if let Err(err) = self.groups.add_set(group, set) {
            error!(%err, "could not attach set to group");
        }
        Some(set)
    }

    // ------------------------------------------------------------------------
    // Enable / Disable
    // ------------------------------------------------------------------------

    fn enable_advertising_for_group(&mut self, id: GroupId, passing: bool) {
        let Some(group) = self.groups.get(id) else {
            return;
        };
        let refresh_address =
            group.params.generates_resolvable_address() || group.params.rotates_address();
        let scan_response = group.scan_response_set();
        let scan_response_only = group.info.placement == Placement::ScanResponse;
        let sets = group.sets().to_vec();

        for set_id in &sets {
            let Some(set) = self.sets.get_mut(*set_id) else {
                continue;
            };
            let (active, busy) = (set.active, set.is_busy());

            if set.is_empty() {
                set.flags.needs_enabling = false;
                set.flags.needs_destroying = true;
                set.flags.needs_disabling |= active;
            } else if passing {
                if !active {
                    set.flags.needs_enabling = true;
                    if refresh_address && !busy {
                        set.flags.needs_params_update = true;
                    }
                } else if !set.resume_after_disable {
                    set.flags.needs_disabling = false;
                }
            } else {
                set.flags.needs_enabling = false;
                set.flags.needs_disabling |= active;
            }
        }

        if let Some(sr) = scan_response {
            let empty = self.sets.get(sr).map_or(true, |set| set.is_empty());
            self.update_flags(sr, |flags| flags.needs_destroying = empty);
            if empty && sets.is_empty() {
                self.destroy_scan_response_set(id, sr);
            }
        }

        if scan_response_only && self.groups.get(id).map_or(false, |group| group.is_empty()) {
            if let Err(err) = self.groups.destroy(id) {
                error!(%err, "could not destroy scan response group");
            }
        }
    }

    fn drain_empty_groups(&mut self) {
        for id in self.groups.keys() {
            if self.groups.get(id).map_or(false, |group| group.is_empty()) {
                if let Err(err) = self.groups.destroy(id) {
                    error!(%err, "could not drain group");
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Drive
    // ------------------------------------------------------------------------

    fn drive_sets(&mut self) {
        let order: Vec<SetId> = self
            .groups
            .iter()
            .flat_map(|(_, group)| group.sets().to_vec())
            .collect();

        for id in order {
            let ready = self
                .sets
                .get(id)
                .map_or(false, |set| !set.is_busy() && set.has_pending_work());
            if ready && self.sets.lock(id) {
                self.continue_set(id);
            }
        }
    }

    /// Apply the highest-priority pending step to a locked set
    ///
    /// Called again from each confirmation, so the lock is held across the
    /// whole chain and released only once no flag applies.
    pub(super) fn continue_set(&mut self, id: SetId) {
        loop {
            let Some(set) = self.sets.get(id) else {
                return;
            };
            let Some(handle) = set.hardware() else {
                self.sets.release(id);
                return;
            };
            let (flags, active) = (set.flags, set.active);
            let unregistered = self
                .machines
                .get(handle)
                .map_or(true, |sm| sm.state() == SetState::Unregistered);

            if flags.needs_destroying && unregistered {
                self.finish_destroy(id);
                return;
            }

            let request = if flags.needs_registering {
                SmRequest::Register
            } else if flags.needs_params_update {
                match self.set_params_for(id) {
                    Some(params) => SmRequest::UpdateParams(params),
                    None => {
                        self.update_flags(id, |flags| flags.needs_params_update = false);
                        continue;
                    }
                }
            } else if flags.needs_data_update {
                self.update_set_data(id, handle);
                return;
            } else if flags.needs_disabling {
                if !active {
                    self.update_flags(id, |flags| flags.needs_disabling = false);
                    continue;
                }
                SmRequest::Disable
            } else if flags.needs_enabling {
                if active {
                    self.update_flags(id, |flags| flags.needs_enabling = false);
                    continue;
                }
                SmRequest::Enable
            } else if flags.needs_destroying {
                if active {
                    self.update_flags(id, |flags| flags.needs_disabling = true);
                    SmRequest::Disable
                } else {
                    SmRequest::Unregister
                }
            } else {
                trace!(set = %id, "set quiescent");
                self.sets.release(id);
                return;
            };

            trace!(set = %id, adv_handle = %handle, request = request.name(), "driving set");
            if !self.submit_to_machine(handle, request) {
                self.sets.release(id);
            }
            return;
        }
    }

    fn set_params_for(&self, set: SetId) -> Option<SetParams> {
        let group = self.groups.get(self.groups.group_for_set(set)?)?;
        Some(SetParams {
            adv_type: group.info.adv_type,
            params: group.params,
        })
    }

    // ------------------------------------------------------------------------
    // Data Marshalling
    // ------------------------------------------------------------------------

    fn update_set_data(&mut self, id: SetId, handle: AdvHandle) {
        let Some(group) = self.groups.group_for_set(id) else {
            error!(set = %id, "set has no group");
            self.update_flags(id, |flags| flags.needs_data_update = false);
            self.continue_set(id);
            return;
        };
        let scan_response_set = self.groups.get(group).and_then(|group| group.scan_response_set());

        let payloads = self.build_payload(id).and_then(|advertising| {
            let scan_response = match scan_response_set {
                Some(set) => Some(self.build_payload(set)?),
                None => None,
            };
            Ok(SetData {
                advertising: Some(advertising),
                scan_response,
            })
        });

        match payloads {
            Ok(data) => {
                if let Some(advertising) = &data.advertising {
                    trace!(set = %id, payload = %advertising.debug_dump(), "advertising payload");
                }
                self.submit_to_machine(handle, SmRequest::UpdateData(data));
            }
            Err(err) => {
                error!(set = %id, %err, "payload not sent, group will be repacked");
                self.update_flags(id, |flags| flags.needs_data_update = false);
                self.groups.mark_dirty(group);
                self.continue_set(id);
            }
        }

        if let Some(set) = scan_response_set {
            if self.sets.get(set).map_or(false, |set| set.flags.needs_destroying) {
                self.destroy_scan_response_set(group, set);
            }
        }
    }

    fn build_payload(&mut self, set: SetId) -> Result<ChunkedPayload, ContractError> {
        let source = self.sets.get(set).ok_or(ContractError::UnknownSet(set))?;
        let mut payload = ChunkedPayload::new(source.capacity())?;
        let entries: Vec<SetEntry> = source.entries().to_vec();
        for entry in entries {
            self.append_item_data(&mut payload, set, entry)?;
        }
        Ok(payload)
    }

    /// Copy one item's data into `payload`, checking it against the packed size
    fn append_item_data(
        &mut self,
        payload: &mut ChunkedPayload,
        set: SetId,
        entry: SetEntry,
    ) -> Result<(), ContractError> {
        let client = self
            .registry
            .get_mut(entry.item)
            .ok_or(ContractError::UnknownItem(entry.item))?;

        let (observed, appended) = match client.data() {
            Some(data) if !data.is_empty() => {
                let fits = data.len() == entry.size && payload.add_item(&data);
                (data.len(), fits)
            }
            _ => (0, true),
        };
        if observed > 0 {
            client.release_data();
        }

        if observed != entry.size {
            return Err(ContractError::ItemSizeMismatch {
                item: entry.item,
                expected: entry.size,
                observed,
            });
        }
        if !appended {
            return Err(ContractError::SetOverflow {
                set,
                size: observed,
                free: payload.free_space(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    pub(super) fn destroy_scan_response_set(&mut self, group: GroupId, set: SetId) {
        if let Err(err) = self.groups.remove_set(group, set) {
            error!(%err, "could not detach scan response set");
        }
        self.sets.clear(set);
        match self.sets.destroy_set(set, &mut self.machines) {
            Ok(()) => debug!(group = %group, set = %set, "scan response set destroyed"),
            Err(err) => error!(%err, "could not destroy scan response set"),
        }
    }

    /// Remove a set whose instance is back to Unregistered
    pub(super) fn finish_destroy(&mut self, id: SetId) {
        let group = self.groups.group_for_set(id);
        if let Some(group) = group {
            if let Err(err) = self.groups.remove_set(group, id) {
                error!(%err, "could not detach set");
            }
        }

        if let Err(err) = self.sets.destroy_set(id, &mut self.machines) {
            error!(set = %id, %err, "set could not be destroyed");
            self.sets.release(id);
            return;
        }

        let starved = self.groups.mark_dirty_where(|group| group.has_unplaced());
        if starved > 0 {
            debug!(groups = starved, "hardware set freed, retrying unplaced items");
            self.refresh_gate.defer(RefreshRequest::StateUpdate(None));
        }

        let Some(group) = group else {
            return;
        };
        let Some(state) = self.groups.get(group) else {
            return;
        };
        if state.sets().is_empty() {
            if let Some(sr) = state.scan_response_set() {
                if self.sets.get(sr).map_or(false, |set| set.is_empty()) {
                    self.destroy_scan_response_set(group, sr);
                }
            }
        }
        if self.groups.get(group).map_or(false, |group| group.is_empty()) {
            if let Err(err) = self.groups.destroy(group) {
                error!(%err, "could not destroy emptied group");
            }
        }
    }

    /// Release the refresh gate once every set is idle
    pub(crate) fn check_release_refresh_lock(&mut self) {
        if !self.refresh_gate.is_held() {
            return;
        }

        if self.sets.any_busy() {
            if !self.recheck_armed {
                self.effects.push(Effect::StartTimer {
                    timer: TimerId::RefreshRecheck,
                    after: self.config.refresh_recheck,
                });
                self.recheck_armed = true;
            }
            return;
        }

        if self.recheck_armed {
            self.effects.push(Effect::CancelTimer {
                timer: TimerId::RefreshRecheck,
            });
            self.recheck_armed = false;
        }
        self.refresh_gate.release();
        debug!("refresh settled");

        if let Some(callback) = self.refresh_callback.take() {
            callback();
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn declared_size(&self, item: ItemHandle) -> Option<usize> {
        match SetPacker::item_size(&self.registry, item) {
            Ok(size) => Some(size),
            Err(err) => {
                error!(%err, "cannot size item");
                None
            }
        }
    }

    fn group_sets(&self, group: GroupId) -> Vec<SetId> {
        self.groups
            .get(group)
            .map(|group| group.sets().to_vec())
            .unwrap_or_default()
    }

    pub(crate) fn update_flags(&mut self, set: SetId, update: impl FnOnce(&mut SetFlags)) {
        if let Some(set) = self.sets.get_mut(set) {
            update(&mut set.flags);
        }
    }
}
