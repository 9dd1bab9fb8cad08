//! Advertising Aggregator
//!
//! The scheduler that turns client items into controller traffic. Every client
//! change is turned into a [`RefreshRequest`] and admitted through a single
//! refresh gate, so any number of rapid changes collapse into one
//! regroup-and-drive pass at a time. The manager is sans-IO: controller
//! commands and timer requests accumulate as [`Effect`]s that the host drains
//! with [`AdvertisingManager::take_effects`], and controller confirmations and
//! timer expiries are fed back in through [`handle_controller_event`] and
//! [`handle_timer`].
//!
//! [`handle_controller_event`]: AdvertisingManager::handle_controller_event
//! [`handle_timer`]: AdvertisingManager::handle_timer

mod confirmations;
mod refresh;

use std::collections::VecDeque;
use std::fmt;

use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::channel::{ControllerEvent, Effect, TimerId};
use crate::config::ManagerConfig;
use crate::defaults::{DefaultParameterPolicy, DefaultParametersTable};
use crate::errors::ContractError;
use crate::gate::Gate;
use crate::group::{AdmissionPolicy, Group, GroupTable};
use crate::item::{AdvertisingItem, ItemParams, ParamsSource, Placement};
use crate::registry::ItemRegistry;
use crate::set::SetPacker;
use crate::set_sm::{SmNotification, SmOutput, SmRequest, SmTable};
use crate::types::{AdvHandle, GroupId, ItemHandle, SetId};

/// Invoked once when the refresh it was queued with has fully settled
pub type RefreshCallback = Box<dyn FnOnce() + Send>;

/// Work admitted one at a time through the refresh gate
pub enum RefreshRequest {
    StateUpdate(Option<RefreshCallback>),
    ItemUpdated(ItemHandle),
    ItemRemoved(ItemHandle),
    /// Suspend a set so its random address can be rotated
    Suspend(AdvHandle),
}

impl fmt::Debug for RefreshRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateUpdate(callback) => f
                .debug_tuple("StateUpdate")
                .field(&callback.is_some())
                .finish(),
            Self::ItemUpdated(item) => f.debug_tuple("ItemUpdated").field(item).finish(),
            Self::ItemRemoved(item) => f.debug_tuple("ItemRemoved").field(item).finish(),
            Self::Suspend(handle) => f.debug_tuple("Suspend").field(handle).finish(),
        }
    }
}

/// Where one set's items currently sit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetLayout {
    pub set: SetId,
    pub group: GroupId,
    pub hardware: Option<AdvHandle>,
    pub items: Vec<ItemHandle>,
    pub scan_response: Vec<ItemHandle>,
    pub active: bool,
}

// ----------------------------------------------------------------------------
// Advertising Manager
// ----------------------------------------------------------------------------

pub struct AdvertisingManager {
    pub(crate) config: ManagerConfig,
    pub(crate) registry: ItemRegistry,
    pub(crate) groups: GroupTable,
    pub(crate) sets: SetPacker,
    pub(crate) machines: SmTable,
    pub(crate) defaults: DefaultParameterPolicy,
    pub(crate) policy: AdmissionPolicy,
    pub(crate) refresh_gate: Gate<RefreshRequest>,
    pub(crate) refresh_callback: Option<RefreshCallback>,
    pub(crate) gap_flags_item: Option<ItemHandle>,
    pub(crate) effects: Vec<Effect>,
    pub(crate) notifications: VecDeque<(AdvHandle, SmNotification)>,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) recheck_armed: bool,
}

impl fmt::Debug for AdvertisingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvertisingManager")
            .field("items", &self.registry.len())
            .field("groups", &self.groups.len())
            .field("sets", &self.sets.len())
            .field("refresh_held", &self.refresh_gate.is_held())
            .field("pending_requests", &self.refresh_gate.pending())
            .finish()
    }
}

impl AdvertisingManager {
    pub fn new(config: ManagerConfig) -> Self {
        let policy = AdmissionPolicy {
            advertising_allowed: config.advertising_allowed,
            connectable_allowed: config.connectable_allowed,
        };
        info!(
            max_items = config.max_items,
            max_groups = config.max_groups,
            max_sets = config.max_advertising_sets,
            "advertising manager created"
        );

        Self {
            registry: ItemRegistry::new(config.max_items),
            groups: GroupTable::new(config.max_groups),
            // Scan-response sets have no hardware, one per group at most
            sets: SetPacker::new(config.max_advertising_sets + config.max_groups),
            machines: SmTable::new(config.max_advertising_sets, config.address_retry_limit),
            defaults: DefaultParameterPolicy::new(ItemParams::default()),
            policy,
            refresh_gate: Gate::new(),
            refresh_callback: None,
            gap_flags_item: None,
            effects: Vec::new(),
            notifications: VecDeque::new(),
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            recheck_armed: false,
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Drain the effects produced since the last call
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Whether a refresh pass holds the gate
    pub fn is_refreshing(&self) -> bool {
        self.refresh_gate.is_held()
    }

    pub fn pending_requests(&self) -> usize {
        self.refresh_gate.pending()
    }

    // ------------------------------------------------------------------------
    // Client API
    // ------------------------------------------------------------------------

    /// Register an item; `None` when the registry is full
    pub fn register_item(&mut self, item: Box<dyn AdvertisingItem>) -> Option<ItemHandle> {
        let handle = self.registry.add(item)?;
        self.submit(RefreshRequest::ItemUpdated(handle));
        Some(handle)
    }

    /// Tell the scheduler an item's info, params or data changed
    pub fn update_item(&mut self, handle: ItemHandle) -> bool {
        if !self.registry.contains(handle) {
            warn!(item = %handle, "update for unknown item");
            return false;
        }
        self.submit(RefreshRequest::ItemUpdated(handle));
        true
    }

    pub fn unregister_item(&mut self, handle: ItemHandle) -> bool {
        if !self.registry.contains(handle) {
            warn!(item = %handle, "unregister for unknown item");
            return false;
        }
        self.submit(RefreshRequest::ItemRemoved(handle));
        true
    }

    /// Register the GAP flags item; only one may exist at a time
    pub fn register_gap_flags_item(&mut self, item: Box<dyn AdvertisingItem>) -> Option<ItemHandle> {
        if let Some(existing) = self.gap_flags_item {
            warn!(item = %existing, "gap flags item already registered");
            return None;
        }
        let handle = self.registry.add(item)?;
        self.gap_flags_item = Some(handle);
        self.submit(RefreshRequest::ItemUpdated(handle));
        Some(handle)
    }

    pub fn gap_flags_item(&self) -> Option<ItemHandle> {
        self.gap_flags_item
    }

    /// Queue a refresh; `on_complete` runs once that refresh has settled
    pub fn queue_state_update(&mut self, on_complete: Option<RefreshCallback>) {
        self.submit(RefreshRequest::StateUpdate(on_complete));
    }

    pub fn allow_advertising(&mut self, allowed: bool) {
        info!(allowed, "advertising switch");
        self.policy.advertising_allowed = allowed;
        self.groups.mark_dirty_where(|_| true);
        self.submit(RefreshRequest::StateUpdate(None));
    }

    pub fn enable_connectable(&mut self, allowed: bool) {
        info!(allowed, "connectable switch");
        self.policy.connectable_allowed = allowed;
        self.groups.mark_dirty_where(|_| true);
        self.submit(RefreshRequest::StateUpdate(None));
    }

    /// Re-evaluate directed advertising after its data source changed state
    pub fn refresh_directed_advertising(&mut self) {
        let count = self
            .groups
            .mark_dirty_where(|group| group.info.adv_type.is_legacy_directed());
        debug!(groups = count, "directed advertising refresh");
        self.submit(RefreshRequest::StateUpdate(None));
    }

    pub fn register_default_parameters(&mut self, table: DefaultParametersTable) -> Result<(), ContractError> {
        if let Err(err) = self.defaults.register(table) {
            error!(%err, "default parameter table rejected");
            return Err(err);
        }
        debug!("default parameter table registered");
        Ok(())
    }

    /// Activate preset `index` for every item following the defaults
    pub fn select_default_preset(&mut self, index: usize) -> bool {
        if !self.apply_default_preset(index) {
            warn!(index, "no such default preset");
            return false;
        }
        self.submit(RefreshRequest::StateUpdate(None));
        true
    }

    pub fn active_default_preset(&self) -> Option<usize> {
        self.defaults.active()
    }

    // ------------------------------------------------------------------------
    // Host Inputs
    // ------------------------------------------------------------------------

    pub fn handle_controller_event(&mut self, event: ControllerEvent) {
        let handle = event.handle();
        match self.machines.get_mut(handle) {
            Some(sm) => {
                let mut out = SmOutput {
                    effects: &mut self.effects,
                    notifications: &mut self.notifications,
                    rng: &mut self.rng,
                };
                sm.handle_event(&event, &mut out);
            }
            None => debug!(adv_handle = %handle, ?event, "event for unknown instance ignored"),
        }
        self.run_to_completion();
    }

    pub fn handle_timer(&mut self, timer: TimerId) {
        debug!(?timer, "timer expired");
        match timer {
            TimerId::AddressRotation(handle) => {
                if let Some(sm) = self.machines.get_mut(handle) {
                    let mut out = SmOutput {
                        effects: &mut self.effects,
                        notifications: &mut self.notifications,
                        rng: &mut self.rng,
                    };
                    sm.handle_rotation_timeout(&mut out);
                }
            }
            TimerId::RefreshRecheck => self.recheck_armed = false,
            TimerId::DefaultsFallback => {
                if let Some(slow) = self.defaults.slow_preset() {
                    if self.apply_default_preset(slow) {
                        self.refresh_gate.defer(RefreshRequest::StateUpdate(None));
                    }
                }
            }
        }
        self.run_to_completion();
    }

    // ------------------------------------------------------------------------
    // Request Processing
    // ------------------------------------------------------------------------

    fn submit(&mut self, request: RefreshRequest) {
        debug!(?request, held = self.refresh_gate.is_held(), "refresh requested");
        self.refresh_gate.defer(request);
        self.run_to_completion();
    }

    /// Handle everything that is ready before returning to the host
    pub(crate) fn run_to_completion(&mut self) {
        loop {
            if let Some((handle, notification)) = self.notifications.pop_front() {
                self.on_set_notification(handle, notification);
                continue;
            }

            if self.refresh_gate.is_held() {
                self.check_release_refresh_lock();
                if self.refresh_gate.is_held() {
                    break;
                }
            }

            let Some(request) = self.refresh_gate.admit_next() else {
                break;
            };
            self.process_request(request);
        }
    }

    fn process_request(&mut self, request: RefreshRequest) {
        match request {
            RefreshRequest::StateUpdate(callback) => {
                if callback.is_some() {
                    self.refresh_callback = callback;
                }
            }
            RefreshRequest::ItemUpdated(item) => self.apply_item_update(item),
            RefreshRequest::ItemRemoved(item) => self.apply_item_removal(item),
            RefreshRequest::Suspend(handle) => self.apply_suspend(handle),
        }
        self.refresh_pass();
    }

    fn apply_item_update(&mut self, item: ItemHandle) {
        if Some(item) == self.gap_flags_item {
            let count = self.groups.mark_dirty_where(Group::gap_flags_apply);
            debug!(item = %item, groups = count, "gap flags item updated");
            return;
        }

        let Some(client) = self.registry.get(item) else {
            debug!(item = %item, "item gone before its update was processed");
            return;
        };
        let info = client.info();
        let (params, uses_defaults) = match client.parameters() {
            ParamsSource::Defaults => (self.defaults.defaults(), true),
            ParamsSource::Custom(params) => (params, false),
        };

        if info.placement == Placement::ScanResponse {
            self.groups.mark_dirty_where(Group::scan_response_applies);
        }

        let current = self.groups.group_linked_to_item(item);
        if let Some(current) = current {
            let stays = self
                .groups
                .get(current)
                .map_or(false, |group| group.fits_member(item, &info, &params, uses_defaults));
            if stays {
                self.groups.mark_dirty(current);
                return;
            }
            self.detach_item(current, item);
        }

        let target = match self.groups.group_for_params(&info, &params, uses_defaults) {
            Some(group) => Some(group),
            None => self.groups.create(info, params, uses_defaults),
        };
        let Some(target) = target else {
            error!(item = %item, "group table full, item left unplaced");
            return;
        };

        if let Err(err) = self.groups.add_item(target, item) {
            error!(item = %item, %err, "could not attach item to group");
            return;
        }
        self.groups.mark_dirty(target);
        debug!(item = %item, group = %target, "item placed in group");
    }

    fn apply_item_removal(&mut self, item: ItemHandle) {
        if Some(item) == self.gap_flags_item {
            self.gap_flags_item = None;
            self.groups.mark_dirty_where(Group::gap_flags_apply);
        } else {
            if let Some(info) = self.registry.info(item) {
                if info.placement == Placement::ScanResponse {
                    self.groups.mark_dirty_where(Group::scan_response_applies);
                }
            }
            if let Some(group) = self.groups.group_linked_to_item(item) {
                self.detach_item(group, item);
            }
        }

        let stray = self.sets.purge_item(item);
        if stray > 0 {
            debug!(item = %item, sets = stray, "removed item from remaining sets");
        }
        self.registry.remove(item);
    }

    fn detach_item(&mut self, group: GroupId, item: ItemHandle) {
        match self.groups.remove_item(group, item, &mut self.sets) {
            Ok(_) => self.groups.mark_dirty(group),
            Err(err) => error!(item = %item, %err, "could not detach item from group"),
        }
    }

    fn apply_suspend(&mut self, handle: AdvHandle) {
        let Some(set) = self.sets.by_hardware(handle).and_then(|id| self.sets.get_mut(id)) else {
            debug!(adv_handle = %handle, "suspend for released set ignored");
            return;
        };
        if set.active {
            set.flags.needs_disabling = true;
            set.resume_after_disable = true;
            debug!(adv_handle = %handle, "suspending set for address rotation");
        }
    }

    fn apply_default_preset(&mut self, index: usize) -> bool {
        let Some(preset) = self.defaults.select(index).cloned() else {
            return false;
        };
        info!(preset = %preset.name, min = preset.interval.min, max = preset.interval.max, "default preset selected");

        self.effects.push(Effect::CancelTimer {
            timer: TimerId::DefaultsFallback,
        });
        if let Some(after) = preset.fallback_after() {
            if Some(index) != self.defaults.slow_preset() {
                self.effects.push(Effect::StartTimer {
                    timer: TimerId::DefaultsFallback,
                    after,
                });
            }
        }

        for id in self.groups.keys() {
            let Some(group) = self.groups.get_mut(id) else {
                continue;
            };
            if !group.uses_default_params {
                continue;
            }
            group.params.interval = preset.interval;
            for set in group.sets().to_vec() {
                if let Some(set) = self.sets.get_mut(set) {
                    set.flags.needs_params_update = true;
                }
            }
        }
        true
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn item_count(&self) -> usize {
        self.registry.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group_of(&self, item: ItemHandle) -> Option<GroupId> {
        self.groups.group_linked_to_item(item)
    }

    /// Current placement of items into sets, in group order
    pub fn set_layouts(&self) -> Vec<SetLayout> {
        let mut layouts = Vec::new();
        for (group_id, group) in self.groups.iter() {
            let scan_response: Vec<ItemHandle> = group
                .scan_response_set()
                .and_then(|id| self.sets.get(id))
                .map(|set| set.items().collect())
                .unwrap_or_default();

            for set_id in group.sets() {
                let Some(set) = self.sets.get(*set_id) else {
                    continue;
                };
                layouts.push(SetLayout {
                    set: *set_id,
                    group: group_id,
                    hardware: set.hardware(),
                    items: set.items().collect(),
                    scan_response: scan_response.clone(),
                    active: set.active,
                });
            }
        }
        layouts
    }

    pub(crate) fn submit_to_machine(&mut self, handle: AdvHandle, request: SmRequest) -> bool {
        let Some(sm) = self.machines.get_mut(handle) else {
            error!(adv_handle = %handle, "{}", ContractError::UnknownInstance(handle));
            return false;
        };
        let mut out = SmOutput {
            effects: &mut self.effects,
            notifications: &mut self.notifications,
            rng: &mut self.rng,
        };
        sm.submit(request, &mut out);
        true
    }
}
