//! Set confirmations
//!
//! Outcomes reported by the state machines, applied to the set they belong to.
//! Most of them clear the flag that was being serviced and move the set's
//! chain on to its next step.

use tracing::{debug, warn};

use super::{AdvertisingManager, RefreshRequest};
use crate::item::AdvertisingEvent;
use crate::set_sm::SmNotification;
use crate::types::{AdvHandle, SetId};

impl AdvertisingManager {
    pub(super) fn on_set_notification(&mut self, handle: AdvHandle, notification: SmNotification) {
        let Some(id) = self.sets.by_hardware(handle) else {
            debug!(adv_handle = %handle, ?notification, "notification for released set ignored");
            return;
        };
        debug!(adv_handle = %handle, set = %id, ?notification, "set notification");

        match notification {
            SmNotification::RegisterCfm { success: true } => {
                self.update_flags(id, |flags| flags.needs_registering = false);
                self.resume_chain(id);
            }
            SmNotification::RegisterCfm { success: false } => {
                warn!(adv_handle = %handle, "registration failed, releasing set");
                self.teardown_set(id);
            }
            SmNotification::UpdateParamsCfm { success } => {
                if !success {
                    warn!(adv_handle = %handle, "params update failed");
                }
                self.update_flags(id, |flags| flags.needs_params_update = false);
                self.resume_chain(id);
            }
            SmNotification::UpdateDataCfm { success } => {
                if !success {
                    warn!(adv_handle = %handle, "data update failed");
                }
                self.update_flags(id, |flags| flags.needs_data_update = false);
                self.resume_chain(id);
            }
            SmNotification::EnableCfm { success } => {
                self.update_flags(id, |flags| flags.needs_enabling = false);
                if success {
                    self.set_active(id, true);
                    self.notify_group(id, AdvertisingEvent::SetEnabled);
                } else {
                    warn!(adv_handle = %handle, "enable failed");
                }
                self.resume_chain(id);
            }
            SmNotification::DisableCfm { success } => {
                self.update_flags(id, |flags| flags.needs_disabling = false);
                let resume = self
                    .sets
                    .get_mut(id)
                    .map_or(false, |set| std::mem::take(&mut set.resume_after_disable));
                if success {
                    self.set_active(id, false);
                    self.notify_group(id, AdvertisingEvent::SetSuspended);
                    if resume {
                        self.refresh_gate.defer(RefreshRequest::StateUpdate(None));
                    }
                } else {
                    warn!(adv_handle = %handle, "disable failed");
                }
                self.resume_chain(id);
            }
            SmNotification::UnregisterCfm { success: true } => {
                let destroying = self
                    .sets
                    .get(id)
                    .map_or(false, |set| set.flags.needs_destroying);
                if destroying {
                    self.finish_destroy(id);
                } else {
                    self.update_flags(id, |flags| flags.needs_registering = true);
                    self.resume_chain(id);
                }
            }
            SmNotification::UnregisterCfm { success: false } => {
                warn!(adv_handle = %handle, "unregister failed");
                self.update_flags(id, |flags| flags.needs_destroying = false);
                self.resume_chain(id);
            }
            SmNotification::Stopped => {
                warn!(adv_handle = %handle, "controller stopped set and re-advertising failed");
                self.set_active(id, false);
                self.notify_group(id, AdvertisingEvent::SetSuspended);
            }
            SmNotification::RotationTimeout => {
                self.refresh_gate.defer(RefreshRequest::Suspend(handle));
            }
            SmNotification::AddressChanged(address) => {
                debug!(adv_handle = %handle, %address, "random address changed");
                self.notify_group(id, AdvertisingEvent::RandomAddressChanged(address));
            }
        }
    }

    /// Continue the chain of a set that holds its lock
    fn resume_chain(&mut self, id: SetId) {
        if self.sets.get(id).map_or(false, |set| set.is_busy()) {
            self.continue_set(id);
        }
    }

    fn set_active(&mut self, id: SetId, active: bool) {
        if let Some(set) = self.sets.get_mut(id) {
            set.active = active;
        }
    }

    /// Release a set whose registration failed; its group is repacked later
    fn teardown_set(&mut self, id: SetId) {
        let group = self.groups.group_for_set(id);
        self.sets.clear(id);
        if let Some(group) = group {
            self.groups.mark_dirty(group);
        }
        if let Some(set) = self.sets.get_mut(id) {
            set.flags.needs_destroying = true;
        }
        self.finish_destroy(id);
    }

    /// Deliver `event` to every item of the set's group
    fn notify_group(&mut self, set: SetId, event: AdvertisingEvent) {
        let Some(members) = self
            .groups
            .group_for_set(set)
            .and_then(|group| self.groups.get(group))
            .map(|group| group.items().to_vec())
        else {
            return;
        };

        for item in members {
            if let Some(client) = self.registry.get_mut(item) {
                client.notify(&event);
            }
        }
    }
}
