//! Group Manager
//!
//! A group gathers the items that can share one set of advertising parameters.
//! It owns the ordered list of sets those items are packed into and, for
//! extended scannable groups, one shared scan-response set.

use serde::Serialize;
use tracing::debug;

use crate::arena::Arena;
use crate::errors::ContractError;
use crate::item::{AdvType, ItemInfo, ItemParams, Placement};
use crate::registry::ItemRegistry;
use crate::set::SetPacker;
use crate::types::{GroupId, ItemHandle, SetId};

// ----------------------------------------------------------------------------
// Admission Policy
// ----------------------------------------------------------------------------

/// Global switches consulted by the advertising criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionPolicy {
    pub advertising_allowed: bool,
    pub connectable_allowed: bool,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            advertising_allowed: true,
            connectable_allowed: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Group
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Group {
    pub info: ItemInfo,
    pub params: ItemParams,
    /// Members follow the default parameter policy
    pub uses_default_params: bool,
    items: Vec<ItemHandle>,
    sets: Vec<SetId>,
    scan_response_set: Option<SetId>,
    needs_refresh: bool,
    /// A member found no free hardware set on the last repack
    has_unplaced: bool,
}

impl Group {
    fn new(info: ItemInfo, params: ItemParams, uses_default_params: bool) -> Self {
        Self {
            info,
            params,
            uses_default_params,
            items: Vec::new(),
            sets: Vec::new(),
            scan_response_set: None,
            needs_refresh: true,
            has_unplaced: false,
        }
    }

    pub fn items(&self) -> &[ItemHandle] {
        &self.items
    }

    pub fn sets(&self) -> &[SetId] {
        &self.sets
    }

    pub fn scan_response_set(&self) -> Option<SetId> {
        self.scan_response_set
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.sets.is_empty() && self.scan_response_set.is_none()
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    pub fn mark_dirty(&mut self) {
        self.needs_refresh = true;
    }

    pub fn clear_dirty(&mut self) {
        self.needs_refresh = false;
    }

    pub fn has_unplaced(&self) -> bool {
        self.has_unplaced
    }

    pub fn set_unplaced(&mut self, unplaced: bool) {
        self.has_unplaced = unplaced;
    }

    /// Whether an item with `info` and `params` may join this group
    pub fn accepts(&self, info: &ItemInfo, params: &ItemParams, uses_default_params: bool) -> bool {
        self.info.matches(info)
            && self.params.matches(params)
            && self.uses_default_params == uses_default_params
    }

    /// Like [`accepts`](Self::accepts), but an item that is the sole member of
    /// its own exclusive group is allowed to stay put.
    pub fn fits_member(
        &self,
        item: ItemHandle,
        info: &ItemInfo,
        params: &ItemParams,
        uses_default_params: bool,
    ) -> bool {
        let sole_owner = self.items == [item] && self.info == *info;
        (sole_owner || self.info.matches(info))
            && self.params.matches(params)
            && self.uses_default_params == uses_default_params
    }

    /// The GAP flags item is prepended to this group's sets
    pub fn gap_flags_apply(&self) -> bool {
        self.info.adv_type.is_connectable()
            && !self.info.adv_type.is_legacy_directed()
            && !self.info.dont_include_flags
    }

    /// This group carries the shared scan response of a matching group
    pub fn scan_response_applies(&self) -> bool {
        self.info.adv_type.is_extended_scannable()
            && self.info.placement != Placement::ScanResponse
            && !self.info.needs_own_set
    }
}

// ----------------------------------------------------------------------------
// Group Table
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct GroupTable {
    groups: Arena<GroupId, Group>,
}

impl GroupTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: Arena::with_capacity(capacity),
        }
    }

    /// New group for `info`/`params`; `None` when the table is full
    pub fn create(&mut self, info: ItemInfo, params: ItemParams, uses_default_params: bool) -> Option<GroupId> {
        let id = self
            .groups
            .insert(Group::new(info, params, uses_default_params))
            .ok()?;
        debug!(group = %id, adv_type = ?info.adv_type, placement = ?info.placement, "group created");
        Some(id)
    }

    pub fn destroy(&mut self, id: GroupId) -> Result<(), ContractError> {
        let group = self.groups.get(id).ok_or(ContractError::UnknownGroup(id))?;
        if !group.is_empty() {
            return Err(ContractError::GroupNotEmpty(id));
        }
        self.groups.remove(id);
        debug!(group = %id, "group destroyed");
        Ok(())
    }

    pub fn get(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn get_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (GroupId, &Group)> {
        self.groups.iter()
    }

    pub fn keys(&self) -> Vec<GroupId> {
        self.groups.keys()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group_for_params(
        &self,
        info: &ItemInfo,
        params: &ItemParams,
        uses_default_params: bool,
    ) -> Option<GroupId> {
        self.groups
            .iter()
            .find(|(_, group)| group.accepts(info, params, uses_default_params))
            .map(|(id, _)| id)
    }

    pub fn group_linked_to_item(&self, item: ItemHandle) -> Option<GroupId> {
        self.groups
            .iter()
            .find(|(_, group)| group.items.contains(&item))
            .map(|(id, _)| id)
    }

    pub fn group_for_set(&self, set: SetId) -> Option<GroupId> {
        self.groups
            .iter()
            .find(|(_, group)| group.sets.contains(&set) || group.scan_response_set == Some(set))
            .map(|(id, _)| id)
    }

    /// Scan-response group whose items feed the shared set of a group of `adv_type`
    pub fn matching_scan_response_group(&self, adv_type: AdvType) -> Option<GroupId> {
        self.groups
            .iter()
            .find(|(_, group)| {
                group.info.placement == Placement::ScanResponse
                    && group.info.adv_type == adv_type
                    && !group.info.override_connectable_state
            })
            .map(|(id, _)| id)
    }

    pub fn add_item(&mut self, id: GroupId, item: ItemHandle) -> Result<(), ContractError> {
        let group = self.groups.get_mut(id).ok_or(ContractError::UnknownGroup(id))?;
        if !group.items.contains(&item) {
            group.items.push(item);
        }
        Ok(())
    }

    /// Detach `item`, also pulling it out of every set the group owns
    pub fn remove_item(
        &mut self,
        id: GroupId,
        item: ItemHandle,
        packer: &mut SetPacker,
    ) -> Result<bool, ContractError> {
        let group = self.groups.get_mut(id).ok_or(ContractError::UnknownGroup(id))?;
        let Some(index) = group.items.iter().position(|member| *member == item) else {
            return Ok(false);
        };
        group.items.remove(index);

        for set in group.sets.iter().chain(group.scan_response_set.iter()) {
            packer.remove_item(*set, item);
        }
        Ok(true)
    }

    pub fn add_set(&mut self, id: GroupId, set: SetId) -> Result<(), ContractError> {
        let group = self.groups.get_mut(id).ok_or(ContractError::UnknownGroup(id))?;
        if !group.sets.contains(&set) {
            group.sets.push(set);
        }
        Ok(())
    }

    /// Detach `set`, whether it is an advertising set or the shared scan-response set
    pub fn remove_set(&mut self, id: GroupId, set: SetId) -> Result<bool, ContractError> {
        let group = self.groups.get_mut(id).ok_or(ContractError::UnknownGroup(id))?;
        let before = group.sets.len();
        group.sets.retain(|member| *member != set);
        let mut removed = group.sets.len() != before;
        if group.scan_response_set == Some(set) {
            group.scan_response_set = None;
            removed = true;
        }
        Ok(removed)
    }

    pub fn set_scan_response_set(&mut self, id: GroupId, set: SetId) -> Result<(), ContractError> {
        let group = self.groups.get_mut(id).ok_or(ContractError::UnknownGroup(id))?;
        group.scan_response_set = Some(set);
        Ok(())
    }

    pub fn mark_dirty(&mut self, id: GroupId) {
        if let Some(group) = self.groups.get_mut(id) {
            group.mark_dirty();
        }
    }

    /// Flag every group selected by `filter`; returns how many were flagged
    pub fn mark_dirty_where(&mut self, filter: impl Fn(&Group) -> bool) -> usize {
        let mut count = 0;
        for (_, group) in self.groups.iter_mut().filter(|(_, group)| filter(group)) {
            group.mark_dirty();
            count += 1;
        }
        count
    }

    /// Whether the group may advertise under the current policy
    pub fn passes_criteria(&self, id: GroupId, policy: AdmissionPolicy, registry: &mut ItemRegistry) -> bool {
        let Some(group) = self.groups.get(id) else {
            return false;
        };
        let Some(first) = group.items.first().copied() else {
            return false;
        };

        let adv_type = group.info.adv_type;
        if group.info.override_connectable_state {
            return !adv_type.is_legacy_directed() || registry.has_data(first);
        }

        if adv_type.is_connectable() {
            return policy.connectable_allowed
                && (!adv_type.is_legacy_directed() || registry.has_data(first));
        }

        policy.advertising_allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::StaticItem;

    fn create_test_registry() -> ItemRegistry {
        ItemRegistry::new(8)
    }

    fn register(registry: &mut ItemRegistry, info: ItemInfo, data: Vec<u8>) -> ItemHandle {
        registry.add(Box::new(StaticItem::new(info, data))).unwrap()
    }

    #[test]
    fn test_group_reuse_requires_matching_params() {
        let mut groups = GroupTable::new(4);
        let info = ItemInfo::advert(AdvType::LEGACY_NON_CONNECTABLE, 10);
        let params = ItemParams::default();
        let id = groups.create(info, params, true).unwrap();

        assert_eq!(groups.group_for_params(&info, &params, true), Some(id));
        assert_eq!(groups.group_for_params(&info, &params, false), None);
        assert_eq!(
            groups.group_for_params(&info, &params.with_interval(32, 48), true),
            None
        );
        assert_eq!(
            groups.group_for_params(&info.with_own_set(true), &params, true),
            None
        );
    }

    #[test]
    fn test_destroy_requires_empty_group() {
        let mut groups = GroupTable::new(2);
        let mut packer = SetPacker::new(2);
        let mut registry = create_test_registry();
        let item = register(&mut registry, ItemInfo::advert(AdvType::LEGACY_NON_CONNECTABLE, 4), vec![1; 4]);

        let id = groups
            .create(ItemInfo::advert(AdvType::LEGACY_NON_CONNECTABLE, 4), ItemParams::default(), true)
            .unwrap();
        groups.add_item(id, item).unwrap();
        assert_eq!(groups.destroy(id), Err(ContractError::GroupNotEmpty(id)));

        assert!(groups.remove_item(id, item, &mut packer).unwrap());
        groups.destroy(id).unwrap();
        assert_eq!(groups.destroy(id), Err(ContractError::UnknownGroup(id)));
    }

    #[test]
    fn test_remove_item_purges_group_sets() {
        let mut groups = GroupTable::new(1);
        let mut packer = SetPacker::new(2);
        let mut registry = create_test_registry();
        let info = ItemInfo::advert(AdvType::EXTENDED_SCANNABLE, 8);
        let item = register(&mut registry, info, vec![2; 8]);

        let id = groups.create(info, ItemParams::default(), true).unwrap();
        let set = packer.create_advertising(255, crate::types::AdvHandle::new(1)).unwrap();
        let sr = packer.create_scan_response(255).unwrap();
        groups.add_item(id, item).unwrap();
        groups.add_set(id, set).unwrap();
        groups.set_scan_response_set(id, sr).unwrap();
        packer.add_item(set, item, 8).unwrap();
        packer.add_item(sr, item, 8).unwrap();

        groups.remove_item(id, item, &mut packer).unwrap();
        assert!(packer.get(set).unwrap().is_empty());
        assert!(packer.get(sr).unwrap().is_empty());

        assert_eq!(groups.group_for_set(sr), Some(id));
        assert!(groups.remove_set(id, sr).unwrap());
        assert!(groups.get(id).unwrap().scan_response_set().is_none());
    }

    #[test]
    fn test_scan_response_group_matching() {
        let mut groups = GroupTable::new(4);
        let sr = groups
            .create(ItemInfo::scan_response(AdvType::EXTENDED_SCANNABLE, 5), ItemParams::default(), true)
            .unwrap();
        groups
            .create(
                ItemInfo::scan_response(AdvType::LEGACY_SCANNABLE, 5),
                ItemParams::default(),
                true,
            )
            .unwrap();

        assert_eq!(groups.matching_scan_response_group(AdvType::EXTENDED_SCANNABLE), Some(sr));
        assert_eq!(groups.matching_scan_response_group(AdvType::EXTENDED_CONNECTABLE), None);
    }

    #[test]
    fn test_admission_criteria() {
        let mut groups = GroupTable::new(4);
        let mut registry = create_test_registry();
        let policy = AdmissionPolicy::default();

        let connectable = ItemInfo::advert(AdvType::LEGACY_CONNECTABLE_SCANNABLE, 4);
        let item = register(&mut registry, connectable, vec![1; 4]);
        let id = groups.create(connectable, ItemParams::default(), true).unwrap();
        assert!(!groups.passes_criteria(id, policy, &mut registry));

        groups.add_item(id, item).unwrap();
        assert!(groups.passes_criteria(id, policy, &mut registry));

        let closed = AdmissionPolicy {
            connectable_allowed: false,
            ..policy
        };
        assert!(!groups.passes_criteria(id, closed, &mut registry));

        let directed = ItemInfo::advert(AdvType::LEGACY_DIRECTED, 0).overriding_connectable_state();
        let quiet = register(&mut registry, directed, Vec::new());
        let directed_group = groups.create(directed, ItemParams::default(), true).unwrap();
        groups.add_item(directed_group, quiet).unwrap();
        assert!(!groups.passes_criteria(directed_group, closed, &mut registry));

        let broadcast = ItemInfo::advert(AdvType::LEGACY_NON_CONNECTABLE, 4);
        let beacon = register(&mut registry, broadcast, vec![3; 4]);
        let beacon_group = groups.create(broadcast, ItemParams::default(), true).unwrap();
        groups.add_item(beacon_group, beacon).unwrap();
        assert!(groups.passes_criteria(beacon_group, closed, &mut registry));
        let silenced = AdmissionPolicy {
            advertising_allowed: false,
            ..policy
        };
        assert!(!groups.passes_criteria(beacon_group, silenced, &mut registry));
    }

    #[test]
    fn test_flag_and_scan_response_rules() {
        let mut groups = GroupTable::new(4);
        let connectable = groups
            .create(
                ItemInfo::advert(AdvType::LEGACY_CONNECTABLE_SCANNABLE, 4),
                ItemParams::default(),
                true,
            )
            .unwrap();
        let directed = groups
            .create(ItemInfo::advert(AdvType::LEGACY_DIRECTED, 0), ItemParams::default(), true)
            .unwrap();
        let extended = groups
            .create(ItemInfo::advert(AdvType::EXTENDED_SCANNABLE, 4), ItemParams::default(), true)
            .unwrap();

        assert!(groups.get(connectable).unwrap().gap_flags_apply());
        assert!(!groups.get(directed).unwrap().gap_flags_apply());
        assert!(groups.get(extended).unwrap().scan_response_applies());
        assert!(!groups.get(connectable).unwrap().scan_response_applies());

        for id in groups.keys() {
            groups.get_mut(id).unwrap().clear_dirty();
        }
        assert_eq!(groups.mark_dirty_where(Group::gap_flags_apply), 1);
        assert!(groups.get(connectable).unwrap().needs_refresh());
        assert!(!groups.get(extended).unwrap().needs_refresh());
    }
}
