//! Set Packer
//!
//! Logical advertising sets and the bookkeeping that places items into them.
//! A set records which items it carries, in wire order, together with the size
//! each item had when it was packed, and tracks the lifecycle work still owed
//! to the controller. Advertising sets own a hardware handle; the shared
//! scan-response set of a group does not.

use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, error};

use crate::arena::Arena;
use crate::errors::ContractError;
use crate::registry::ItemRegistry;
use crate::set_sm::SmTable;
use crate::types::{AdvHandle, ItemHandle, SetId};

/// One item placed in a set, with the size it was packed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SetEntry {
    pub item: ItemHandle,
    pub size: usize,
}

/// Work still owed to the controller for a set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SetFlags {
    pub needs_registering: bool,
    pub needs_params_update: bool,
    pub needs_data_update: bool,
    pub needs_enabling: bool,
    pub needs_disabling: bool,
    pub needs_destroying: bool,
}

impl SetFlags {
    pub fn any(&self) -> bool {
        self.needs_registering
            || self.needs_params_update
            || self.needs_data_update
            || self.needs_enabling
            || self.needs_disabling
            || self.needs_destroying
    }
}

// ----------------------------------------------------------------------------
// Advertising Set
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct AdvSet {
    entries: SmallVec<[SetEntry; 4]>,
    capacity: usize,
    free_space: usize,
    pub flags: SetFlags,
    pub active: bool,
    busy: bool,
    hardware: Option<AdvHandle>,
    /// Re-enable once a rotation suspend confirms
    pub resume_after_disable: bool,
}

impl AdvSet {
    /// A set backed by hardware; it owes the controller the full bring-up sequence
    pub fn new_advertising(capacity: usize, hardware: AdvHandle) -> Self {
        Self {
            entries: SmallVec::new(),
            capacity,
            free_space: capacity,
            flags: SetFlags {
                needs_registering: true,
                needs_params_update: true,
                needs_data_update: true,
                needs_enabling: true,
                ..SetFlags::default()
            },
            active: false,
            busy: false,
            hardware: Some(hardware),
            resume_after_disable: false,
        }
    }

    /// A group's shared scan-response set
    pub fn new_scan_response(capacity: usize) -> Self {
        Self {
            entries: SmallVec::new(),
            capacity,
            free_space: capacity,
            flags: SetFlags::default(),
            active: false,
            busy: false,
            hardware: None,
            resume_after_disable: false,
        }
    }

    pub fn entries(&self) -> &[SetEntry] {
        &self.entries
    }

    pub fn items(&self) -> impl Iterator<Item = ItemHandle> + '_ {
        self.entries.iter().map(|entry| entry.item)
    }

    pub fn contains(&self, item: ItemHandle) -> bool {
        self.entries.iter().any(|entry| entry.item == item)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_space(&self) -> usize {
        self.free_space
    }

    pub fn space_used(&self) -> usize {
        self.capacity - self.free_space
    }

    pub fn hardware(&self) -> Option<AdvHandle> {
        self.hardware
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Whether the next drive pass has anything to do for this set
    pub fn has_pending_work(&self) -> bool {
        self.hardware.is_some() && self.flags.any()
    }
}

// ----------------------------------------------------------------------------
// Packer
// ----------------------------------------------------------------------------

/// Table of logical sets plus the operations that pack items into them
#[derive(Debug)]
pub struct SetPacker {
    sets: Arena<SetId, AdvSet>,
}

impl SetPacker {
    pub fn new(capacity: usize) -> Self {
        Self {
            sets: Arena::with_capacity(capacity),
        }
    }

    /// Declared size of an item, as the packer will account for it
    pub fn item_size(registry: &ItemRegistry, item: ItemHandle) -> Result<usize, ContractError> {
        registry
            .info(item)
            .map(|info| info.data_size)
            .ok_or(ContractError::UnknownItem(item))
    }

    pub fn create_advertising(&mut self, capacity: usize, hardware: AdvHandle) -> Option<SetId> {
        let id = self.sets.insert(AdvSet::new_advertising(capacity, hardware)).ok()?;
        debug!(set = %id, adv_handle = %hardware, capacity, "advertising set created");
        Some(id)
    }

    pub fn create_scan_response(&mut self, capacity: usize) -> Option<SetId> {
        let id = self.sets.insert(AdvSet::new_scan_response(capacity)).ok()?;
        debug!(set = %id, capacity, "scan response set created");
        Some(id)
    }

    pub fn get(&self, set: SetId) -> Option<&AdvSet> {
        self.sets.get(set)
    }

    pub fn get_mut(&mut self, set: SetId) -> Option<&mut AdvSet> {
        self.sets.get_mut(set)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SetId, &AdvSet)> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// The set driven through `handle`
    pub fn by_hardware(&self, handle: AdvHandle) -> Option<SetId> {
        self.sets
            .iter()
            .find(|(_, set)| set.hardware == Some(handle))
            .map(|(id, _)| id)
    }

    pub fn any_busy(&self) -> bool {
        self.sets.iter().any(|(_, set)| set.busy)
    }

    /// Take the busy lock; false if it is already held
    pub fn lock(&mut self, set: SetId) -> bool {
        match self.sets.get_mut(set) {
            Some(set) if !set.busy => {
                set.busy = true;
                true
            }
            _ => false,
        }
    }

    pub fn release(&mut self, set: SetId) {
        if let Some(set) = self.sets.get_mut(set) {
            set.busy = false;
        }
    }

    /// First set in `candidates` with at least `needed` octets free
    ///
    /// Sets already marked for destruction are never reused.
    pub fn find_set_with_free_space(&self, candidates: &[SetId], needed: usize) -> Option<SetId> {
        candidates.iter().copied().find(|id| {
            self.sets
                .get(*id)
                .map_or(false, |set| !set.flags.needs_destroying && set.free_space >= needed)
        })
    }

    pub fn add_item(&mut self, set: SetId, item: ItemHandle, size: usize) -> Result<(), ContractError> {
        self.insert_entry(set, SetEntry { item, size }, false)
    }

    /// Place `item` ahead of everything else; reserved for the GAP flags item
    pub fn prepend_item(&mut self, set: SetId, item: ItemHandle, size: usize) -> Result<(), ContractError> {
        self.insert_entry(set, SetEntry { item, size }, true)
    }

    fn insert_entry(&mut self, id: SetId, entry: SetEntry, front: bool) -> Result<(), ContractError> {
        let set = self.sets.get_mut(id).ok_or(ContractError::UnknownSet(id))?;
        if entry.size > set.free_space {
            return Err(ContractError::SetOverflow {
                set: id,
                size: entry.size,
                free: set.free_space,
            });
        }

        if front {
            set.entries.insert(0, entry);
        } else {
            set.entries.push(entry);
        }
        set.free_space -= entry.size;
        Ok(())
    }

    pub fn remove_item(&mut self, set: SetId, item: ItemHandle) -> bool {
        let Some(set) = self.sets.get_mut(set) else {
            return false;
        };
        let Some(index) = set.entries.iter().position(|entry| entry.item == item) else {
            return false;
        };
        let entry = set.entries.remove(index);
        set.free_space += entry.size;
        true
    }

    /// Remove `item` from every set; returns how many sets held it
    pub fn purge_item(&mut self, item: ItemHandle) -> usize {
        let holders: Vec<SetId> = self
            .sets
            .iter()
            .filter(|(_, set)| set.contains(item))
            .map(|(id, _)| id)
            .collect();
        for set in &holders {
            self.remove_item(*set, item);
        }
        holders.len()
    }

    /// Drop every item assignment, keeping the set and its flags
    pub fn clear(&mut self, set: SetId) {
        if let Some(set) = self.sets.get_mut(set) {
            set.entries.clear();
            set.free_space = set.capacity;
        }
    }

    /// Release an empty set, destroying its state machine first
    pub fn destroy_set(&mut self, id: SetId, machines: &mut SmTable) -> Result<(), ContractError> {
        let set = self.sets.get(id).ok_or(ContractError::UnknownSet(id))?;
        if !set.is_empty() {
            return Err(ContractError::SetNotEmpty {
                set: id,
                items: set.entries.len(),
            });
        }

        if let Some(handle) = set.hardware {
            machines.destroy(handle)?;
        }
        self.sets.remove(id);
        debug!(set = %id, "set destroyed");
        Ok(())
    }

    /// Log any item that appears in more than one of `sets`
    pub fn check_single_membership(&self, sets: &[SetId]) -> bool {
        let mut seen: Vec<ItemHandle> = Vec::new();
        let mut consistent = true;
        for item in sets
            .iter()
            .filter_map(|id| self.sets.get(*id))
            .flat_map(|set| set.items())
        {
            if seen.contains(&item) {
                error!(item = %item, "item found in more than one set of a group");
                consistent = false;
            } else {
                seen.push(item);
            }
        }
        consistent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SlotKey;

    fn create_test_item(index: u16) -> ItemHandle {
        ItemHandle::from(SlotKey::new(index, 0))
    }

    #[test]
    fn test_first_fit_placement() {
        let mut packer = SetPacker::new(4);
        let a = packer.create_advertising(31, AdvHandle::new(1)).unwrap();
        let b = packer.create_advertising(31, AdvHandle::new(2)).unwrap();

        packer.add_item(a, create_test_item(0), 20).unwrap();
        assert_eq!(packer.find_set_with_free_space(&[a, b], 15), Some(b));
        assert_eq!(packer.find_set_with_free_space(&[a, b], 11), Some(a));
        assert_eq!(packer.find_set_with_free_space(&[a], 12), None);
    }

    #[test]
    fn test_overflow_is_rejected_without_mutation() {
        let mut packer = SetPacker::new(1);
        let set = packer.create_advertising(31, AdvHandle::new(1)).unwrap();
        packer.add_item(set, create_test_item(0), 30).unwrap();

        let err = packer.add_item(set, create_test_item(1), 2).unwrap_err();
        assert_eq!(
            err,
            ContractError::SetOverflow {
                set,
                size: 2,
                free: 1
            }
        );
        assert_eq!(packer.get(set).unwrap().entries().len(), 1);
    }

    #[test]
    fn test_prepend_goes_first() {
        let mut packer = SetPacker::new(1);
        let set = packer.create_advertising(31, AdvHandle::new(1)).unwrap();
        packer.add_item(set, create_test_item(1), 10).unwrap();
        packer.prepend_item(set, create_test_item(0), 3).unwrap();

        let order: Vec<_> = packer.get(set).unwrap().items().collect();
        assert_eq!(order, vec![create_test_item(0), create_test_item(1)]);
        assert_eq!(packer.get(set).unwrap().space_used(), 13);
    }

    #[test]
    fn test_remove_restores_free_space() {
        let mut packer = SetPacker::new(1);
        let set = packer.create_scan_response(255).unwrap();
        packer.add_item(set, create_test_item(0), 100).unwrap();
        assert!(packer.remove_item(set, create_test_item(0)));
        assert!(!packer.remove_item(set, create_test_item(0)));
        assert_eq!(packer.get(set).unwrap().free_space(), 255);
    }

    #[test]
    fn test_destroying_sets_are_not_reused() {
        let mut packer = SetPacker::new(1);
        let set = packer.create_advertising(31, AdvHandle::new(1)).unwrap();
        packer.get_mut(set).unwrap().flags.needs_destroying = true;
        assert_eq!(packer.find_set_with_free_space(&[set], 1), None);
    }

    #[test]
    fn test_destroy_requires_empty_set() {
        let mut machines = SmTable::new(1, 2);
        let handle = machines.create().unwrap();
        let mut packer = SetPacker::new(1);
        let set = packer.create_advertising(31, handle).unwrap();
        packer.add_item(set, create_test_item(0), 5).unwrap();

        assert!(matches!(
            packer.destroy_set(set, &mut machines),
            Err(ContractError::SetNotEmpty { items: 1, .. })
        ));

        packer.clear(set);
        packer.destroy_set(set, &mut machines).unwrap();
        assert!(packer.get(set).is_none());
        assert_eq!(machines.in_use(), 0);
    }

    #[test]
    fn test_busy_lock() {
        let mut packer = SetPacker::new(1);
        let set = packer.create_advertising(31, AdvHandle::new(1)).unwrap();
        assert!(packer.lock(set));
        assert!(!packer.lock(set));
        assert!(packer.any_busy());
        packer.release(set);
        assert!(!packer.any_busy());
    }

    #[test]
    fn test_membership_check_flags_duplicates() {
        let mut packer = SetPacker::new(2);
        let a = packer.create_advertising(31, AdvHandle::new(1)).unwrap();
        let b = packer.create_advertising(31, AdvHandle::new(2)).unwrap();
        packer.add_item(a, create_test_item(0), 5).unwrap();
        assert!(packer.check_single_membership(&[a, b]));
        packer.add_item(b, create_test_item(0), 5).unwrap();
        assert!(!packer.check_single_membership(&[a, b]));
        assert_eq!(packer.purge_item(create_test_item(0)), 2);
    }
}
