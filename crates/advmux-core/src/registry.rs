//! Item registry
//!
//! Fixed-capacity table of client items. Each registration yields an
//! [`ItemHandle`]; a full table yields `None` and the caller must treat the
//! registration as failed.

use tracing::{debug, warn};

use crate::arena::Arena;
use crate::item::{AdvertisingItem, ItemInfo};
use crate::types::ItemHandle;

/// Registered items, owned on behalf of their clients
#[derive(Debug)]
pub struct ItemRegistry {
    items: Arena<ItemHandle, Box<dyn AdvertisingItem>>,
}

impl ItemRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Arena::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, item: Box<dyn AdvertisingItem>) -> Option<ItemHandle> {
        match self.items.insert(item) {
            Ok(handle) => {
                debug!(item = %handle, count = self.items.len(), "item registered");
                Some(handle)
            }
            Err(_) => {
                warn!(capacity = self.items.capacity(), "item registry full");
                None
            }
        }
    }

    pub fn remove(&mut self, handle: ItemHandle) -> bool {
        let removed = self.items.remove(handle).is_some();
        if removed {
            debug!(item = %handle, count = self.items.len(), "item removed");
        }
        removed
    }

    pub fn contains(&self, handle: ItemHandle) -> bool {
        self.items.contains(handle)
    }

    pub fn get(&self, handle: ItemHandle) -> Option<&dyn AdvertisingItem> {
        self.items.get(handle).map(|item| item.as_ref())
    }

    pub fn get_mut(&mut self, handle: ItemHandle) -> Option<&mut (dyn AdvertisingItem + 'static)> {
        self.items.get_mut(handle).map(|item| item.as_mut())
    }

    pub fn info(&self, handle: ItemHandle) -> Option<ItemInfo> {
        self.get(handle).map(|item| item.info())
    }

    /// Whether the item currently produces any data, releasing it afterwards
    pub fn has_data(&mut self, handle: ItemHandle) -> bool {
        let Some(item) = self.get_mut(handle) else {
            return false;
        };
        let produced = item.data().map_or(false, |data| !data.is_empty());
        if produced {
            item.release_data();
        }
        produced
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::AdvType;
    use crate::wire::StaticItem;

    fn create_test_item(size: usize) -> Box<dyn AdvertisingItem> {
        Box::new(StaticItem::new(
            ItemInfo::advert(AdvType::LEGACY_NON_CONNECTABLE, size),
            vec![0x5A; size],
        ))
    }

    #[test]
    fn test_add_until_capacity() {
        let mut registry = ItemRegistry::new(2);
        assert!(registry.add(create_test_item(3)).is_some());
        assert!(registry.add(create_test_item(4)).is_some());
        assert!(registry.add(create_test_item(5)).is_none());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.capacity(), 2);
    }

    #[test]
    fn test_handles_never_alias() {
        let mut registry = ItemRegistry::new(1);
        let first = registry.add(create_test_item(3)).unwrap();
        assert!(registry.remove(first));
        assert!(!registry.remove(first));

        let second = registry.add(create_test_item(6)).unwrap();
        assert_ne!(first, second);
        assert!(registry.info(first).is_none());
        assert_eq!(registry.info(second).map(|i| i.data_size), Some(6));
    }

    #[test]
    fn test_has_data() {
        let mut registry = ItemRegistry::new(2);
        let full = registry.add(create_test_item(3)).unwrap();
        let empty = registry.add(create_test_item(0)).unwrap();
        assert!(registry.has_data(full));
        assert!(!registry.has_data(empty));
    }
}
