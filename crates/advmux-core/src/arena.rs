//! Fixed-capacity slot arena
//!
//! Backs every bounded table in the scheduler (items, groups, sets). Slots are
//! reused lowest-index first and carry a generation so stale keys miss.

use core::marker::PhantomData;

use crate::types::SlotKey;

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Bounded table of values addressed by typed index/generation keys
#[derive(Debug)]
pub struct Arena<K, T> {
    slots: Vec<Slot<T>>,
    capacity: usize,
    len: usize,
    _key: PhantomData<K>,
}

impl<K, T> Arena<K, T>
where
    K: Copy + From<SlotKey> + Into<SlotKey>,
{
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            len: 0,
            _key: PhantomData,
        }
    }

    /// Store `value`, handing it back if every slot is taken
    pub fn insert(&mut self, value: T) -> Result<K, T> {
        if let Some(index) = self.slots.iter().position(|slot| slot.value.is_none()) {
            let slot = &mut self.slots[index];
            slot.value = Some(value);
            self.len += 1;
            return Ok(K::from(SlotKey::new(index as u16, slot.generation)));
        }

        if self.slots.len() >= self.capacity {
            return Err(value);
        }

        let index = self.slots.len();
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(K::from(SlotKey::new(index as u16, 0)))
    }

    pub fn remove(&mut self, key: K) -> Option<T> {
        let key: SlotKey = key.into();
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, key: K) -> Option<&T> {
        let key: SlotKey = key.into();
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let key: SlotKey = key.into();
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (K::from(SlotKey::new(index as u16, slot.generation)), value))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|value| (K::from(SlotKey::new(index as u16, generation)), value))
        })
    }

    /// Snapshot of live keys, for walks that mutate the arena
    pub fn keys(&self) -> Vec<K> {
        self.iter().map(|(key, _)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupId;

    #[test]
    fn test_insert_until_full() {
        let mut arena: Arena<GroupId, &str> = Arena::with_capacity(2);
        assert!(arena.insert("a").is_ok());
        assert!(arena.insert("b").is_ok());
        assert_eq!(arena.insert("c"), Err("c"));
        assert!(arena.is_full());
    }

    #[test]
    fn test_stale_key_misses_after_reuse() {
        let mut arena: Arena<GroupId, u32> = Arena::with_capacity(1);
        let first = arena.insert(1).unwrap();
        assert_eq!(arena.remove(first), Some(1));
        let second = arena.insert(2).unwrap();

        assert_ne!(first, second);
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second), Some(&2));
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_iteration_follows_slot_order() {
        let mut arena: Arena<GroupId, char> = Arena::with_capacity(4);
        let a = arena.insert('a').unwrap();
        arena.insert('b').unwrap();
        arena.insert('c').unwrap();
        arena.remove(a);
        arena.insert('d').unwrap();

        let values: Vec<char> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!['d', 'b', 'c']);
    }
}
