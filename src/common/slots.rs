//! Per-robot slot arena
//!
//! Robot ids are small and dense, so per-robot state lives in a vector
//! indexed by [`RobotId`] instead of a hash map.

use crate::common::types::RobotId;

/// One optional slot per robot id
#[derive(Debug, Clone)]
pub struct RobotSlots<T> {
    entries: Vec<Option<T>>,
}

impl<T> RobotSlots<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn with_capacity(robots: usize) -> Self {
        let mut entries = Vec::with_capacity(robots);
        entries.resize_with(robots, || None);
        Self { entries }
    }

    pub fn get(&self, id: RobotId) -> Option<&T> {
        self.entries.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: RobotId) -> Option<&mut T> {
        self.entries.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: RobotId) -> bool {
        self.get(id).is_some()
    }

    pub fn insert(&mut self, id: RobotId, value: T) -> Option<T> {
        self.grow_to(id);
        self.entries[id.index()].replace(value)
    }

    pub fn get_or_insert_with<F: FnOnce() -> T>(&mut self, id: RobotId, make: F) -> &mut T {
        self.grow_to(id);
        self.entries[id.index()].get_or_insert_with(make)
    }

    pub fn remove(&mut self, id: RobotId) -> Option<T> {
        self.entries.get_mut(id.index()).and_then(Option::take)
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|slot| *slot = None);
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (RobotId, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|value| (RobotId(i as u8), value)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (RobotId, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|value| (RobotId(i as u8), value)))
    }

    /// Raw slot storage, indexed by `RobotId::index`
    pub fn entries_mut(&mut self) -> &mut [Option<T>] {
        &mut self.entries
    }

    fn grow_to(&mut self, id: RobotId) {
        if self.entries.len() <= id.index() {
            self.entries.resize_with(id.index() + 1, || None);
        }
    }
}

impl<T> Default for RobotSlots<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_insert_and_remove() {
        let mut slots = RobotSlots::new();
        assert!(slots.is_empty());
        slots.insert(RobotId(3), 1.5);
        assert_eq!(slots.get(RobotId(3)), Some(&1.5));
        assert_eq!(slots.get(RobotId(2)), None);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots.remove(RobotId(3)), Some(1.5));
        assert_eq!(slots.remove(RobotId(9)), None);
        assert!(slots.is_empty());
    }

    #[test]
    fn test_slots_get_or_insert_with_keeps_existing() {
        let mut slots = RobotSlots::with_capacity(2);
        *slots.get_or_insert_with(RobotId(1), || 10) += 1;
        *slots.get_or_insert_with(RobotId(1), || 10) += 1;
        assert_eq!(slots.get(RobotId(1)), Some(&12));
    }

    #[test]
    fn test_slots_iter_reports_ids() {
        let mut slots = RobotSlots::new();
        slots.insert(RobotId(4), "a");
        slots.insert(RobotId(0), "b");
        let ids: Vec<RobotId> = slots.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![RobotId(0), RobotId(4)]);
    }
}
