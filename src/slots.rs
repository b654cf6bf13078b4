use std::collections::BTreeSet;

use crate::progress::Slot;

/// Fixed set of display/worker slots. `acquire` always hands out the lowest
/// free slot so a row keeps its identity while the queue drains.
#[derive(Debug)]
pub struct SlotPool {
    free: BTreeSet<Slot>,
    capacity: usize,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: (0..capacity).collect(),
            capacity,
        }
    }

    pub fn acquire(&mut self) -> Option<Slot> {
        self.free.pop_first()
    }

    pub fn release(&mut self, slot: Slot) {
        if slot < self.capacity && !self.free.insert(slot) {
            tracing::warn!(slot, "released a slot that was already free");
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }
}
