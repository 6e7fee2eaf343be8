use crate::{
    error::{Error, Result},
    rng::RNG,
    transition::{Experience, Transition, TransitionId},
};
use rand::{Rng, seq::SliceRandom};
use std::fmt::Display;

/// Fixed capacity ring of transitions. Once full, every push overwrites the oldest entry.
///
/// Populated slots are always either the prefix `[0, len)` (with the write cursor at `len`) or
/// the whole ring, in which case the oldest entry sits under the write cursor.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    slots: Vec<Option<Transition>>,
    cursor: usize,
    count: usize,
    next_id: u64,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            cursor: 0,
            count: 0,
            next_id: 0,
        }
    }

    pub(crate) fn from_parts(
        slots: Vec<Option<Transition>>,
        cursor: usize,
        count: usize,
        next_id: u64,
    ) -> Self {
        Self {
            slots,
            cursor,
            count,
            next_id,
        }
    }

    pub(crate) fn slots(&self) -> &[Option<Transition>] {
        &self.slots
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Slot the next push writes to.
    pub fn write_cursor(&self) -> usize {
        self.cursor
    }

    fn oldest_slot(&self) -> usize {
        if self.count < self.capacity() {
            0
        } else {
            self.cursor
        }
    }

    // chronological position to slot index, the caller guarantees `position < count`
    fn slot_of(&self, position: usize) -> usize {
        (self.oldest_slot() + position) % self.capacity()
    }

    fn get(&self, position: usize) -> Option<&Transition> {
        if position >= self.count {
            return None;
        }
        self.slots[self.slot_of(position)].as_ref()
    }

    /// Stores the experience and returns the stamped transition. A buffer with zero capacity
    /// ignores the push and returns `None`.
    pub fn push(&mut self, experience: Experience) -> Option<&Transition> {
        let capacity = self.capacity();
        if capacity == 0 {
            return None;
        }
        let id = TransitionId(self.next_id);
        self.next_id += 1;
        let slot = self.cursor;
        self.slots[slot] = Some(Transition::new(id, experience));
        self.cursor = (self.cursor + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
        self.slots[slot].as_ref()
    }

    /// Draws `k` distinct transitions uniformly at random using the thread local generator.
    pub fn sample(&self, k: usize) -> Result<Vec<&Transition>> {
        RNG.with_borrow_mut(|rng| self.sample_with(k, rng))
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> Result<Vec<&Transition>> {
        if k > self.count {
            return Err(Error::InsufficientData {
                requested: k,
                available: self.count,
            });
        }
        // populated slots are exactly [0, count) in both layouts
        let batch = rand::seq::index::sample(rng, self.count, k)
            .into_iter()
            .filter_map(|slot| self.slots[slot].as_ref())
            .collect();
        Ok(batch)
    }

    /// The `n` most recently pushed transitions, oldest first. `None` if fewer are stored.
    pub fn last_n(&self, n: usize) -> Option<Vec<&Transition>> {
        if n > self.count {
            return None;
        }
        Some(
            (self.count - n..self.count)
                .filter_map(|position| self.get(position))
                .collect(),
        )
    }

    pub fn last(&self) -> Option<&Transition> {
        self.count.checked_sub(1).and_then(|position| self.get(position))
    }

    /// Stored transitions from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        (0..self.count).filter_map(|position| self.get(position))
    }

    /// Every stored transition in a random order.
    pub fn shuffled(&self) -> Vec<&Transition> {
        let mut all: Vec<_> = self.iter().collect();
        RNG.with_borrow_mut(|rng| all.shuffle(rng));
        all
    }

    /// Changes the capacity while keeping the chronological order. Growing keeps every entry,
    /// shrinking keeps the oldest `new_capacity` ones.
    pub fn resize(&mut self, new_capacity: usize) {
        let old_capacity = self.capacity();
        if new_capacity == old_capacity {
            return;
        }
        let oldest = self.oldest_slot();
        let mut slots = std::mem::take(&mut self.slots);
        slots.rotate_left(oldest);
        let mut entries: Vec<Transition> = slots.into_iter().flatten().collect();
        entries.truncate(new_capacity);
        self.count = entries.len();
        self.slots = entries
            .into_iter()
            .map(Some)
            .chain(std::iter::repeat_with(|| None))
            .take(new_capacity)
            .collect();
        self.cursor = if new_capacity == 0 {
            0
        } else {
            self.count % new_capacity
        };
        tracing::debug!(
            old_capacity,
            new_capacity,
            kept = self.count,
            "resized replay buffer"
        );
    }
}

impl Display for ReplayBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "replay buffer: {} transitions, capacity {}",
            self.count,
            self.capacity()
        )
    }
}
