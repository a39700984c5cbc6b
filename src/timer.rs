//! Deadline table for one-shot and repeating timers.
//!
//! The poll loop asks for [`Scheduler::next_deadline`], sleeps until then and
//! pops due timers one at a time with [`Scheduler::pop_due`]. Handles carry
//! the generation of the slot they were issued for, so a handle that was
//! cancelled (or already fired once) can never fire or cancel whatever reuses
//! its slot later.

use alloc::vec::Vec;

use embassy_time::{Duration, Instant};

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId {
    slot: u32,
    generation: u32,
}

#[derive(Debug)]
struct Entry<T> {
    deadline: Instant,
    period: Option<Duration>,
    tag: T,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Owned timer table, tagged with a caller-defined `T`.
#[derive(Debug)]
pub struct Scheduler<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Fires once at `deadline`.
    pub fn schedule_once(&mut self, deadline: Instant, tag: T) -> TimerId {
        self.insert(Entry {
            deadline,
            period: None,
            tag,
        })
    }

    /// Fires at `first`, then every `period` after that until cancelled.
    pub fn schedule_repeating(&mut self, first: Instant, period: Duration, tag: T) -> TimerId {
        self.insert(Entry {
            deadline: first,
            period: Some(period),
            tag,
        })
    }

    fn insert(&mut self, entry: Entry<T>) -> TimerId {
        match self.free.pop() {
            Some(slot) => {
                let s = &mut self.slots[slot as usize];
                s.entry = Some(entry);
                TimerId {
                    slot,
                    generation: s.generation,
                }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                TimerId {
                    slot,
                    generation: 0,
                }
            }
        }
    }

    fn live_slot(&self, id: TimerId) -> Option<&Slot<T>> {
        self.slots
            .get(id.slot as usize)
            .filter(|s| s.generation == id.generation && s.entry.is_some())
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.live_slot(id).is_some()
    }

    /// Cancels `id`; returns `false` if it had already fired or been cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if self.live_slot(id).is_none() {
            return false;
        }
        self.release(id.slot);
        true
    }

    fn release(&mut self, slot: u32) -> Option<Entry<T>> {
        let s = &mut self.slots[slot as usize];
        let entry = s.entry.take();
        s.generation = s.generation.wrapping_add(1);
        self.free.push(slot);
        entry
    }

    /// Earliest pending deadline, if any timer is live.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter_map(|s| s.entry.as_ref().map(|e| e.deadline))
            .min()
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Scheduler<T> {
    /// Pops the earliest timer whose deadline is at or before `now`.
    ///
    /// Repeating timers are re-armed one period after their previous
    /// deadline, skipping periods that were missed entirely, so a stalled
    /// loop produces one catch-up tick rather than a burst.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, T)> {
        let (slot, _) = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.entry.as_ref().map(|e| (i, e.deadline)))
            .filter(|(_, deadline)| *deadline <= now)
            .min_by_key(|(_, deadline)| *deadline)?;

        let id = TimerId {
            slot: slot as u32,
            generation: self.slots[slot].generation,
        };
        let period = self.slots[slot].entry.as_ref()?.period;
        match period {
            Some(period) if period.as_ticks() > 0 => {
                let entry = self.slots[slot].entry.as_mut()?;
                let tag = entry.tag.clone();
                let mut next = entry.deadline + period;
                while next <= now {
                    next += period;
                }
                entry.deadline = next;
                Some((id, tag))
            }
            _ => self.release(slot as u32).map(|e| (id, e.tag)),
        }
    }
}
