//! Homework phases and their local side effects.
//!
//! Phases are owned by the backend: the kiosk only validates that a user
//! request fits the current phase and waits for the next snapshot. What it
//! does own are the per-item timers: the elapsed counter of a performing item
//! and the attention pulse of an item awaiting confirmation. Both are keyed
//! by item id and cancelled whenever the snapshot is replaced.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use embassy_time::{Duration, Instant};

use crate::command::HomeworkAction;
use crate::error::CommandError;
use crate::kiosk::Tick;
use crate::schema::{HomeworkItem, Phase};
use crate::timer::{Scheduler, TimerId};

impl Phase {
    /// The one request a user may make in this phase, if any.
    pub fn permitted_action(self) -> Option<HomeworkAction> {
        match self {
            Phase::Waiting => Some(HomeworkAction::Start),
            Phase::Performing => Some(HomeworkAction::Submit),
            Phase::SubmittedPending => None,
            Phase::ConfirmPending => Some(HomeworkAction::Wait),
        }
    }
}

/// Output of a homework timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal<'a> {
    /// Seconds spent performing: server base plus local elapsed time.
    Elapsed { item_id: &'a str, seconds: u64 },
    /// One short alert pulse for an item waiting for confirmation.
    Attention { item_id: &'a str },
}

#[derive(Debug)]
struct ElapsedCounter {
    timer: TimerId,
    base: u64,
    started: Instant,
}

#[derive(Debug, Default)]
struct ItemTimers {
    elapsed: Option<ElapsedCounter>,
    attention: Option<TimerId>,
}

#[derive(Debug)]
pub struct HomeworkStateMachine {
    items: Vec<HomeworkItem>,
    timers: BTreeMap<String, ItemTimers>,
    tick: Duration,
    attention_period: Duration,
}

impl HomeworkStateMachine {
    pub fn new(tick: Duration, attention_period: Duration) -> Self {
        Self {
            items: Vec::new(),
            timers: BTreeMap::new(),
            tick,
            attention_period,
        }
    }

    pub fn items(&self) -> &[HomeworkItem] {
        &self.items
    }

    pub fn item(&self, item_id: &str) -> Option<&HomeworkItem> {
        self.items.iter().find(|item| item.item_id == item_id)
    }

    /// Installs a full snapshot. Every timer of the previous set is
    /// cancelled first, then timers are started for the new phases.
    pub fn replace(
        &mut self,
        items: Vec<HomeworkItem>,
        scheduler: &mut Scheduler<Tick>,
        now: Instant,
    ) {
        self.clear(scheduler);

        for item in items {
            if self.timers.contains_key(&item.item_id) {
                warn!("homework: duplicate item id in snapshot, keeping the first");
                continue;
            }
            let mut timers = ItemTimers::default();
            match item.phase {
                Phase::Performing => {
                    timers.elapsed = Some(ElapsedCounter {
                        timer: scheduler.schedule_repeating(now + self.tick, self.tick, Tick::Elapsed),
                        base: item.accumulated_seconds,
                        started: now,
                    });
                }
                Phase::ConfirmPending => {
                    timers.attention = Some(scheduler.schedule_repeating(
                        now,
                        self.attention_period,
                        Tick::Attention,
                    ));
                }
                Phase::Waiting | Phase::SubmittedPending => {}
            }
            self.timers.insert(item.item_id.clone(), timers);
            self.items.push(item);
        }
        debug!(
            "homework: installed {} items, {} timers live",
            self.items.len(),
            scheduler.len()
        );
    }

    /// Drops every item and cancels every timer they own.
    pub fn clear(&mut self, scheduler: &mut Scheduler<Tick>) {
        for (_, timers) in core::mem::take(&mut self.timers) {
            if let Some(counter) = timers.elapsed {
                scheduler.cancel(counter.timer);
            }
            if let Some(id) = timers.attention {
                scheduler.cancel(id);
            }
        }
        self.items.clear();
    }

    /// The request implied by tapping an item's card.
    pub fn action_for_tap(&self, item_id: &str) -> Result<HomeworkAction, CommandError> {
        let item = self.item(item_id).ok_or(CommandError::UnknownItem)?;
        item.phase.permitted_action().ok_or(CommandError::ReadOnly)
    }

    /// Checks an explicit request against the item's current phase.
    pub fn check_request(&self, item_id: &str, action: HomeworkAction) -> Result<(), CommandError> {
        let permitted = self.action_for_tap(item_id)?;
        if permitted != action {
            debug!(
                "homework: {} refused, item expects {}",
                action.as_str(),
                permitted.as_str()
            );
            return Err(CommandError::PhaseMismatch);
        }
        Ok(())
    }

    pub fn elapsed_seconds(&self, item_id: &str, now: Instant) -> Option<u64> {
        let counter = self.timers.get(item_id)?.elapsed.as_ref()?;
        Some(counter.base + now.saturating_duration_since(counter.started).as_secs())
    }

    /// Resolves a fired timer to its signal. Timers that no longer belong to
    /// any item resolve to `None`.
    pub fn on_timer(&self, id: TimerId, now: Instant) -> Option<Signal<'_>> {
        self.timers.iter().find_map(|(item_id, timers)| {
            if let Some(counter) = &timers.elapsed
                && counter.timer == id
            {
                return Some(Signal::Elapsed {
                    item_id,
                    seconds: counter.base
                        + now.saturating_duration_since(counter.started).as_secs(),
                });
            }
            (timers.attention == Some(id)).then_some(Signal::Attention { item_id })
        })
    }
}
