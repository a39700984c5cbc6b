//! Rate limiting for user taps and backend refresh bursts.
//!
//! The two limiters are deliberately separate types with separate state: a
//! burst of backend snapshots must never swallow a user tap, and the other
//! way round.

use embassy_time::{Duration, Instant};

/// Leading-edge debounce: the first event is accepted, any further event
/// within `window` of the last accepted one is dropped.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    /// Returns `true` and restarts the window if the event is accepted.
    pub fn try_accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted
            && now.saturating_duration_since(last) < self.window
        {
            return false;
        }
        self.last_accepted = Some(now);
        true
    }
}

/// Outcome of offering a snapshot to a [`RefreshGate`].
#[derive(Debug, PartialEq, Eq)]
pub enum Gate<T> {
    /// Apply the value now.
    Apply(T),
    /// Held back; call [`RefreshGate::take_due`] at `until`. `rearm` is
    /// `false` when a deferral was already pending and its deadline stands.
    Deferred { until: Instant, rearm: bool },
}

/// Trailing-edge throttle for full list refreshes.
///
/// A snapshot arriving within `window` of the last applied one is held, and
/// the newest held snapshot is applied when the window closes. Snapshots are
/// full replacements, so dropping the intermediate ones loses nothing.
#[derive(Debug, Clone)]
pub struct RefreshGate<T> {
    window: Duration,
    last_applied: Option<Instant>,
    pending: Option<T>,
}

impl<T> RefreshGate<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_applied: None,
            pending: None,
        }
    }

    pub fn offer(&mut self, now: Instant, value: T) -> Gate<T> {
        match self.last_applied {
            Some(last) if now.saturating_duration_since(last) < self.window => {
                let rearm = self.pending.replace(value).is_none();
                if !rearm {
                    debug!("refresh: superseding a deferred snapshot");
                }
                Gate::Deferred {
                    until: last + self.window,
                    rearm,
                }
            }
            _ => {
                self.pending = None;
                self.last_applied = Some(now);
                Gate::Apply(value)
            }
        }
    }

    /// Releases the held snapshot once its window has closed.
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        let last = self.last_applied?;
        if now.saturating_duration_since(last) < self.window {
            return None;
        }
        let value = self.pending.take()?;
        self.last_applied = Some(now);
        Some(value)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drops anything held back.
    pub fn clear(&mut self) {
        self.pending = None;
    }
}
