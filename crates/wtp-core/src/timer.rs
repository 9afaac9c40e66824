//! Named countdown timers.
//!
//! The timer table is the only source of scheduling events for the state
//! machine. It never reads the clock: every operation takes `now`, so the
//! event loop decides what time it is and tests can step time explicitly.

use std::time::{Duration, Instant};

/// Timers used by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// End of a discovery round
    Discovery,
    /// End of sulking
    Silent,
    /// Bound on one handshake attempt
    SecuritySession,
    /// Resend the pending request
    Retransmit,
    /// Send an echo request
    Echo,
    /// Send a keep-alive
    Keepalive,
    /// No keep-alive from the AC for too long
    KeepaliveDead,
    /// Send a statistics event
    Statistics,
}

impl TimerId {
    /// All timers, in table order.
    pub const VALUES: [Self; 8] = [
        Self::Discovery,
        Self::Silent,
        Self::SecuritySession,
        Self::Retransmit,
        Self::Echo,
        Self::Keepalive,
        Self::KeepaliveDead,
        Self::Statistics,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    deadline: Option<Instant>,
    interval: Duration,
}

/// Table of armed timers, one slot per [`TimerId`].
#[derive(Debug, Clone, Default)]
pub struct TimerManager {
    slots: [Slot; TimerId::VALUES.len()],
}

impl TimerManager {
    /// Create a table with every timer disarmed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `id` to fire `interval` after `now`, replacing any earlier deadline.
    pub fn enable(&mut self, id: TimerId, interval: Duration, now: Instant) {
        let slot = &mut self.slots[id.index()];
        slot.interval = interval;
        slot.deadline = Some(now + interval);
        tracing::trace!("Timer {:?} armed for {:?}", id, interval);
    }

    /// Re-arm `id` with the interval it was last enabled with.
    ///
    /// Returns `false` if the timer was never enabled.
    pub fn reset(&mut self, id: TimerId, now: Instant) -> bool {
        let slot = &mut self.slots[id.index()];
        if slot.interval.is_zero() && slot.deadline.is_none() {
            return false;
        }
        slot.deadline = Some(now + slot.interval);
        true
    }

    /// Disarm `id`.
    pub fn disable(&mut self, id: TimerId) {
        self.slots[id.index()].deadline = None;
    }

    /// Disarm every timer.
    pub fn disable_all(&mut self) {
        for slot in &mut self.slots {
            slot.deadline = None;
        }
    }

    /// Whether `id` is armed.
    #[must_use]
    pub fn is_enabled(&self, id: TimerId) -> bool {
        self.slots[id.index()].deadline.is_some()
    }

    /// Deadline of `id`, if armed.
    #[must_use]
    pub fn deadline(&self, id: TimerId) -> Option<Instant> {
        self.slots[id.index()].deadline
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.iter().filter_map(|slot| slot.deadline).min()
    }

    /// Disarm and return the earliest timer whose deadline has passed.
    ///
    /// Call repeatedly until `None` to drain everything due at `now`.
    pub fn poll_expired(&mut self, now: Instant) -> Option<TimerId> {
        let (id, _) = TimerId::VALUES
            .iter()
            .filter_map(|&id| self.deadline(id).map(|deadline| (id, deadline)))
            .filter(|&(_, deadline)| deadline <= now)
            .min_by_key(|&(_, deadline)| deadline)?;
        self.disable(id);
        Some(id)
    }
}
