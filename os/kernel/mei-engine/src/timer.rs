use crate::platform::Instant;
use core::time::Duration;

/// A one-shot deadline.
#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct OneShot {
    deadline: Option<Instant>,
}

impl OneShot {
    /// (Re)arms the timer; an earlier deadline is replaced.
    pub(crate) fn arm(&mut self, now: Instant, after: Duration) {
        self.deadline = Some(now + after);
    }

    pub(crate) const fn cancel(&mut self) {
        self.deadline = None;
    }

    pub(crate) const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarms and returns `true` if the deadline has passed.
    pub(crate) fn fire_if_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Timers {
    /// Handshake step timeout.
    pub(crate) init: OneShot,
    /// Inactivity before power gating.
    pub(crate) idle: OneShot,
}

impl Timers {
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        [self.init.deadline(), self.idle.deadline()]
            .into_iter()
            .flatten()
            .min()
    }
}
