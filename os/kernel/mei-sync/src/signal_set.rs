use core::sync::atomic::{AtomicU32, Ordering};

/// A single-shot signal identified by its bit index (0..32).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Signal(u8);

impl Signal {
    /// # Panics
    /// Panics if `bit` is not below 32.
    #[must_use]
    pub const fn new(bit: u8) -> Self {
        assert!(bit < 32, "signal bit out of range");
        Self(bit)
    }

    #[inline]
    #[must_use]
    pub const fn mask(self) -> u32 {
        1 << self.0
    }
}

/// A set of pending, coalesced signals.
///
/// Raising a signal that is already pending has no effect, so each signal
/// is delivered at most once per [`take`](Self::take) no matter how often
/// it was raised in between. Raising is lock-free and may happen from
/// interrupt context.
pub struct SignalSet {
    pending: AtomicU32,
}

impl Default for SignalSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
        }
    }

    /// Marks `signal` as pending. Returns `true` if it was not pending before.
    #[inline]
    pub fn raise(&self, signal: Signal) -> bool {
        let prev = self.pending.fetch_or(signal.mask(), Ordering::AcqRel);
        prev & signal.mask() == 0
    }

    /// Consumes `signal` if pending.
    #[inline]
    pub fn take(&self, signal: Signal) -> bool {
        let prev = self.pending.fetch_and(!signal.mask(), Ordering::AcqRel);
        prev & signal.mask() != 0
    }

    /// Drops `signal` without running it.
    #[inline]
    pub fn cancel(&self, signal: Signal) {
        self.pending.fetch_and(!signal.mask(), Ordering::AcqRel);
    }

    #[inline]
    pub fn is_pending(&self, signal: Signal) -> bool {
        self.pending.load(Ordering::Acquire) & signal.mask() != 0
    }

    #[inline]
    pub fn any_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }

    /// Drops every pending signal.
    #[inline]
    pub fn clear(&self) {
        self.pending.store(0, Ordering::Release);
    }
}
