use crate::error::DmaError;
use core::ops::Add;
use core::time::Duration;
use mei_registers::RegisterWindow;

/// A point on the platform's monotonic clock, in nanoseconds.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64);

impl Instant {
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }

    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Instant {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        self.saturating_add(rhs)
    }
}

/// A DMA-capable memory region handed out by the platform.
#[derive(Debug, PartialEq, Eq)]
pub struct DmaRegion {
    /// Platform-private identifier of the allocation.
    pub handle: usize,
    /// Bus address of the first byte, as seen by the device.
    pub physical: u64,
    pub size: usize,
}

/// Everything the engine needs from its environment.
pub trait Platform {
    type Window: RegisterWindow;

    /// The device's register window.
    fn window(&self) -> &Self::Window;

    fn now(&self) -> Instant;

    /// Idles until the device asserts its interrupt line (`true`) or
    /// `deadline` has passed (`false`).
    fn wait_for_interrupt(&mut self, deadline: Instant) -> bool;

    /// Allocates `size` bytes of zeroed, device-visible memory.
    ///
    /// # Errors
    /// Returns [`DmaError::OutOfMemory`] if the region cannot be provided.
    fn allocate_dma(&mut self, size: usize) -> Result<DmaRegion, DmaError>;

    fn release_dma(&mut self, region: DmaRegion);

    /// Zeroes the whole region.
    fn clear_dma(&mut self, region: &DmaRegion);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::tests::FakeWindow;

    /// A platform whose clock never moves and whose device never interrupts.
    #[derive(Default)]
    pub(crate) struct FakePlatform {
        pub(crate) window: FakeWindow,
    }

    impl Platform for FakePlatform {
        type Window = FakeWindow;

        fn window(&self) -> &FakeWindow {
            &self.window
        }

        fn now(&self) -> Instant {
            Instant::ZERO
        }

        fn wait_for_interrupt(&mut self, _deadline: Instant) -> bool {
            false
        }

        fn allocate_dma(&mut self, size: usize) -> Result<DmaRegion, DmaError> {
            Err(DmaError::OutOfMemory { size })
        }

        fn release_dma(&mut self, _region: DmaRegion) {}

        fn clear_dma(&mut self, _region: &DmaRegion) {}
    }

    #[test]
    fn instant_arithmetic() {
        let t = Instant::from_nanos(1_000);
        let later = t + Duration::from_micros(2);
        assert_eq!(later.as_nanos(), 3_000);
        assert_eq!(later.saturating_duration_since(t), Duration::from_micros(2));
        assert_eq!(t.saturating_duration_since(later), Duration::ZERO);
    }

    #[test]
    fn instant_saturates() {
        let t = Instant::from_nanos(u64::MAX - 1);
        assert_eq!((t + Duration::from_secs(1)).as_nanos(), u64::MAX);
        assert_eq!((Instant::ZERO + Duration::MAX).as_nanos(), u64::MAX);
    }
}
