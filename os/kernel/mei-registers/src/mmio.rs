use crate::RegisterWindow;
use core::ptr::NonNull;

/// A register window backed by memory-mapped I/O.
pub struct MmioWindow {
    base: NonNull<u8>,
    len: usize,
}

// Safety: the window only performs volatile 32-bit accesses; the device
// tolerates them from any CPU.
unsafe impl Send for MmioWindow {}
unsafe impl Sync for MmioWindow {}

impl MmioWindow {
    /// Wraps a mapped register window.
    ///
    /// # Safety
    /// `base` must point to a mapping of at least `len` bytes of device
    /// registers that stays valid (and uncached) for the lifetime of the
    /// window.
    #[must_use]
    pub const unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn register(&self, offset: usize) -> *mut u32 {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "register offset {offset:#x} outside of window"
        );
        // SAFETY: bounds checked above; the mapping is valid per `new`.
        unsafe { self.base.as_ptr().add(offset).cast::<u32>() }
    }
}

impl RegisterWindow for MmioWindow {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: aligned, in-bounds register address.
        unsafe { self.register(offset).read_volatile() }
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        // SAFETY: aligned, in-bounds register address.
        unsafe { self.register(offset).write_volatile(value) }
    }
}
