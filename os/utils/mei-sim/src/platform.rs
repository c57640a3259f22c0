use crate::config::SimConfig;
use crate::device::{Fragment, SimDevice};
use log::trace;
use mei_engine::{DeviceMessage, DmaError, DmaRegion, HostRequest, Instant, Platform};
use mei_registers::{D0i3Control, H_CB_WW, H_CSR, H_D0I3C, HostCsr, ME_CB_RW, ME_CSR_HA, RegisterWindow};
use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::time::Duration;

/// Register window of the simulated device.
pub struct SimWindow {
    device: RefCell<SimDevice>,
}

impl RegisterWindow for SimWindow {
    fn read32(&self, offset: usize) -> u32 {
        let mut device = self.device.borrow_mut();
        match offset {
            H_CSR => device.host_csr().into_bits(),
            ME_CSR_HA => device.me_csr().into_bits(),
            ME_CB_RW => device.read_me_slot(),
            H_D0I3C => device.d0i3().into_bits(),
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut device = self.device.borrow_mut();
        match offset {
            H_CSR => device.write_host_csr(value),
            H_CB_WW => device.write_host_slot(value),
            H_D0I3C => device.write_d0i3(value),
            _ => trace!("sim: ignoring write of {value:#010x} to {offset:#x}"),
        }
    }
}

/// The simulated environment an [`Engine`](mei_engine::Engine) runs in.
pub struct SimPlatform {
    window: SimWindow,
    dma: BTreeMap<usize, usize>,
    next_dma: usize,
    dma_clears: usize,
}

impl SimPlatform {
    /// Base of the fake bus addresses handed out for DMA memory.
    const DMA_BASE: u64 = 0x8000_0000;

    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        Self {
            window: SimWindow {
                device: RefCell::new(SimDevice::new(config)),
            },
            dma: BTreeMap::new(),
            next_dma: 0,
            dma_clears: 0,
        }
    }

    fn device(&self) -> Ref<'_, SimDevice> {
        self.window.device.borrow()
    }

    fn with_device<R>(&self, f: impl FnOnce(&mut SimDevice) -> R) -> R {
        f(&mut self.window.device.borrow_mut())
    }

    /// Moves the clock forward, running every device event on the way.
    pub fn advance(&self, duration: Duration) {
        self.with_device(|device| {
            let target = device.now.saturating_add(duration);
            while let Some(at) = device.next_event().filter(|at| *at <= target) {
                device.now = device.now.max(at);
                device.run_due_events();
            }
            device.now = target;
        });
    }

    /// Host bus requests the ME received, oldest first.
    #[must_use]
    pub fn host_requests(&self) -> Vec<HostRequest> {
        self.device().requests.clone()
    }

    /// Client fragments the ME received.
    #[must_use]
    pub fn client_fragments(&self) -> Vec<Fragment> {
        self.device().fragments.clone()
    }

    /// Complete client messages the ME received.
    #[must_use]
    pub fn client_messages(&self) -> Vec<Vec<u8>> {
        self.device().messages.clone()
    }

    /// Host resets the ME saw.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.device().resets
    }

    /// Slots the host tried to write into a full buffer.
    #[must_use]
    pub fn host_overflows(&self) -> usize {
        self.device().host_overflows
    }

    #[must_use]
    pub fn host_csr(&self) -> HostCsr {
        self.device().host_csr()
    }

    #[must_use]
    pub fn d0i3(&self) -> D0i3Control {
        self.device().d0i3()
    }

    /// DMA regions currently allocated.
    #[must_use]
    pub fn dma_regions(&self) -> usize {
        self.dma.len()
    }

    #[must_use]
    pub const fn dma_clears(&self) -> usize {
        self.dma_clears
    }

    /// Stops the ME from consuming the host buffer.
    pub fn set_stalled(&self, stalled: bool) {
        self.with_device(|device| {
            if stalled {
                device.stalled = true;
            } else {
                device.unstall();
            }
        });
    }

    /// Stops the ME from answering host bus requests.
    pub fn set_responsive(&self, responsive: bool) {
        self.with_device(|device| device.responsive = responsive);
    }

    /// Changes the device behavior; takes effect with the next event.
    pub fn configure(&self, f: impl FnOnce(&mut SimConfig)) {
        self.with_device(|device| f(&mut device.config));
    }

    /// Sends a client message from the ME.
    pub fn push_client_message(&self, me_addr: u8, data: &[u8]) {
        self.with_device(|device| device.send_client_message(me_addr, data));
    }

    /// Sends a host bus message from the ME.
    pub fn push_device_message(&self, message: &DeviceMessage) {
        self.with_device(|device| device.send_device_message(message));
    }

    /// Puts raw slots into the ME buffer as one message.
    pub fn push_raw(&self, slots: Vec<u32>) {
        self.with_device(|device| device.send_raw(slots));
    }

    /// The ME drops its ready bit and interrupts the host.
    pub fn drop_ready(&self) {
        self.with_device(SimDevice::drop_ready);
    }

    /// Moves the host write pointer `slots` ahead of the read pointer
    /// without writing anything, as a glitching device would.
    pub fn skew_host_write_pointer(&self, slots: u8) {
        self.with_device(|device| device.skew_host_write_pointer(slots));
    }
}

impl Platform for SimPlatform {
    type Window = SimWindow;

    fn window(&self) -> &Self::Window {
        &self.window
    }

    fn now(&self) -> Instant {
        self.device().now
    }

    fn wait_for_interrupt(&mut self, deadline: Instant) -> bool {
        self.with_device(|device| loop {
            device.run_due_events();
            if device.interrupt_pending() {
                return true;
            }
            match device.next_event() {
                Some(at) if at <= deadline => device.now = device.now.max(at),
                _ => {
                    device.now = device.now.max(deadline);
                    return false;
                }
            }
        })
    }

    fn allocate_dma(&mut self, size: usize) -> Result<DmaRegion, DmaError> {
        if self.device().config.dma_exhausted {
            return Err(DmaError::OutOfMemory { size });
        }
        let handle = self.next_dma;
        self.next_dma += 1;
        self.dma.insert(handle, size);
        let offset = u64::try_from(handle).unwrap_or(0) << 20;
        Ok(DmaRegion {
            handle,
            physical: Self::DMA_BASE + offset,
            size,
        })
    }

    fn release_dma(&mut self, region: DmaRegion) {
        self.dma.remove(&region.handle);
    }

    fn clear_dma(&mut self, _region: &DmaRegion) {
        self.dma_clears += 1;
    }
}
