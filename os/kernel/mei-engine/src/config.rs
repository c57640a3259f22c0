use crate::uuid::{TOUCH_CLIENT_UUID, Uuid};
use crate::version::BusVersion;
use core::time::Duration;

/// Bounds of every wait the engine performs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// ME ready after a host reset.
    pub hardware_ready: Duration,
    /// Start response after the start request.
    pub bus_start: Duration,
    /// Each step of the initialization handshake.
    pub init_clients: Duration,
    /// Power gating isolation entry response.
    pub pg_isolation: Duration,
    /// D0i3 transition completion.
    pub d0i3: Duration,
    /// Inactivity before power gating is entered.
    pub idle: Duration,
    /// Blocking client sends.
    pub client_send: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            hardware_ready: Duration::from_secs(2),
            bus_start: Duration::from_secs(1),
            init_clients: Duration::from_secs(15),
            pg_isolation: Duration::from_secs(1),
            d0i3: Duration::from_secs(5),
            idle: Duration::from_secs(5),
            client_send: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DmaSizes {
    pub host: usize,
    pub device: usize,
    pub control: usize,
}

impl Default for DmaSizes {
    fn default() -> Self {
        Self {
            host: 0x2_0000,
            device: 0x2_0000,
            control: 4096,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Highest bus version the host speaks.
    pub host_version: BusVersion,
    /// Lowest bus version the host accepts.
    pub min_version: BusVersion,
    pub timeouts: Timeouts,
    /// Consecutive resets before the device is disabled.
    pub max_consecutive_resets: u32,
    /// The one client the engine attaches to.
    pub client_uuid: Uuid,
    /// Offer the DMA ring when the version allows it.
    pub dma_ring: bool,
    /// Offer client DMA when the version allows it.
    pub client_dma: bool,
    pub dma_sizes: DmaSizes,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host_version: BusVersion::new(2, 2),
            min_version: BusVersion::new(1, 0),
            timeouts: Timeouts::default(),
            max_consecutive_resets: 3,
            client_uuid: TOUCH_CLIENT_UUID,
            dma_ring: false,
            client_dma: false,
            dma_sizes: DmaSizes::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn with_min_version(mut self, version: BusVersion) -> Self {
        self.min_version = version;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub const fn with_client_uuid(mut self, uuid: Uuid) -> Self {
        self.client_uuid = uuid;
        self
    }

    #[must_use]
    pub const fn with_dma_ring(mut self, enabled: bool) -> Self {
        self.dma_ring = enabled;
        self
    }

    #[must_use]
    pub const fn with_client_dma(mut self, enabled: bool) -> Self {
        self.client_dma = enabled;
        self
    }

    /// Whether the host can talk `version`.
    #[must_use]
    pub fn supports(&self, version: BusVersion) -> bool {
        (self.min_version..=self.host_version).contains(&version)
    }
}
