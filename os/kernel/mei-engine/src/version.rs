use core::fmt;

/// Host bus protocol version.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusVersion {
    pub major: u8,
    pub minor: u8,
}

impl BusVersion {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    const fn at_least(self, major: u8, minor: u8) -> bool {
        self.major > major || (self.major == major && self.minor >= minor)
    }
}

impl fmt::Display for BusVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Optional bus features available at a negotiated version.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Features {
    /// Power gating isolation (1.1).
    pub power_gating: bool,
    /// Dynamic client add (2.0).
    pub dynamic_clients: bool,
    /// Immediate enumeration reply (2.0).
    pub immediate_enum: bool,
    /// Disconnect on timeout (2.0).
    pub disconnect_on_timeout: bool,
    /// Event notifications (2.0).
    pub event: bool,
    /// Fixed address clients (2.0).
    pub fixed_address: bool,
    /// OS version message (2.0).
    pub os_version: bool,
    /// DMA ring (2.1).
    pub dma_ring: bool,
    /// Virtual tags (2.2).
    pub vtag: bool,
    /// Capabilities negotiation (2.2).
    pub capabilities: bool,
    /// Client DMA (2.2).
    pub client_dma: bool,
}

impl Features {
    #[must_use]
    pub const fn for_version(version: BusVersion) -> Self {
        let v2 = version.major >= 2;
        Self {
            power_gating: version.at_least(1, 1),
            dynamic_clients: v2,
            immediate_enum: v2,
            disconnect_on_timeout: v2,
            event: v2,
            fixed_address: v2,
            os_version: v2,
            dma_ring: version.at_least(2, 1),
            vtag: version.at_least(2, 2),
            capabilities: version.at_least(2, 2),
            client_dma: version.at_least(2, 2),
        }
    }
}
