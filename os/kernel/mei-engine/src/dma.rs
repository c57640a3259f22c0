use crate::engine::Engine;
use crate::error::DmaError;
use crate::hbm::DmaRingDescriptor;
use crate::platform::{DmaRegion, Platform};
use log::debug;

/// The three regions of the DMA ring: host ring, device ring and the
/// control block holding the ring pointers.
#[derive(Debug, Default)]
pub(crate) struct DmaRings {
    host: Option<DmaRegion>,
    device: Option<DmaRegion>,
    control: Option<DmaRegion>,
}

impl DmaRings {
    pub(crate) const fn is_allocated(&self) -> bool {
        self.host.is_some() && self.device.is_some() && self.control.is_some()
    }

    fn descriptors(&self) -> Option<[DmaRingDescriptor; 3]> {
        let describe = |region: &Option<DmaRegion>| {
            region.as_ref().map(|r| DmaRingDescriptor {
                physical: r.physical,
                size: u32::try_from(r.size).unwrap_or(u32::MAX),
            })
        };
        Some([
            describe(&self.host)?,
            describe(&self.device)?,
            describe(&self.control)?,
        ])
    }

    fn take_all(&mut self) -> [Option<DmaRegion>; 3] {
        [self.host.take(), self.device.take(), self.control.take()]
    }
}

impl<P: Platform> Engine<P> {
    /// Allocates the rings on first use and resets the control block.
    pub(crate) fn allocate_dma_rings(&mut self) -> Result<[DmaRingDescriptor; 3], DmaError> {
        if !self.dma.is_allocated() {
            if let Err(err) = self.allocate_dma_regions() {
                self.release_dma_rings();
                return Err(err);
            }
            debug!("allocated DMA rings");
        }

        if let Some(control) = self.dma.control.as_ref() {
            self.platform.clear_dma(control);
        }
        self.dma.descriptors().ok_or(DmaError::OutOfMemory {
            size: self.config.dma_sizes.control,
        })
    }

    fn allocate_dma_regions(&mut self) -> Result<(), DmaError> {
        let sizes = self.config.dma_sizes;
        self.dma.host = Some(self.platform.allocate_dma(sizes.host)?);
        self.dma.device = Some(self.platform.allocate_dma(sizes.device)?);
        self.dma.control = Some(self.platform.allocate_dma(sizes.control)?);
        Ok(())
    }

    pub(crate) fn release_dma_rings(&mut self) {
        for region in self.dma.take_all().into_iter().flatten() {
            self.platform.release_dma(region);
        }
    }
}
