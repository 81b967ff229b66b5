//! # Device Context
//!
//! [`DeviceContext`] is the per-device record published in the platform's
//! driver-data slot. It can only be built by committing a
//! [`PartialContext`], and it holds every resource by value, so a published
//! context never has a missing mapping or a buffer without its bus address.
//!
//! [`PartialContext`] is the rollback guard used while attaching: each
//! acquisition is recorded in it as soon as it succeeds, and dropping the
//! guard releases the recorded subset in reverse order.

use pcie_hal::{
    BarIndex, BusAddr, DeviceHandle, DmaBuffer, Error, PciPlatform, RecordAllocation, RegionClaim,
    RegisterWindow, Result,
};
use static_assertions::assert_impl_all;

use crate::config::RegisterWrite;

// =============================================================================
// DEVICE CONTEXT
// =============================================================================

/// Resources held for one attached device
#[derive(Debug)]
pub struct DeviceContext {
    device: DeviceHandle,
    record: RecordAllocation,
    region: RegionClaim,
    window: RegisterWindow,
    dma: DmaBuffer,
}

assert_impl_all!(DeviceContext: Send);

impl DeviceContext {
    /// Device the context belongs to
    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    /// Mapped register window
    pub fn window(&self) -> &RegisterWindow {
        &self.window
    }

    /// Reserved BAR
    pub fn bar(&self) -> BarIndex {
        self.region.bar()
    }

    /// Coherent DMA buffer
    pub fn dma(&self) -> &DmaBuffer {
        &self.dma
    }

    /// Bus address to program into the DMA engine
    pub fn dma_bus_addr(&self) -> BusAddr {
        self.dma.bus_addr()
    }

    /// Release every resource, newest first
    pub fn release<P: PciPlatform>(self, platform: &mut P) {
        let DeviceContext {
            device,
            record,
            region,
            window,
            dma,
        } = self;

        platform.dma_free_coherent(device, dma);
        platform.iounmap(window);
        platform.release_region(region);
        platform.disable_device(device);
        platform.free_record(record);
    }
}

// =============================================================================
// ROLLBACK GUARD
// =============================================================================

/// Context under construction
///
/// Slots are filled in acquisition order. Whatever is held when the guard
/// is dropped is released newest first; [`commit`](Self::commit) moves the
/// resources out and leaves nothing to release.
pub(crate) struct PartialContext<'p, P: PciPlatform> {
    platform: &'p mut P,
    device: DeviceHandle,
    record: Option<RecordAllocation>,
    enabled: bool,
    region: Option<RegionClaim>,
    window: Option<RegisterWindow>,
    dma: Option<DmaBuffer>,
}

impl<'p, P: PciPlatform> PartialContext<'p, P> {
    /// Start an empty context for `device`
    pub(crate) fn new(platform: &'p mut P, device: DeviceHandle) -> Self {
        Self {
            platform,
            device,
            record: None,
            enabled: false,
            region: None,
            window: None,
            dma: None,
        }
    }

    /// Allocate the record backing the context
    pub(crate) fn alloc_record(&mut self) -> Result<()> {
        let size = core::mem::size_of::<DeviceContext>();
        let record = self.platform.alloc_record(self.device, size)?;
        self.record = Some(record);
        Ok(())
    }

    /// Enable the device at bus level
    pub(crate) fn enable(&mut self) -> Result<()> {
        self.platform.enable_device(self.device)?;
        self.enabled = true;
        Ok(())
    }

    /// Reserve `bar` and map its whole length
    ///
    /// Returns the length of the mapped window.
    pub(crate) fn map_bar(&mut self, bar: BarIndex, owner: &'static str) -> Result<usize> {
        let claim = self.platform.request_region(self.device, bar, owner)?;
        let region = self.region.insert(claim);

        let len = self.platform.resource_len(self.device, bar);
        let window = self.platform.iomap(region, len)?;
        Ok(self.window.insert(window).len())
    }

    /// Allocate the coherent DMA buffer
    ///
    /// Returns its bus address.
    pub(crate) fn alloc_dma(&mut self, size: usize) -> Result<BusAddr> {
        let buffer = self.platform.dma_alloc_coherent(self.device, size)?;
        Ok(self.dma.insert(buffer).bus_addr())
    }

    /// Perform `write` if the mapped window contains it
    ///
    /// Returns `false` when the write was skipped.
    pub(crate) fn write_register(&mut self, write: RegisterWrite) -> Result<bool> {
        let window = self.window.as_ref().ok_or(Error::MappingFailed)?;
        if !window.fits(write.offset, 4) {
            return Ok(false);
        }
        self.platform.write32(window, write.offset, write.value);
        Ok(true)
    }

    /// Length of the mapped window, 0 before mapping
    pub(crate) fn window_len(&self) -> usize {
        self.window.as_ref().map_or(0, RegisterWindow::len)
    }

    /// Turn the fully acquired context into a [`DeviceContext`]
    ///
    /// An incomplete context is released and the error of the first missing
    /// step is returned.
    pub(crate) fn commit(mut self) -> Result<DeviceContext> {
        let held = (
            self.record.take(),
            self.region.take(),
            self.window.take(),
            self.dma.take(),
        );

        match held {
            (Some(record), Some(region), Some(window), Some(dma)) if self.enabled => {
                self.enabled = false;
                Ok(DeviceContext {
                    device: self.device,
                    record,
                    region,
                    window,
                    dma,
                })
            },
            (record, region, window, dma) => {
                self.record = record;
                self.region = region;
                self.window = window;
                self.dma = dma;
                Err(self.first_missing())
            },
        }
    }

    fn first_missing(&self) -> Error {
        if self.record.is_none() {
            Error::OutOfMemory
        } else if !self.enabled {
            Error::DeviceEnableFailed
        } else if self.region.is_none() || self.window.is_none() {
            Error::MappingFailed
        } else {
            Error::DmaAllocFailed
        }
    }
}

impl<P: PciPlatform> Drop for PartialContext<'_, P> {
    fn drop(&mut self) {
        if let Some(dma) = self.dma.take() {
            self.platform.dma_free_coherent(self.device, dma);
        }
        if let Some(window) = self.window.take() {
            self.platform.iounmap(window);
        }
        if let Some(region) = self.region.take() {
            self.platform.release_region(region);
        }
        if self.enabled {
            self.enabled = false;
            self.platform.disable_device(self.device);
        }
        if let Some(record) = self.record.take() {
            self.platform.free_record(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use pcie_hal::sim::{CallKind, SimPlatform};
    use pcie_hal::{PciId, PAGE_SIZE};

    use super::*;

    fn setup() -> (SimPlatform, DeviceHandle) {
        let mut sim = SimPlatform::new();
        let dev = sim.add_device(PciId::new(0x1363, 0x0007), 0x2000);
        (sim, dev)
    }

    #[test]
    fn test_drop_releases_in_reverse() {
        let (mut sim, dev) = setup();
        let log = sim.log();
        {
            let mut partial = PartialContext::new(&mut sim, dev);
            partial.alloc_record().unwrap();
            partial.enable().unwrap();
            partial.map_bar(BarIndex::BAR0, "test").unwrap();
        }

        assert_eq!(log.kinds(), [
            CallKind::AllocRecord,
            CallKind::Enable,
            CallKind::RequestRegion,
            CallKind::Iomap,
            CallKind::Iounmap,
            CallKind::ReleaseRegion,
            CallKind::Disable,
            CallKind::FreeRecord,
        ]);
        assert!(sim.usage(dev).is_idle());
    }

    #[test]
    fn test_commit_incomplete_releases() {
        let (mut sim, dev) = setup();
        let mut partial = PartialContext::new(&mut sim, dev);
        partial.alloc_record().unwrap();
        partial.enable().unwrap();
        assert_eq!(partial.commit().unwrap_err(), Error::MappingFailed);
        assert!(sim.usage(dev).is_idle());
    }

    #[test]
    fn test_commit_then_release() {
        let (mut sim, dev) = setup();
        let mut partial = PartialContext::new(&mut sim, dev);
        partial.alloc_record().unwrap();
        partial.enable().unwrap();
        assert_eq!(partial.map_bar(BarIndex::BAR0, "test").unwrap(), 0x2000);
        partial.alloc_dma(PAGE_SIZE).unwrap();

        let context = partial.commit().unwrap();
        assert_eq!(context.device(), dev);
        assert_eq!(context.window().len(), 0x2000);
        assert_eq!(context.dma().size(), PAGE_SIZE);

        let usage = sim.usage(dev);
        assert!(usage.enabled);
        assert_eq!(usage.mappings, 1);

        context.release(&mut sim);
        assert!(sim.usage(dev).is_idle());
    }

    #[test]
    fn test_write_skipped_outside_window() {
        let mut sim = SimPlatform::new();
        let dev = sim.add_device(PciId::new(0x1363, 0x0007), 0x500);
        let mut partial = PartialContext::new(&mut sim, dev);
        partial.alloc_record().unwrap();
        partial.enable().unwrap();
        partial.map_bar(BarIndex::BAR0, "test").unwrap();
        assert_eq!(partial.write_register(RegisterWrite::new(0x1000, 1)), Ok(false));
        assert_eq!(partial.write_register(RegisterWrite::new(0x4FC, 1)), Ok(true));
    }
}
