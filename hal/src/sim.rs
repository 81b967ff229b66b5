//! # Simulated Platform
//!
//! A [`PciPlatform`] backed by plain data structures, for host testing of
//! drivers.
//!
//! - Every successful primitive call is appended to a shared [`CallLog`].
//!   Failed calls are not recorded: a rejected acquisition holds nothing.
//! - [`SimPlatform::fail_next`] makes the next call to one primitive fail.
//! - [`SimPlatform::usage`] reports what a device currently holds, so tests
//!   can check leak-freedom and round trips against a baseline.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;

use crate::error::{Error, Result};
use crate::platform::{
    DmaBuffer, DriverData, PciPlatform, RecordAllocation, RegionClaim, RegisterWindow,
    SlotOccupied,
};
use crate::slots::DriverDataSlots;
use crate::types::{BarIndex, BusAddr, DeviceHandle, PciId, BAR_COUNT, PAGE_SIZE};

const MMIO_PHYS_BASE: u64 = 0xF000_0000;
const MMIO_PHYS_STRIDE: u64 = 0x0010_0000;
const VIRT_BASE: usize = 0x4000_0000;
const DMA_CPU_BASE: usize = 0x7000_0000;
const DMA_BUS_BASE: u64 = 0x0000_0001_0000_0000;

bitflags! {
    /// PCI command register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u16 {
        /// Respond to I/O space accesses
        const IO_SPACE     = 1 << 0;
        /// Respond to memory space accesses
        const MEMORY_SPACE = 1 << 1;
    }
}

// =============================================================================
// CALL LOG
// =============================================================================

/// Primitive call recorded by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    AllocRecord { device: DeviceHandle, size: usize },
    FreeRecord { device: DeviceHandle },
    Enable { device: DeviceHandle },
    Disable { device: DeviceHandle },
    RequestRegion { device: DeviceHandle, bar: BarIndex, owner: &'static str },
    ReleaseRegion { device: DeviceHandle, bar: BarIndex, owner: &'static str },
    Iomap { device: DeviceHandle, len: usize },
    Iounmap { device: DeviceHandle },
    DmaAlloc { device: DeviceHandle, size: usize },
    DmaFree { device: DeviceHandle, size: usize },
    Write32 { device: DeviceHandle, offset: usize, value: u32 },
    SetDrvdata { device: DeviceHandle },
    TakeDrvdata { device: DeviceHandle },
}

/// Call kind, without arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallKind {
    AllocRecord,
    FreeRecord,
    Enable,
    Disable,
    RequestRegion,
    ReleaseRegion,
    Iomap,
    Iounmap,
    DmaAlloc,
    DmaFree,
    Write32,
    SetDrvdata,
    TakeDrvdata,
}

impl CallKind {
    /// Release that undoes this acquisition
    pub const fn release(self) -> Option<CallKind> {
        match self {
            CallKind::AllocRecord => Some(CallKind::FreeRecord),
            CallKind::Enable => Some(CallKind::Disable),
            CallKind::RequestRegion => Some(CallKind::ReleaseRegion),
            CallKind::Iomap => Some(CallKind::Iounmap),
            CallKind::DmaAlloc => Some(CallKind::DmaFree),
            CallKind::SetDrvdata => Some(CallKind::TakeDrvdata),
            _ => None,
        }
    }

    /// Check whether this call acquires a resource
    pub const fn is_acquire(self) -> bool {
        self.release().is_some()
    }

    /// Check whether this call releases a resource
    pub const fn is_release(self) -> bool {
        matches!(
            self,
            CallKind::FreeRecord
                | CallKind::Disable
                | CallKind::ReleaseRegion
                | CallKind::Iounmap
                | CallKind::DmaFree
                | CallKind::TakeDrvdata
        )
    }
}

impl Call {
    /// Call kind
    pub const fn kind(&self) -> CallKind {
        match self {
            Call::AllocRecord { .. } => CallKind::AllocRecord,
            Call::FreeRecord { .. } => CallKind::FreeRecord,
            Call::Enable { .. } => CallKind::Enable,
            Call::Disable { .. } => CallKind::Disable,
            Call::RequestRegion { .. } => CallKind::RequestRegion,
            Call::ReleaseRegion { .. } => CallKind::ReleaseRegion,
            Call::Iomap { .. } => CallKind::Iomap,
            Call::Iounmap { .. } => CallKind::Iounmap,
            Call::DmaAlloc { .. } => CallKind::DmaAlloc,
            Call::DmaFree { .. } => CallKind::DmaFree,
            Call::Write32 { .. } => CallKind::Write32,
            Call::SetDrvdata { .. } => CallKind::SetDrvdata,
            Call::TakeDrvdata { .. } => CallKind::TakeDrvdata,
        }
    }

    /// Device the call was made for
    pub const fn device(&self) -> DeviceHandle {
        match *self {
            Call::AllocRecord { device, .. }
            | Call::FreeRecord { device }
            | Call::Enable { device }
            | Call::Disable { device }
            | Call::RequestRegion { device, .. }
            | Call::ReleaseRegion { device, .. }
            | Call::Iomap { device, .. }
            | Call::Iounmap { device }
            | Call::DmaAlloc { device, .. }
            | Call::DmaFree { device, .. }
            | Call::Write32 { device, .. }
            | Call::SetDrvdata { device }
            | Call::TakeDrvdata { device } => device,
        }
    }
}

/// Shared, append-only record of primitive calls
///
/// Clones observe the same log, so a test can keep one after the platform
/// has moved into a bus.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    inner: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    /// Create empty log
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: Call) {
        self.inner.lock().push(call);
    }

    /// Copy of every recorded call
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().clone()
    }

    /// Kinds of every recorded call
    pub fn kinds(&self) -> Vec<CallKind> {
        self.inner.lock().iter().map(Call::kind).collect()
    }

    /// Kinds of calls made for one device
    pub fn kinds_for(&self, device: DeviceHandle) -> Vec<CallKind> {
        self.inner
            .lock()
            .iter()
            .filter(|c| c.device() == device)
            .map(Call::kind)
            .collect()
    }

    /// Number of recorded calls of one kind
    pub fn count(&self, kind: CallKind) -> usize {
        self.inner.lock().iter().filter(|c| c.kind() == kind).count()
    }

    /// Number of recorded calls
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Forget every recorded call
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

// =============================================================================
// FAULT INJECTION
// =============================================================================

/// Primitive that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    AllocRecord,
    EnableDevice,
    RequestRegion,
    Iomap,
    DmaAlloc,
    SetDrvdata,
}

impl FailPoint {
    /// Every fail point, in attach order
    pub const ALL: [FailPoint; 6] = [
        FailPoint::AllocRecord,
        FailPoint::EnableDevice,
        FailPoint::RequestRegion,
        FailPoint::Iomap,
        FailPoint::DmaAlloc,
        FailPoint::SetDrvdata,
    ];
}

// =============================================================================
// ACCOUNTING
// =============================================================================

/// Resources a device currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceUsage {
    pub enabled: bool,
    pub records: usize,
    pub regions: usize,
    pub mappings: usize,
    pub dma_buffers: usize,
    pub drvdata: bool,
}

impl ResourceUsage {
    /// Check whether the device holds nothing
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

// =============================================================================
// SIMULATED DEVICE
// =============================================================================

#[derive(Debug, Clone)]
struct SimDevice {
    id: PciId,
    bar_phys: [u64; BAR_COUNT as usize],
    bar_len: [usize; BAR_COUNT as usize],
    command: CommandFlags,
}

#[derive(Debug)]
struct Claim {
    device: DeviceHandle,
    bar: BarIndex,
    owner: &'static str,
    start: u64,
    end: u64,
}

// =============================================================================
// SIM PLATFORM
// =============================================================================

/// Simulated PCI platform
#[derive(Debug)]
pub struct SimPlatform {
    devices: BTreeMap<DeviceHandle, SimDevice>,
    records: BTreeMap<u64, DeviceHandle>,
    claims: Vec<Claim>,
    mappings: BTreeMap<usize, DeviceHandle>,
    dma: BTreeMap<usize, DeviceHandle>,
    registers: BTreeMap<(DeviceHandle, usize), u32>,
    slots: DriverDataSlots,
    faults: Vec<FailPoint>,
    log: CallLog,
    next_handle: u32,
    next_record: u64,
    next_virt: usize,
    next_dma: usize,
}

impl SimPlatform {
    /// Create platform with no devices
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
            records: BTreeMap::new(),
            claims: Vec::new(),
            mappings: BTreeMap::new(),
            dma: BTreeMap::new(),
            registers: BTreeMap::new(),
            slots: DriverDataSlots::new(),
            faults: Vec::new(),
            log: CallLog::new(),
            next_handle: 1,
            next_record: 1,
            next_virt: VIRT_BASE,
            next_dma: DMA_CPU_BASE,
        }
    }

    /// Add a device with a memory BAR 0 of `bar0_len` bytes
    pub fn add_device(&mut self, id: PciId, bar0_len: usize) -> DeviceHandle {
        let phys = MMIO_PHYS_BASE + u64::from(self.next_handle) * MMIO_PHYS_STRIDE;
        self.add_device_at(id, phys, bar0_len)
    }

    /// Add a device whose BAR 0 decodes at `bar0_phys`
    pub fn add_device_at(&mut self, id: PciId, bar0_phys: u64, bar0_len: usize) -> DeviceHandle {
        let handle = DeviceHandle::from_raw(self.next_handle);
        self.next_handle += 1;

        let mut bar_phys = [0; BAR_COUNT as usize];
        let mut bar_len = [0; BAR_COUNT as usize];
        bar_phys[0] = bar0_phys;
        bar_len[0] = bar0_len;

        self.devices.insert(handle, SimDevice {
            id,
            bar_phys,
            bar_len,
            command: CommandFlags::empty(),
        });
        handle
    }

    /// Identity of a simulated device
    pub fn device_id(&self, device: DeviceHandle) -> Option<PciId> {
        self.devices.get(&device).map(|d| d.id)
    }

    /// Make the next call to `point` fail
    pub fn fail_next(&mut self, point: FailPoint) {
        self.faults.push(point);
    }

    /// Handle to the call log
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Command register of a device
    pub fn command(&self, device: DeviceHandle) -> CommandFlags {
        self.devices
            .get(&device)
            .map(|d| d.command)
            .unwrap_or(CommandFlags::empty())
    }

    /// Last value written to a register of `device`
    pub fn register(&self, device: DeviceHandle, offset: usize) -> Option<u32> {
        self.registers.get(&(device, offset)).copied()
    }

    /// Resources `device` currently holds
    pub fn usage(&self, device: DeviceHandle) -> ResourceUsage {
        ResourceUsage {
            enabled: !self.command(device).is_empty(),
            records: self.records.values().filter(|d| **d == device).count(),
            regions: self.claims.iter().filter(|c| c.device == device).count(),
            mappings: self.mappings.values().filter(|d| **d == device).count(),
            dma_buffers: self.dma.values().filter(|d| **d == device).count(),
            drvdata: self.slots.contains(device),
        }
    }

    /// Downcast the data published for `device`
    pub fn drvdata<T: 'static>(&self, device: DeviceHandle) -> Option<&T> {
        self.slots.peek(device)?.downcast_ref::<T>()
    }

    fn inject(&mut self, point: FailPoint) -> bool {
        match self.faults.iter().position(|p| *p == point) {
            Some(index) => {
                self.faults.remove(index);
                log::debug!("sim: injected failure at {:?}", point);
                true
            },
            None => false,
        }
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PciPlatform for SimPlatform {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn alloc_record(&mut self, device: DeviceHandle, size: usize) -> Result<RecordAllocation> {
        if self.inject(FailPoint::AllocRecord) {
            return Err(Error::OutOfMemory);
        }

        let id = self.next_record;
        self.next_record += 1;
        self.records.insert(id, device);
        self.log.push(Call::AllocRecord { device, size });
        Ok(RecordAllocation::new(device, id, size))
    }

    fn free_record(&mut self, record: RecordAllocation) {
        let removed = self.records.remove(&record.id());
        assert!(removed.is_some(), "sim: record {} freed twice", record.id());
        self.log.push(Call::FreeRecord {
            device: record.device(),
        });
    }

    fn enable_device(&mut self, device: DeviceHandle) -> Result<()> {
        if self.inject(FailPoint::EnableDevice) {
            return Err(Error::DeviceEnableFailed);
        }

        let dev = self
            .devices
            .get_mut(&device)
            .ok_or(Error::DeviceEnableFailed)?;
        dev.command |= CommandFlags::IO_SPACE | CommandFlags::MEMORY_SPACE;
        self.log.push(Call::Enable { device });
        Ok(())
    }

    fn disable_device(&mut self, device: DeviceHandle) {
        if let Some(dev) = self.devices.get_mut(&device) {
            dev.command = CommandFlags::empty();
        }
        self.log.push(Call::Disable { device });
    }

    fn resource_len(&self, device: DeviceHandle, bar: BarIndex) -> usize {
        self.devices
            .get(&device)
            .map(|d| d.bar_len[bar.index() as usize])
            .unwrap_or(0)
    }

    fn request_region(
        &mut self,
        device: DeviceHandle,
        bar: BarIndex,
        owner: &'static str,
    ) -> Result<RegionClaim> {
        if self.inject(FailPoint::RequestRegion) {
            return Err(Error::RegionBusy);
        }

        let dev = self.devices.get(&device).ok_or(Error::InvalidBar)?;
        let len = dev.bar_len[bar.index() as usize];
        if len == 0 {
            return Err(Error::InvalidBar);
        }
        let start = dev.bar_phys[bar.index() as usize];
        let end = start + len as u64;

        if let Some(held) = self.claims.iter().find(|c| c.start < end && start < c.end) {
            log::debug!("sim: {} {} busy, held by '{}'", device, bar, held.owner);
            return Err(Error::RegionBusy);
        }

        self.claims.push(Claim {
            device,
            bar,
            owner,
            start,
            end,
        });
        self.log.push(Call::RequestRegion { device, bar, owner });
        Ok(RegionClaim::new(device, bar, owner))
    }

    fn release_region(&mut self, claim: RegionClaim) {
        let index = self
            .claims
            .iter()
            .position(|c| {
                c.device == claim.device() && c.bar == claim.bar() && c.owner == claim.owner()
            });
        match index {
            Some(index) => {
                self.claims.remove(index);
            },
            None => panic!("sim: {} {} released without a claim", claim.device(), claim.bar()),
        }
        self.log.push(Call::ReleaseRegion {
            device: claim.device(),
            bar: claim.bar(),
            owner: claim.owner(),
        });
    }

    fn iomap(&mut self, claim: &RegionClaim, len: usize) -> Result<RegisterWindow> {
        if self.inject(FailPoint::Iomap) {
            return Err(Error::MappingFailed);
        }

        let base = self.next_virt;
        let window = RegisterWindow::new(claim, base, len).ok_or(Error::MappingFailed)?;
        self.next_virt += len.div_ceil(PAGE_SIZE) * PAGE_SIZE;

        let device = claim.device();
        self.mappings.insert(base, device);
        self.log.push(Call::Iomap { device, len });
        Ok(window)
    }

    fn iounmap(&mut self, window: RegisterWindow) {
        let removed = self.mappings.remove(&window.base());
        assert!(removed.is_some(), "sim: window {:#x} unmapped twice", window.base());
        self.log.push(Call::Iounmap {
            device: window.device(),
        });
    }

    fn dma_alloc_coherent(&mut self, device: DeviceHandle, size: usize) -> Result<DmaBuffer> {
        if self.inject(FailPoint::DmaAlloc) {
            return Err(Error::DmaAllocFailed);
        }

        let cpu = self.next_dma;
        let bus = BusAddr::new(DMA_BUS_BASE + (cpu - DMA_CPU_BASE) as u64);
        let buffer = DmaBuffer::new(cpu, bus, size).ok_or(Error::DmaAllocFailed)?;
        self.next_dma += size.div_ceil(PAGE_SIZE) * PAGE_SIZE;

        self.dma.insert(cpu, device);
        self.log.push(Call::DmaAlloc { device, size });
        Ok(buffer)
    }

    fn dma_free_coherent(&mut self, device: DeviceHandle, buffer: DmaBuffer) {
        let removed = self.dma.remove(&buffer.cpu_addr());
        assert_eq!(removed, Some(device), "sim: DMA buffer freed twice or by wrong device");
        self.log.push(Call::DmaFree {
            device,
            size: buffer.size(),
        });
    }

    fn write32(&mut self, window: &RegisterWindow, offset: usize, value: u32) {
        assert!(
            self.mappings.contains_key(&window.base()),
            "sim: write through unmapped window"
        );
        assert!(window.fits(offset, 4), "sim: write at {:#x} outside window", offset);

        let device = window.device();
        self.registers.insert((device, offset), value);
        self.log.push(Call::Write32 {
            device,
            offset,
            value,
        });
    }

    fn set_drvdata(
        &mut self,
        device: DeviceHandle,
        data: DriverData,
    ) -> core::result::Result<(), SlotOccupied> {
        if self.inject(FailPoint::SetDrvdata) {
            return Err(SlotOccupied(data));
        }

        self.slots.set(device, data)?;
        self.log.push(Call::SetDrvdata { device });
        Ok(())
    }

    fn take_drvdata(&mut self, device: DeviceHandle) -> Option<DriverData> {
        let data = self.slots.take(device)?;
        self.log.push(Call::TakeDrvdata { device });
        Some(data)
    }

    fn has_drvdata(&self, device: DeviceHandle) -> bool {
        self.slots.contains(device)
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use super::*;

    fn platform() -> (SimPlatform, DeviceHandle) {
        let mut sim = SimPlatform::new();
        let dev = sim.add_device(PciId::new(0x1363, 0x0007), 0x2000);
        (sim, dev)
    }

    #[test]
    fn test_enable_sets_decode_bits() {
        let (mut sim, dev) = platform();
        assert_eq!(sim.device_id(dev), Some(PciId::new(0x1363, 0x0007)));
        sim.enable_device(dev).unwrap();
        assert_eq!(sim.command(dev), CommandFlags::IO_SPACE | CommandFlags::MEMORY_SPACE);
        sim.disable_device(dev);
        assert!(sim.command(dev).is_empty());
    }

    #[test]
    fn test_fault_is_one_shot() {
        let (mut sim, dev) = platform();
        sim.fail_next(FailPoint::EnableDevice);
        assert_eq!(sim.enable_device(dev), Err(Error::DeviceEnableFailed));
        assert!(sim.log().is_empty());
        assert_eq!(sim.enable_device(dev), Ok(()));
        assert_eq!(sim.log().kinds(), [CallKind::Enable]);
    }

    #[test]
    fn test_overlapping_regions_conflict() {
        let mut sim = SimPlatform::new();
        let a = sim.add_device_at(PciId::new(0x1363, 0x7), 0xE000_0000, 0x1000);
        let b = sim.add_device_at(PciId::new(0x1363, 0x7), 0xE000_0800, 0x1000);

        let claim = sim.request_region(a, BarIndex::BAR0, "a").unwrap();
        assert_eq!(sim.request_region(b, BarIndex::BAR0, "b").unwrap_err(), Error::RegionBusy);

        sim.release_region(claim);
        assert!(sim.request_region(b, BarIndex::BAR0, "b").is_ok());
    }

    #[test]
    fn test_region_owner_recorded() {
        let (mut sim, dev) = platform();
        let claim = sim.request_region(dev, BarIndex::BAR0, "owner-a").unwrap();
        assert_eq!(claim.owner(), "owner-a");
        sim.release_region(claim);

        assert_eq!(sim.log().calls(), [
            Call::RequestRegion {
                device: dev,
                bar: BarIndex::BAR0,
                owner: "owner-a",
            },
            Call::ReleaseRegion {
                device: dev,
                bar: BarIndex::BAR0,
                owner: "owner-a",
            },
        ]);
        assert_eq!(sim.log().len(), 2);
    }

    #[test]
    #[should_panic(expected = "released without a claim")]
    fn test_release_under_other_owner_panics() {
        let (mut sim, dev) = platform();
        let _claim = sim.request_region(dev, BarIndex::BAR0, "owner-a").unwrap();
        sim.release_region(RegionClaim::new(dev, BarIndex::BAR0, "owner-b"));
    }

    #[test]
    fn test_unimplemented_bar_is_invalid() {
        let (mut sim, dev) = platform();
        let bar = BarIndex::new(2).unwrap();
        assert_eq!(sim.resource_len(dev, bar), 0);
        assert_eq!(sim.request_region(dev, bar, "x").unwrap_err(), Error::InvalidBar);
    }

    #[test]
    fn test_usage_tracks_resources() {
        let (mut sim, dev) = platform();
        assert!(sim.usage(dev).is_idle());

        let claim = sim.request_region(dev, BarIndex::BAR0, "t").unwrap();
        let window = sim.iomap(&claim, 0x2000).unwrap();
        let buffer = sim.dma_alloc_coherent(dev, PAGE_SIZE).unwrap();
        let usage = sim.usage(dev);
        assert_eq!(usage.regions, 1);
        assert_eq!(usage.mappings, 1);
        assert_eq!(usage.dma_buffers, 1);

        sim.write32(&window, 0x1000, 0xABCD);
        assert_eq!(sim.register(dev, 0x1000), Some(0xABCD));

        sim.dma_free_coherent(dev, buffer);
        sim.iounmap(window);
        sim.release_region(claim);
        assert!(sim.usage(dev).is_idle());
    }

    #[test]
    fn test_drvdata_roundtrip() {
        let (mut sim, dev) = platform();
        sim.set_drvdata(dev, Box::new(5u64)).unwrap();
        assert!(sim.has_drvdata(dev));
        assert_eq!(sim.drvdata::<u64>(dev), Some(&5));
        assert!(sim.take_drvdata(dev).is_some());
        assert!(!sim.has_drvdata(dev));
        assert_eq!(sim.log().kinds(), [CallKind::SetDrvdata, CallKind::TakeDrvdata]);
    }

    #[test]
    #[should_panic(expected = "unmapped window")]
    fn test_write_after_unmap_panics() {
        let (mut sim, dev) = platform();
        let claim = sim.request_region(dev, BarIndex::BAR0, "t").unwrap();
        let window = sim.iomap(&claim, 0x2000).unwrap();
        let stale = RegisterWindow::new(&claim, window.base(), window.len()).unwrap();
        sim.iounmap(window);
        sim.write32(&stale, 0, 1);
    }
}
