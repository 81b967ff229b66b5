//! # Platform Abstraction
//!
//! Resource primitives a PCI driver acquires and releases during attach and
//! detach.
//!
//! Every acquired resource is represented by a handle type that is neither
//! `Clone` nor `Copy`. Release primitives consume the handle, so a resource
//! cannot be released twice and a register window cannot be written after it
//! has been unmapped.

use alloc::boxed::Box;
use core::any::Any;
use core::fmt;
use core::num::NonZeroUsize;

use crate::error::Result;
use crate::types::{BarIndex, BusAddr, DeviceHandle};

// =============================================================================
// RESOURCE HANDLES
// =============================================================================

/// Driver-private record memory charged to a device
#[derive(Debug)]
pub struct RecordAllocation {
    device: DeviceHandle,
    id: u64,
    size: usize,
}

impl RecordAllocation {
    /// Construct handle (platform implementations only)
    pub const fn new(device: DeviceHandle, id: u64, size: usize) -> Self {
        Self { device, id, size }
    }

    /// Device the memory is charged to
    pub const fn device(&self) -> DeviceHandle {
        self.device
    }

    /// Platform allocation id
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Size in bytes
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// Exclusive reservation of a BAR address range
#[derive(Debug)]
pub struct RegionClaim {
    device: DeviceHandle,
    bar: BarIndex,
    owner: &'static str,
}

impl RegionClaim {
    /// Construct handle (platform implementations only)
    pub const fn new(device: DeviceHandle, bar: BarIndex, owner: &'static str) -> Self {
        Self { device, bar, owner }
    }

    /// Device owning the BAR
    pub const fn device(&self) -> DeviceHandle {
        self.device
    }

    /// Reserved BAR
    pub const fn bar(&self) -> BarIndex {
        self.bar
    }

    /// Name the region was reserved under
    pub const fn owner(&self) -> &'static str {
        self.owner
    }
}

/// Mapped register window of a reserved region
///
/// A window always has a non-zero base and a non-zero length.
pub struct RegisterWindow {
    device: DeviceHandle,
    bar: BarIndex,
    base: NonZeroUsize,
    len: usize,
}

impl RegisterWindow {
    /// Construct handle, `None` for a null base or empty mapping
    pub fn new(claim: &RegionClaim, base: usize, len: usize) -> Option<Self> {
        let base = NonZeroUsize::new(base)?;
        if len == 0 {
            return None;
        }
        Some(Self {
            device: claim.device,
            bar: claim.bar,
            base,
            len,
        })
    }

    /// Device the window belongs to
    pub const fn device(&self) -> DeviceHandle {
        self.device
    }

    /// BAR the window maps
    pub const fn bar(&self) -> BarIndex {
        self.bar
    }

    /// Virtual base address
    pub const fn base(&self) -> usize {
        self.base.get()
    }

    /// Window length in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check whether a `width`-byte access at `offset` lies inside the window
    pub const fn fits(&self, offset: usize, width: usize) -> bool {
        match offset.checked_add(width) {
            Some(end) => end <= self.len,
            None => false,
        }
    }
}

impl fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("device", &self.device)
            .field("bar", &self.bar)
            .field("base", &format_args!("{:#x}", self.base.get()))
            .field("len", &format_args!("{:#x}", self.len))
            .finish()
    }
}

/// DMA-coherent buffer: CPU address and bus address of one allocation
pub struct DmaBuffer {
    cpu_addr: NonZeroUsize,
    bus_addr: BusAddr,
    size: usize,
}

impl DmaBuffer {
    /// Construct handle, `None` for a null CPU address or empty buffer
    pub fn new(cpu_addr: usize, bus_addr: BusAddr, size: usize) -> Option<Self> {
        let cpu_addr = NonZeroUsize::new(cpu_addr)?;
        if size == 0 {
            return None;
        }
        Some(Self {
            cpu_addr,
            bus_addr,
            size,
        })
    }

    /// Address software uses to access the buffer
    pub const fn cpu_addr(&self) -> usize {
        self.cpu_addr.get()
    }

    /// Address the device's DMA engine must be programmed with
    pub const fn bus_addr(&self) -> BusAddr {
        self.bus_addr
    }

    /// Buffer size in bytes
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("cpu_addr", &format_args!("{:#x}", self.cpu_addr.get()))
            .field("bus_addr", &format_args!("{:#x}", self.bus_addr))
            .field("size", &self.size)
            .finish()
    }
}

// =============================================================================
// DRIVER DATA SLOT
// =============================================================================

/// Opaque driver-private state stored per device
pub type DriverData = Box<dyn Any + Send>;

/// Slot publication failed; the rejected data is handed back to the caller
pub struct SlotOccupied(pub DriverData);

impl fmt::Debug for SlotOccupied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SlotOccupied(..)")
    }
}

// =============================================================================
// PLATFORM TRAIT
// =============================================================================

/// Platform primitives used by PCI drivers
///
/// Each target (kernel bindings, simulator) implements this trait. Acquire
/// primitives make a single attempt and report rejection as an error; release
/// primitives cannot fail.
pub trait PciPlatform {
    /// Get platform name
    fn name(&self) -> &'static str;

    /// Allocate zeroed driver-private memory charged to `device`
    fn alloc_record(&mut self, device: DeviceHandle, size: usize) -> Result<RecordAllocation>;

    /// Free driver-private memory
    fn free_record(&mut self, record: RecordAllocation);

    /// Enable device at bus level (power, decode)
    fn enable_device(&mut self, device: DeviceHandle) -> Result<()>;

    /// Disable device at bus level
    fn disable_device(&mut self, device: DeviceHandle);

    /// Length of a BAR resource in bytes (0 when not implemented)
    fn resource_len(&self, device: DeviceHandle, bar: BarIndex) -> usize;

    /// Reserve a BAR address range exclusively
    fn request_region(
        &mut self,
        device: DeviceHandle,
        bar: BarIndex,
        owner: &'static str,
    ) -> Result<RegionClaim>;

    /// Release a BAR reservation
    fn release_region(&mut self, claim: RegionClaim);

    /// Map `len` bytes of a reserved region
    fn iomap(&mut self, claim: &RegionClaim, len: usize) -> Result<RegisterWindow>;

    /// Unmap a register window
    fn iounmap(&mut self, window: RegisterWindow);

    /// Allocate a DMA-coherent buffer
    fn dma_alloc_coherent(&mut self, device: DeviceHandle, size: usize) -> Result<DmaBuffer>;

    /// Free a DMA-coherent buffer
    fn dma_free_coherent(&mut self, device: DeviceHandle, buffer: DmaBuffer);

    /// Write a 32-bit register
    ///
    /// Callers must check [`RegisterWindow::fits`] first.
    fn write32(&mut self, window: &RegisterWindow, offset: usize, value: u32);

    /// Store driver data in the device's slot
    fn set_drvdata(
        &mut self,
        device: DeviceHandle,
        data: DriverData,
    ) -> core::result::Result<(), SlotOccupied>;

    /// Remove and return the device's driver data
    fn take_drvdata(&mut self, device: DeviceHandle) -> Option<DriverData>;

    /// Check whether the device's slot holds data
    fn has_drvdata(&self, device: DeviceHandle) -> bool;
}
