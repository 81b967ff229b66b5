//! # PCI Types
//!
//! Device handles, identities and address newtypes.

use core::fmt;

use static_assertions::assert_impl_all;

/// Platform page size
pub const PAGE_SIZE: usize = 4096;

/// Number of BARs in a type 0 configuration header
pub const BAR_COUNT: u8 = 6;

// =============================================================================
// DEVICE HANDLE
// =============================================================================

/// Opaque reference to a platform device object
///
/// Handles are issued by the platform and never owned by drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceHandle(u32);

impl DeviceHandle {
    /// Create handle from raw platform value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get raw platform value
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pci#{}", self.0)
    }
}

// =============================================================================
// BAR INDEX
// =============================================================================

/// Base Address Register index (0-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BarIndex(u8);

impl BarIndex {
    /// BAR 0
    pub const BAR0: BarIndex = BarIndex(0);

    /// Create BAR index, `None` when out of range
    pub const fn new(index: u8) -> Option<Self> {
        if index < BAR_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Get BAR index
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for BarIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BAR{}", self.0)
    }
}

// =============================================================================
// DEVICE IDENTITY
// =============================================================================

/// Resolved identity of an enumerated PCI function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciId {
    pub vendor_id: u16,
    pub device_id: u16,
}

impl PciId {
    /// Create identity
    pub const fn new(vendor_id: u16, device_id: u16) -> Self {
        Self {
            vendor_id,
            device_id,
        }
    }
}

impl fmt::Display for PciId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.device_id)
    }
}

// =============================================================================
// BUS ADDRESS
// =============================================================================

/// Address a device uses to reach memory by DMA
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BusAddr(u64);

impl BusAddr {
    /// Create bus address
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get raw value
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Low 32 bits, as programmed into a 32-bit address register
    pub const fn low(self) -> u32 {
        self.0 as u32
    }

    /// High 32 bits
    pub const fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::LowerHex for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

assert_impl_all!(DeviceHandle: Copy, Send, Sync, Ord);
assert_impl_all!(BusAddr: Copy, Send, Sync);
