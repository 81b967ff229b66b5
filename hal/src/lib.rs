//! # PCIe Hardware Abstraction Layer
//!
//! Platform primitives and bus glue for PCI device drivers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 PCI drivers                  │
//! │      probe(device) / remove(device)          │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────┴───────────────────────┐
//! │                  PciBus<P>                   │
//! │   id-table matching, hotplug, status codes   │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────┴───────────────────────┐
//! │              P: PciPlatform                  │
//! │  enable, regions, iomap, DMA, drvdata slot   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The `sim` feature provides [`sim::SimPlatform`], a host-side platform
//! that records every call for driver tests.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod bus;
pub mod error;
pub mod platform;
pub mod slots;
pub mod types;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

// Re-exports
pub use bus::{DeviceMatch, DeviceState, DriverInfo, PciBus, PciDevice, PciDriver};
pub use error::{status_code, Error, ErrorClass, Result};
pub use platform::{
    DmaBuffer, DriverData, PciPlatform, RecordAllocation, RegionClaim, RegisterWindow,
    SlotOccupied,
};
pub use slots::DriverDataSlots;
pub use types::{BarIndex, BusAddr, DeviceHandle, PciId, BAR_COUNT, PAGE_SIZE};
