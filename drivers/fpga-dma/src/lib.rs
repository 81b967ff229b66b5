//! # FPGA DMA Driver
//!
//! PCI driver for an FPGA development board exposing its registers on BAR 0.
//!
//! On attach the driver enables the device, maps the register window,
//! allocates one page of coherent DMA memory and, when the window is large
//! enough, performs the configured register write. On detach it releases
//! everything in reverse order.
//!
//! ## Usage
//!
//! ```ignore
//! let mut bus = PciBus::new(platform);
//! fpga_dma::init(&mut bus, DriverConfig::DEFAULT)?;
//! // ... devices come and go ...
//! fpga_dma::exit(&mut bus)?;
//! ```
//!
//! ## Features
//!
//! - `fpga-power-on`: write `0x1111_1111` instead of `0x0` during attach
//! - `emulated-device`: bind to the emulated bring-up device

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod attach;
pub mod config;
pub mod context;
pub mod detach;
pub mod driver;
pub mod ids;

use alloc::boxed::Box;

use pcie_hal::{PciBus, PciPlatform, Result};

// Re-exports
pub use attach::attach;
pub use config::{DriverConfig, RegisterWrite};
pub use context::DeviceContext;
pub use detach::detach;
pub use driver::{FpgaDmaDriver, DRIVER_INFO, DRIVER_NAME};
pub use ids::ID_TABLE;

/// Register the driver on `bus`
///
/// Returns the number of present devices it attached to.
pub fn init<P: PciPlatform>(bus: &mut PciBus<P>, config: DriverConfig) -> Result<usize> {
    log::info!(
        "{} {}: {} ({})",
        DRIVER_INFO.name,
        DRIVER_INFO.version,
        DRIVER_INFO.description,
        bus.platform().name()
    );
    bus.register_driver(Box::new(FpgaDmaDriver::new(config)))
}

/// Unregister the driver, detaching every bound device
pub fn exit<P: PciPlatform>(bus: &mut PciBus<P>) -> Result<()> {
    bus.unregister_driver(DRIVER_NAME)?;
    log::info!("{}: unloaded", DRIVER_NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use pcie_hal::sim::{Call, CallKind, FailPoint, SimPlatform};
    use pcie_hal::{DeviceHandle, DeviceState, Error, PciId};

    use super::*;
    use crate::ids::{DEVICE_ID, VENDOR_ID};

    const BOARD: PciId = PciId::new(VENDOR_ID, DEVICE_ID);
    const NIC: PciId = PciId::new(0x10ec, 0x8168);

    fn plug(bus: &mut PciBus<SimPlatform>, id: PciId) -> DeviceHandle {
        let handle = bus.platform_mut().add_device(id, 0x2000);
        let probed = bus.platform().device_id(handle).unwrap();
        bus.device_added(handle, probed).unwrap();
        handle
    }

    #[test]
    fn test_init_binds_matching_devices_only() {
        let mut bus = PciBus::new(SimPlatform::new());
        let board = plug(&mut bus, BOARD);
        let nic = plug(&mut bus, NIC);

        assert_eq!(init(&mut bus, DriverConfig::DEFAULT), Ok(1));
        assert_eq!(bus.device(board).unwrap().driver(), Some(DRIVER_NAME));
        assert_eq!(bus.device(board).unwrap().state(), DeviceState::Active);
        assert!(!bus.device(nic).unwrap().is_bound());
        assert!(bus.platform().usage(nic).is_idle());
    }

    #[test]
    fn test_duplicate_init_rejected() {
        let mut bus = PciBus::new(SimPlatform::new());
        init(&mut bus, DriverConfig::DEFAULT).unwrap();
        assert_eq!(init(&mut bus, DriverConfig::DEFAULT), Err(Error::AlreadyRegistered));
    }

    #[test]
    fn test_hotplug_add_remove() {
        let mut bus = PciBus::new(SimPlatform::new());
        init(&mut bus, DriverConfig::DEFAULT).unwrap();

        let board = plug(&mut bus, BOARD);
        assert!(bus.device(board).unwrap().is_bound());
        assert_eq!(bus.device(board).unwrap().last_status(), 0);
        assert!(bus.platform().usage(board).drvdata);

        bus.device_removed(board).unwrap();
        assert!(bus.device(board).is_none());
        assert!(bus.platform().usage(board).is_idle());
        assert_eq!(bus.device_removed(board), Err(Error::DeviceNotFound));
    }

    #[test]
    fn test_failed_probe_records_status() {
        let mut bus = PciBus::new(SimPlatform::new());
        init(&mut bus, DriverConfig::DEFAULT).unwrap();

        bus.platform_mut().fail_next(FailPoint::DmaAlloc);
        let board = plug(&mut bus, BOARD);

        let device = bus.device(board).unwrap();
        assert!(!device.is_bound());
        assert_eq!(device.state(), DeviceState::Error);
        assert_eq!(device.last_status(), -12);

        // unbound, so no detach
        let log = bus.platform().log();
        log.clear();
        bus.device_removed(board).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_exit_detaches_everything() {
        let mut bus = PciBus::new(SimPlatform::new());
        let first = plug(&mut bus, BOARD);
        let second = plug(&mut bus, BOARD);
        assert_eq!(init(&mut bus, DriverConfig::DEFAULT), Ok(2));

        let log = bus.platform().log();
        assert_eq!(exit(&mut bus), Ok(()));
        assert_eq!(log.count(CallKind::TakeDrvdata), 2);
        assert!(bus.platform().usage(first).is_idle());
        assert!(bus.platform().usage(second).is_idle());
        assert!(!bus.is_registered(DRIVER_NAME));
        assert!(bus.devices().all(|d| !d.is_bound()));
        assert_eq!(bus.devices().map(|d| d.handle()).collect::<Vec<_>>(), [first, second]);

        assert_eq!(exit(&mut bus), Err(Error::DriverNotFound));
    }

    #[test]
    fn test_reinit_after_exit() {
        let mut bus = PciBus::new(SimPlatform::new());
        let board = plug(&mut bus, BOARD);
        init(&mut bus, DriverConfig::DEFAULT).unwrap();
        exit(&mut bus).unwrap();

        assert_eq!(init(&mut bus, DriverConfig::DEFAULT), Ok(1));
        assert!(bus.device(board).unwrap().is_bound());
    }

    #[test]
    fn test_duplicate_device_rejected() {
        let mut bus = PciBus::new(SimPlatform::new());
        let board = plug(&mut bus, BOARD);
        assert_eq!(bus.device_added(board, BOARD), Err(Error::DeviceExists));
    }

    #[test]
    fn test_exit_detaches_in_arrival_order() {
        let mut bus = PciBus::new(SimPlatform::new());
        init(&mut bus, DriverConfig::DEFAULT).unwrap();
        let first = plug(&mut bus, BOARD);
        let nic = plug(&mut bus, NIC);
        let second = plug(&mut bus, BOARD);
        assert!(!bus.device(nic).unwrap().is_bound());

        let log = bus.platform().log();
        log.clear();
        exit(&mut bus).unwrap();

        let taken: Vec<DeviceHandle> = log
            .calls()
            .iter()
            .filter_map(|call| match call {
                Call::TakeDrvdata { device } => Some(*device),
                _ => None,
            })
            .collect();
        assert_eq!(taken, [first, second]);
    }
}
