//! # Detach
//!
//! Takes the published [`DeviceContext`] out of the driver-data slot and
//! releases it. The bus only calls this after a successful attach, so an
//! empty slot is a defect and panics.

use pcie_hal::{DeviceHandle, PciPlatform};

use crate::context::DeviceContext;

/// Detach the driver from `device`
///
/// # Panics
///
/// Panics if `device` has no context published by this driver.
pub fn detach<P: PciPlatform>(platform: &mut P, device: DeviceHandle) {
    let Some(data) = platform.take_drvdata(device) else {
        log::error!("fpga-dma: {}: detach without a device context", device);
        panic!("fpga-dma: no device context for {}", device);
    };

    let context = match data.downcast::<DeviceContext>() {
        Ok(context) => context,
        Err(_) => {
            log::error!("fpga-dma: {}: driver data is not a device context", device);
            panic!("fpga-dma: foreign driver data for {}", device);
        },
    };

    context.release(platform);
    log::info!("fpga-dma: {} detached", device);
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use pcie_hal::sim::{CallKind, SimPlatform};
    use pcie_hal::PciId;

    use super::*;
    use crate::attach::attach;
    use crate::config::DriverConfig;

    fn attached() -> (SimPlatform, DeviceHandle) {
        let mut sim = SimPlatform::new();
        let dev = sim.add_device(PciId::new(0x1363, 0x0007), 0x2000);
        attach(&mut sim, dev, &DriverConfig::DEFAULT).unwrap();
        sim.log().clear();
        (sim, dev)
    }

    #[test]
    fn test_detach_release_order() {
        let (mut sim, dev) = attached();
        detach(&mut sim, dev);

        assert_eq!(sim.log().kinds(), [
            CallKind::TakeDrvdata,
            CallKind::DmaFree,
            CallKind::Iounmap,
            CallKind::ReleaseRegion,
            CallKind::Disable,
            CallKind::FreeRecord,
        ]);
        assert!(sim.usage(dev).is_idle());
    }

    #[test]
    fn test_detach_leaves_other_devices() {
        let (mut sim, first) = attached();
        let second = sim.add_device(PciId::new(0x1363, 0x0007), 0x2000);
        attach(&mut sim, second, &DriverConfig::DEFAULT).unwrap();

        let log = sim.log();
        log.clear();
        detach(&mut sim, first);
        assert!(sim.usage(first).is_idle());
        assert!(log.kinds_for(second).is_empty());
        assert_eq!(log.kinds_for(first), [
            CallKind::TakeDrvdata,
            CallKind::DmaFree,
            CallKind::Iounmap,
            CallKind::ReleaseRegion,
            CallKind::Disable,
            CallKind::FreeRecord,
        ]);
        assert!(sim.usage(second).drvdata);
        assert_eq!(sim.usage(second).mappings, 1);
    }

    #[test]
    #[should_panic(expected = "no device context")]
    fn test_detach_without_context_panics() {
        let mut sim = SimPlatform::new();
        let dev = sim.add_device(PciId::new(0x1363, 0x0007), 0x2000);
        detach(&mut sim, dev);
    }

    #[test]
    #[should_panic(expected = "foreign driver data")]
    fn test_detach_foreign_data_panics() {
        let mut sim = SimPlatform::new();
        let dev = sim.add_device(PciId::new(0x1363, 0x0007), 0x2000);
        sim.set_drvdata(dev, Box::new(0u8)).unwrap();
        detach(&mut sim, dev);
    }

    #[test]
    #[should_panic(expected = "no device context")]
    fn test_double_detach_panics() {
        let (mut sim, dev) = attached();
        detach(&mut sim, dev);
        detach(&mut sim, dev);
    }
}
