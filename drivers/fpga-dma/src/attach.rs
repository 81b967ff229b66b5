//! # Attach
//!
//! Acquisition chain run when the bus matches a device:
//!
//! 1. context record
//! 2. bus-level enable
//! 3. BAR region reservation and mapping
//! 4. coherent DMA buffer
//! 5. optional register write
//! 6. publication in the driver-data slot
//!
//! A failed step returns through `?` and the [`PartialContext`] guard
//! releases what earlier steps acquired. Publication is the last call made;
//! if the slot rejects the context, the context is released in full.
//!
//! Step 1 only charges the record to the platform's accounting. The memory
//! that actually holds the context is the `Box` built at publication, and
//! that allocation aborts on exhaustion rather than failing with `-ENOMEM`.

use alloc::boxed::Box;

use pcie_hal::{DeviceHandle, Error, PciPlatform, Result, SlotOccupied};

use crate::config::DriverConfig;
use crate::context::{DeviceContext, PartialContext};

/// Attach the driver to `device`
pub fn attach<P: PciPlatform>(
    platform: &mut P,
    device: DeviceHandle,
    config: &DriverConfig,
) -> Result<()> {
    let context = acquire(platform, device, config)?;
    publish(platform, context)?;

    log::info!("fpga-dma: {} attached", device);
    Ok(())
}

fn acquire<P: PciPlatform>(
    platform: &mut P,
    device: DeviceHandle,
    config: &DriverConfig,
) -> Result<DeviceContext> {
    let mut partial = PartialContext::new(platform, device);

    partial.alloc_record().map_err(|e| {
        log::error!("fpga-dma: {}: cannot allocate device context: {}", device, e);
        e
    })?;

    partial.enable().map_err(|e| {
        log::error!("fpga-dma: {}: cannot enable device: {}", device, e);
        e
    })?;

    let len = partial
        .map_bar(config.bar, config.region_owner)
        .map_err(|e| {
            log::error!("fpga-dma: {}: cannot map {}: {}", device, config.bar, e);
            e
        })?;
    log::debug!("fpga-dma: {}: {} mapped, {:#x} bytes", device, config.bar, len);

    let bus_addr = partial.alloc_dma(config.dma_size).map_err(|e| {
        log::error!("fpga-dma: {}: cannot allocate DMA buffer: {}", device, e);
        e
    })?;
    log::info!("fpga-dma: {}: DMA buffer at bus address {:#x}", device, bus_addr);

    if let Some(write) = config.register_write {
        if partial.write_register(write)? {
            log::info!(
                "fpga-dma: {}: wrote {:#010x} at offset {:#x}",
                device,
                write.value,
                write.offset
            );
        } else if config.strict_window {
            log::error!(
                "fpga-dma: {}: window of {:#x} bytes cannot hold offset {:#x}",
                device,
                partial.window_len(),
                write.offset
            );
            return Err(Error::WindowTooSmall);
        } else {
            log::warn!(
                "fpga-dma: {}: window of {:#x} bytes too small for offset {:#x}, skipping write",
                device,
                partial.window_len(),
                write.offset
            );
        }
    }

    partial.commit()
}

fn publish<P: PciPlatform>(platform: &mut P, context: DeviceContext) -> Result<()> {
    let device = context.device();
    match platform.set_drvdata(device, Box::new(context)) {
        Ok(()) => Ok(()),
        Err(SlotOccupied(data)) => {
            log::error!("fpga-dma: {}: driver data slot already occupied", device);
            let Ok(context) = data.downcast::<DeviceContext>() else {
                log::error!("fpga-dma: {}: slot returned foreign data", device);
                panic!("fpga-dma: slot returned foreign data for {}", device);
            };
            context.release(platform);
            Err(Error::SlotOccupied)
        },
    }
}
