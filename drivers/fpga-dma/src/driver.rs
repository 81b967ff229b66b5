//! Bus-facing driver object.

use pcie_hal::{DeviceHandle, DeviceMatch, DriverInfo, PciDriver, PciPlatform, Result};

use crate::attach::attach;
use crate::config::DriverConfig;
use crate::detach::detach;
use crate::ids::ID_TABLE;

/// Driver name, also used to unregister
pub const DRIVER_NAME: &str = "fpga-dma";

/// Driver metadata
pub static DRIVER_INFO: DriverInfo = DriverInfo {
    name: DRIVER_NAME,
    version: "0.1",
    author: "Helix OS Contributors",
    description: "PCIe DMA Example Driver",
    license: "GPL",
    id_table: &ID_TABLE,
};

/// FPGA DMA driver
#[derive(Debug, Clone, Copy)]
pub struct FpgaDmaDriver {
    config: DriverConfig,
}

impl FpgaDmaDriver {
    /// Create driver with `config`
    pub const fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl Default for FpgaDmaDriver {
    fn default() -> Self {
        Self::new(DriverConfig::DEFAULT)
    }
}

impl<P: PciPlatform> PciDriver<P> for FpgaDmaDriver {
    fn info(&self) -> &DriverInfo {
        &DRIVER_INFO
    }

    fn probe(&self, platform: &mut P, device: DeviceHandle, entry: &DeviceMatch) -> Result<()> {
        log::debug!("fpga-dma: probing {} via {:?}", device, entry);
        attach(platform, device, &self.config)
    }

    fn remove(&self, platform: &mut P, device: DeviceHandle) {
        detach(platform, device);
    }
}
