//! # PCI Bus
//!
//! Driver registration, device matching and attach/detach routing.
//!
//! The bus owns the platform, the list of present devices and the registered
//! drivers. It guarantees the pairing drivers rely on: a device is probed at
//! most once per binding, probe completes before remove is ever invoked, and
//! remove is invoked exactly once for every successful probe.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::error::{status_code, Error, Result};
use crate::platform::PciPlatform;
use crate::types::{DeviceHandle, PciId};

// =============================================================================
// MATCH TABLE
// =============================================================================

/// Vendor/device identity a driver binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMatch {
    pub vendor_id: u16,
    pub device_id: u16,
}

impl DeviceMatch {
    /// Create match for specific vendor/device
    pub const fn vendor_device(vendor: u16, device: u16) -> Self {
        Self {
            vendor_id: vendor,
            device_id: device,
        }
    }

    /// Check if device matches
    pub fn matches(&self, id: &PciId) -> bool {
        id.vendor_id == self.vendor_id && id.device_id == self.device_id
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// Driver information
#[derive(Debug, Clone, Copy)]
pub struct DriverInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub author: &'static str,
    pub description: &'static str,
    pub license: &'static str,
    pub id_table: &'static [DeviceMatch],
}

impl DriverInfo {
    /// Find the first table entry matching `id`
    pub fn match_id(&self, id: &PciId) -> Option<&'static DeviceMatch> {
        self.id_table.iter().find(|entry| entry.matches(id))
    }
}

/// PCI driver entry points
pub trait PciDriver<P: PciPlatform> {
    /// Get driver info
    fn info(&self) -> &DriverInfo;

    /// Attach to a matched device
    fn probe(&self, platform: &mut P, device: DeviceHandle, entry: &DeviceMatch) -> Result<()>;

    /// Detach from a device previously attached by a successful probe
    fn remove(&self, platform: &mut P, device: DeviceHandle);
}

// =============================================================================
// DEVICES
// =============================================================================

/// Device binding state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Present, no driver bound
    Discovered,
    /// Bound to a driver
    Active,
    /// Last probe failed
    Error,
}

/// Device known to the bus
#[derive(Debug, Clone)]
pub struct PciDevice {
    handle: DeviceHandle,
    id: PciId,
    state: DeviceState,
    driver: Option<&'static str>,
    last_status: i32,
}

impl PciDevice {
    fn new(handle: DeviceHandle, id: PciId) -> Self {
        Self {
            handle,
            id,
            state: DeviceState::Discovered,
            driver: None,
            last_status: 0,
        }
    }

    /// Device handle
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// Device identity
    pub fn id(&self) -> PciId {
        self.id
    }

    /// Binding state
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Name of the bound driver
    pub fn driver(&self) -> Option<&'static str> {
        self.driver
    }

    /// Status returned by the last probe (0 or negative errno)
    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    /// Has driver attached?
    pub fn is_bound(&self) -> bool {
        self.driver.is_some()
    }
}

// =============================================================================
// BUS
// =============================================================================

/// PCI bus: routes devices to registered drivers
pub struct PciBus<P: PciPlatform> {
    platform: P,
    devices: Vec<PciDevice>,
    drivers: Vec<Box<dyn PciDriver<P>>>,
}

impl<P: PciPlatform> PciBus<P> {
    /// Create bus over a platform
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            devices: Vec::new(),
            drivers: Vec::new(),
        }
    }

    /// Get platform
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Get platform (mutable)
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Get device by handle
    pub fn device(&self, handle: DeviceHandle) -> Option<&PciDevice> {
        self.devices.iter().find(|d| d.handle == handle)
    }

    /// Iterate over present devices
    pub fn devices(&self) -> impl Iterator<Item = &PciDevice> {
        self.devices.iter()
    }

    /// Check whether a driver is registered
    pub fn is_registered(&self, name: &str) -> bool {
        self.drivers.iter().any(|d| d.info().name == name)
    }

    /// Register a driver and probe every unbound matching device
    ///
    /// Returns the number of devices bound.
    pub fn register_driver(&mut self, driver: Box<dyn PciDriver<P>>) -> Result<usize> {
        let name = driver.info().name;
        if self.is_registered(name) {
            return Err(Error::AlreadyRegistered);
        }

        log::info!("pci: registered driver '{}'", name);
        self.drivers.push(driver);

        let driver = &self.drivers[self.drivers.len() - 1];
        let mut bound = 0;
        for device in self.devices.iter_mut().filter(|d| !d.is_bound()) {
            if bind(&mut self.platform, driver.as_ref(), device) {
                bound += 1;
            }
        }

        Ok(bound)
    }

    /// Detach every device bound to `name` in arrival order, then drop the driver
    pub fn unregister_driver(&mut self, name: &str) -> Result<()> {
        let index = self
            .drivers
            .iter()
            .position(|d| d.info().name == name)
            .ok_or(Error::DriverNotFound)?;

        let driver = self.drivers.remove(index);
        for device in self.devices.iter_mut().filter(|d| d.driver == Some(name)) {
            unbind(&mut self.platform, driver.as_ref(), device);
        }

        log::info!("pci: unregistered driver '{}'", name);
        Ok(())
    }

    /// Hotplug: a device appeared
    ///
    /// Drivers are tried in registration order until one attaches.
    pub fn device_added(&mut self, handle: DeviceHandle, id: PciId) -> Result<()> {
        if self.device(handle).is_some() {
            return Err(Error::DeviceExists);
        }

        log::debug!("pci: {} [{}] added", handle, id);
        let mut device = PciDevice::new(handle, id);
        for driver in &self.drivers {
            if bind(&mut self.platform, driver.as_ref(), &mut device) {
                break;
            }
        }
        self.devices.push(device);
        Ok(())
    }

    /// Hotplug: a device disappeared
    pub fn device_removed(&mut self, handle: DeviceHandle) -> Result<()> {
        let index = self
            .devices
            .iter()
            .position(|d| d.handle == handle)
            .ok_or(Error::DeviceNotFound)?;

        let mut device = self.devices.remove(index);
        if let Some(name) = device.driver {
            if let Some(driver) = self.drivers.iter().find(|d| d.info().name == name) {
                unbind(&mut self.platform, driver.as_ref(), &mut device);
            }
        }

        log::debug!("pci: {} removed", handle);
        Ok(())
    }
}

impl<P: PciPlatform> fmt::Debug for PciBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PciBus")
            .field("platform", &self.platform.name())
            .field("devices", &self.devices)
            .field("drivers", &self.drivers.iter().map(|d| d.info().name).collect::<Vec<_>>())
            .finish()
    }
}

/// Probe `device` with `driver` if the id table matches
fn bind<P: PciPlatform>(
    platform: &mut P,
    driver: &dyn PciDriver<P>,
    device: &mut PciDevice,
) -> bool {
    let info = driver.info();
    let Some(entry) = info.match_id(&device.id) else {
        return false;
    };

    let result = driver.probe(platform, device.handle, entry);
    device.last_status = status_code(&result);

    match result {
        Ok(()) => {
            device.driver = Some(info.name);
            device.state = DeviceState::Active;
            log::info!("pci: {} bound to driver '{}'", device.handle, info.name);
            true
        },
        Err(e) => {
            device.state = DeviceState::Error;
            log::warn!(
                "pci: probe of {} by '{}' failed: {} ({})",
                device.handle,
                info.name,
                e,
                device.last_status
            );
            false
        },
    }
}

fn unbind<P: PciPlatform>(platform: &mut P, driver: &dyn PciDriver<P>, device: &mut PciDevice) {
    driver.remove(platform, device.handle);
    device.driver = None;
    device.state = DeviceState::Discovered;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_device_match() {
        let entry = DeviceMatch::vendor_device(0x1363, 0x0007);
        assert!(entry.matches(&PciId::new(0x1363, 0x0007)));
        assert!(!entry.matches(&PciId::new(0x1363, 0x0008)));
        assert!(!entry.matches(&PciId::new(0x8086, 0x0007)));
    }

    #[test]
    fn test_match_id_table() {
        static TABLE: [DeviceMatch; 2] = [
            DeviceMatch::vendor_device(0x1363, 0x0007),
            DeviceMatch::vendor_device(0x1363, 0x0008),
        ];
        let info = DriverInfo {
            name: "test",
            version: "0",
            author: "",
            description: "",
            license: "",
            id_table: &TABLE,
        };
        assert_eq!(info.match_id(&PciId::new(0x1363, 0x7)), Some(&TABLE[0]));
        assert_eq!(info.match_id(&PciId::new(0x1363, 0x8)), Some(&TABLE[1]));
        assert_eq!(info.match_id(&PciId::new(0x1, 0x2)), None);
    }
}
