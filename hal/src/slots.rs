//! Per-device opaque-state slots.
//!
//! Storage a platform implementation can use to back
//! [`PciPlatform::set_drvdata`](crate::PciPlatform::set_drvdata) and
//! [`PciPlatform::take_drvdata`](crate::PciPlatform::take_drvdata).

use alloc::collections::BTreeMap;

use crate::platform::{DriverData, SlotOccupied};
use crate::types::DeviceHandle;

/// Map from device handle to the driver data published for it
#[derive(Debug, Default)]
pub struct DriverDataSlots {
    slots: BTreeMap<DeviceHandle, DriverData>,
}

impl DriverDataSlots {
    /// Create empty slot table
    pub const fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// Publish data; an occupied slot is left untouched and the data returned
    pub fn set(
        &mut self,
        device: DeviceHandle,
        data: DriverData,
    ) -> core::result::Result<(), SlotOccupied> {
        if self.slots.contains_key(&device) {
            return Err(SlotOccupied(data));
        }
        self.slots.insert(device, data);
        Ok(())
    }

    /// Remove and return published data
    pub fn take(&mut self, device: DeviceHandle) -> Option<DriverData> {
        self.slots.remove(&device)
    }

    /// Borrow published data
    pub fn peek(&self, device: DeviceHandle) -> Option<&DriverData> {
        self.slots.get(&device)
    }

    /// Check whether the slot holds data
    pub fn contains(&self, device: DeviceHandle) -> bool {
        self.slots.contains_key(&device)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check whether every slot is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
