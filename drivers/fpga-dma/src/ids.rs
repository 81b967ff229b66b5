//! Device identities the driver binds to.

use pcie_hal::DeviceMatch;

cfg_if::cfg_if! {
    if #[cfg(feature = "emulated-device")] {
        /// Emulated chipset device used for bring-up
        pub const VENDOR_ID: u16 = 0x8086;
        pub const DEVICE_ID: u16 = 0x2a10;
    } else {
        /// FPGA development board
        pub const VENDOR_ID: u16 = 0x1363;
        pub const DEVICE_ID: u16 = 0x0007;
    }
}

/// Match table handed to the bus
pub static ID_TABLE: [DeviceMatch; 1] = [DeviceMatch::vendor_device(VENDOR_ID, DEVICE_ID)];

#[cfg(test)]
mod tests {
    use pcie_hal::PciId;

    use super::*;

    #[test]
    fn test_table_matches_board_only() {
        let board = PciId::new(VENDOR_ID, DEVICE_ID);
        assert!(ID_TABLE.iter().any(|m| m.matches(&board)));
        assert!(!ID_TABLE.iter().any(|m| m.matches(&PciId::new(VENDOR_ID, DEVICE_ID + 1))));
    }
}
