//! # Driver Configuration
//!
//! Attach parameters. [`DriverConfig::DEFAULT`] reproduces the board's
//! reference setup; the `fpga-power-on` feature changes the value written
//! at attach time.

use pcie_hal::{BarIndex, PAGE_SIZE};
use static_assertions::const_assert;

/// Name the BAR region is reserved under
pub const REGION_OWNER: &str = "fpga-dma";

/// Register offset written during attach
pub const DEFAULT_WRITE_OFFSET: usize = 0x1000;

cfg_if::cfg_if! {
    if #[cfg(feature = "fpga-power-on")] {
        /// Value written during attach
        pub const DEFAULT_WRITE_VALUE: u32 = 0x1111_1111;
    } else {
        /// Value written during attach
        pub const DEFAULT_WRITE_VALUE: u32 = 0x0;
    }
}

const_assert!(DEFAULT_WRITE_OFFSET % 4 == 0);
const_assert!(PAGE_SIZE.is_power_of_two());

/// One 32-bit register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub offset: usize,
    pub value: u32,
}

impl RegisterWrite {
    /// Create write
    pub const fn new(offset: usize, value: u32) -> Self {
        Self { offset, value }
    }

    /// Smallest window length that contains this write
    pub const fn required_len(&self) -> usize {
        self.offset.saturating_add(4)
    }
}

/// Attach configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// BAR holding the register window
    pub bar: BarIndex,
    /// Owner name for the region reservation
    pub region_owner: &'static str,
    /// Size of the coherent DMA buffer
    pub dma_size: usize,
    /// Register write performed once the window is mapped
    pub register_write: Option<RegisterWrite>,
    /// Fail attach instead of skipping a write that does not fit the window
    pub strict_window: bool,
}

impl DriverConfig {
    /// Reference configuration
    pub const DEFAULT: DriverConfig = DriverConfig {
        bar: BarIndex::BAR0,
        region_owner: REGION_OWNER,
        dma_size: PAGE_SIZE,
        register_write: Some(RegisterWrite::new(DEFAULT_WRITE_OFFSET, DEFAULT_WRITE_VALUE)),
        strict_window: false,
    };

    /// Set the BAR holding the register window
    pub const fn with_bar(mut self, bar: BarIndex) -> Self {
        self.bar = bar;
        self
    }

    /// Set the region reservation owner name
    pub const fn with_region_owner(mut self, owner: &'static str) -> Self {
        self.region_owner = owner;
        self
    }

    /// Set the DMA buffer size
    pub const fn with_dma_size(mut self, size: usize) -> Self {
        self.dma_size = size;
        self
    }

    /// Set the register write performed at attach
    pub const fn with_register_write(mut self, offset: usize, value: u32) -> Self {
        self.register_write = Some(RegisterWrite::new(offset, value));
        self
    }

    /// Disable the register write
    pub const fn without_register_write(mut self) -> Self {
        self.register_write = None;
        self
    }

    /// Set whether a write outside the window fails attach
    pub const fn with_strict_window(mut self, strict: bool) -> Self {
        self.strict_window = strict;
        self
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
