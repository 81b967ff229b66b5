//! # Error Handling
//!
//! Error taxonomy shared by platform implementations and PCI drivers.
//!
//! Every failure a platform primitive can report maps onto one of two
//! classes, and each class onto the negative status code handed back to the
//! bus:
//!
//! | Class | Status | Examples |
//! |-------|--------|----------|
//! | Memory | `-ENOMEM` | record allocation, DMA buffer allocation |
//! | Io | `-EIO` | device enable, region conflict, mapping, slot publication |

use core::fmt;

// =============================================================================
// ERRNO VALUES
// =============================================================================

/// I/O error
pub const EIO: i32 = 5;
/// Out of memory
pub const ENOMEM: i32 = 12;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// HAL result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR CLASS
// =============================================================================

/// Coarse failure class reported to the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Allocation exhaustion
    Memory,
    /// Resource conflict or device I/O failure
    Io,
}

impl ErrorClass {
    /// Negative errno for this class
    pub const fn errno(self) -> i32 {
        match self {
            ErrorClass::Memory => -ENOMEM,
            ErrorClass::Io => -EIO,
        }
    }
}

// =============================================================================
// ERROR ENUM
// =============================================================================

/// HAL error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// Driver-private record could not be allocated
    OutOfMemory,
    /// DMA-coherent buffer could not be allocated
    DmaAllocFailed,

    // =========================================================================
    // Device / Resource Errors
    // =========================================================================
    /// Device could not be enabled at bus level
    DeviceEnableFailed,
    /// Address region already reserved by another owner
    RegionBusy,
    /// BAR index out of range or BAR not implemented
    InvalidBar,
    /// Region could not be mapped into addressable memory
    MappingFailed,
    /// Register window too small for a required access
    WindowTooSmall,
    /// Per-device state slot already holds data
    SlotOccupied,

    // =========================================================================
    // Bus Errors
    // =========================================================================
    /// Device handle unknown to the bus
    DeviceNotFound,
    /// Device handle already known to the bus
    DeviceExists,
    /// A driver with the same name is already registered
    AlreadyRegistered,
    /// No driver with the given name is registered
    DriverNotFound,
}

impl Error {
    /// Failure class of this error
    pub const fn class(&self) -> ErrorClass {
        match self {
            Error::OutOfMemory | Error::DmaAllocFailed => ErrorClass::Memory,
            _ => ErrorClass::Io,
        }
    }

    /// Negative errno reported to the bus
    pub const fn errno(&self) -> i32 {
        self.class().errno()
    }

    /// Is this an allocation failure?
    pub const fn is_memory(&self) -> bool {
        matches!(self.class(), ErrorClass::Memory)
    }

    /// Is this a bus-level registration error?
    pub const fn is_bus(&self) -> bool {
        matches!(
            self,
            Error::DeviceNotFound
                | Error::DeviceExists
                | Error::AlreadyRegistered
                | Error::DriverNotFound
        )
    }

    /// Category name
    pub const fn category(&self) -> &'static str {
        match self {
            Error::OutOfMemory | Error::DmaAllocFailed => "Memory",
            Error::DeviceEnableFailed
            | Error::RegionBusy
            | Error::InvalidBar
            | Error::MappingFailed
            | Error::WindowTooSmall
            | Error::SlotOccupied => "Resource",
            Error::DeviceNotFound
            | Error::DeviceExists
            | Error::AlreadyRegistered
            | Error::DriverNotFound => "Bus",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::DmaAllocFailed => write!(f, "DMA buffer allocation failed"),
            Self::DeviceEnableFailed => write!(f, "failed to enable PCI device"),
            Self::RegionBusy => write!(f, "BAR region already reserved"),
            Self::InvalidBar => write!(f, "invalid BAR"),
            Self::MappingFailed => write!(f, "failed to map BAR"),
            Self::WindowTooSmall => write!(f, "register window too small"),
            Self::SlotOccupied => write!(f, "driver data slot occupied"),
            Self::DeviceNotFound => write!(f, "device not found"),
            Self::DeviceExists => write!(f, "device already present"),
            Self::AlreadyRegistered => write!(f, "driver already registered"),
            Self::DriverNotFound => write!(f, "driver not registered"),
        }
    }
}

/// Integer status for a probe result: 0 on success, negative errno otherwise
pub fn status_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.errno(),
    }
}
