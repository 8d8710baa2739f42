use thiserror::Error;

use crate::{AddressSpace, HostAddr};

/// Stable status codes reported to device-support callers.
///
/// Every [`DevError`] maps onto exactly one kind; out-of-range errors keep
/// one kind per address space so callers can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum StatusKind {
    /// Malformed request.
    BadArgument = 0x01,
    /// Request exceeds A16 space.
    BadA16 = 0x02,
    /// Request exceeds A24 space.
    BadA24 = 0x03,
    /// Request exceeds A32 space.
    BadA32 = 0x04,
    /// Request exceeds CR/CSR space.
    BadCrcsr = 0x05,
    /// Host address does not belong to any known window.
    AddressNotFound = 0x06,
    /// Nothing responded on the bus.
    NoDevice = 0x07,
    /// Window allocator could not produce a window.
    MapFailed = 0x08,
    /// Thread or resource allocation failed.
    NoMemory = 0x09,
    /// Interrupt controller rejected a handler.
    VectorInstallFailed = 0x0A,
    /// Interrupt controller had no such handler to remove.
    VectorNotInUse = 0x0B,
    /// Interrupt levels cannot be disabled on this bridge.
    InterruptDisableFailed = 0x0C,
    /// Unsupported transfer element width.
    IllegalWidth = 0x0D,
    /// Memory access to an invalid host address.
    InvalidAddress = 0x0E,
}

impl StatusKind {
    /// Converts the kind to its stable numeric code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable numeric code back into a kind.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::BadArgument),
            0x02 => Some(Self::BadA16),
            0x03 => Some(Self::BadA24),
            0x04 => Some(Self::BadA32),
            0x05 => Some(Self::BadCrcsr),
            0x06 => Some(Self::AddressNotFound),
            0x07 => Some(Self::NoDevice),
            0x08 => Some(Self::MapFailed),
            0x09 => Some(Self::NoMemory),
            0x0A => Some(Self::VectorInstallFailed),
            0x0B => Some(Self::VectorNotInUse),
            0x0C => Some(Self::InterruptDisableFailed),
            0x0D => Some(Self::IllegalWidth),
            0x0E => Some(Self::InvalidAddress),
            _ => None,
        }
    }

    /// Returns the out-of-range kind for `space`.
    #[must_use]
    pub const fn out_of_range(space: AddressSpace) -> Self {
        match space {
            AddressSpace::A16 => Self::BadA16,
            AddressSpace::A24 => Self::BadA24,
            AddressSpace::A32 => Self::BadA32,
            AddressSpace::CrCsr => Self::BadCrcsr,
        }
    }
}

/// Errors returned by every device-support operation of this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DevError {
    /// Malformed request: overflowing range, bad probe width, bad vector.
    #[error("bad argument: {reason}")]
    BadArgument {
        /// What was wrong with the request.
        reason: &'static str,
    },
    /// Requested range ends beyond the extent of its address space.
    #[error("{space} address {end:#x} out of range")]
    OutOfRange {
        /// Address space of the request.
        space: AddressSpace,
        /// Exclusive end of the requested range.
        end: u64,
    },
    /// Host address is not inside any mapped window.
    #[error("address {addr} not found in any window")]
    AddressNotFound {
        /// Address that failed the reverse lookup.
        addr: HostAddr,
    },
    /// A bus timeout was attributed to this access.
    #[error("no device at {space}:{address:#x}")]
    NoDevice {
        /// Address space of the access.
        space: AddressSpace,
        /// Bus address of the access.
        address: u64,
    },
    /// Window allocator returned no window.
    #[error("mapping {space}:{base:#x}[{size:#x}] failed")]
    MapFailed {
        /// Address space of the window.
        space: AddressSpace,
        /// Bus base address of the window.
        base: u64,
        /// Size of the window in bytes.
        size: u64,
    },
    /// Dispatch thread for a vector could not be started.
    #[error("cannot start interrupt thread for vector {vector:#x}")]
    NoMemory {
        /// Interrupt vector.
        vector: u32,
    },
    /// Interrupt controller refused the handler.
    #[error("cannot install handler for vector {vector:#x}")]
    VectorInstallFailed {
        /// Interrupt vector.
        vector: u32,
    },
    /// Interrupt controller did not know the handler.
    #[error("no such handler on vector {vector:#x}")]
    VectorNotInUse {
        /// Interrupt vector.
        vector: u32,
    },
    /// Interrupt level cannot be disabled.
    #[error("cannot disable interrupt level {level}")]
    InterruptDisableFailed {
        /// Requested interrupt level.
        level: u32,
    },
    /// Transfer element width is not one of the allowed widths.
    #[error("illegal width {width}: must be {allowed}")]
    IllegalWidth {
        /// Requested width.
        width: i32,
        /// Human readable list of allowed widths.
        allowed: &'static str,
    },
    /// Memory access hit an invalid host address.
    #[error("invalid address {addr}")]
    InvalidAddress {
        /// Faulting host address.
        addr: HostAddr,
    },
}

impl DevError {
    /// Returns the stable status kind of this error.
    #[must_use]
    pub const fn kind(&self) -> StatusKind {
        match self {
            Self::BadArgument { .. } => StatusKind::BadArgument,
            Self::OutOfRange { space, .. } => StatusKind::out_of_range(*space),
            Self::AddressNotFound { .. } => StatusKind::AddressNotFound,
            Self::NoDevice { .. } => StatusKind::NoDevice,
            Self::MapFailed { .. } => StatusKind::MapFailed,
            Self::NoMemory { .. } => StatusKind::NoMemory,
            Self::VectorInstallFailed { .. } => StatusKind::VectorInstallFailed,
            Self::VectorNotInUse { .. } => StatusKind::VectorNotInUse,
            Self::InterruptDisableFailed { .. } => StatusKind::InterruptDisableFailed,
            Self::IllegalWidth { .. } => StatusKind::IllegalWidth,
            Self::InvalidAddress { .. } => StatusKind::InvalidAddress,
        }
    }
}
