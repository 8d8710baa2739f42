//! Collaborator contracts the device-support core is layered on.
//!
//! The platform backend of a bridge implements these traits: it owns the
//! window allocator and its reverse lookup, the latched bus-error register,
//! raw access to mapped host memory, and the interrupt controller. This
//! crate never touches hardware except through them.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::{AddressSpace, InterruptSource, Privilege, VmeBusError};

/// Host-side address of mapped memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HostAddr(pub usize);

impl HostAddr {
    /// Returns this address advanced by `bytes`, or `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, bytes: usize) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Returns this address advanced by `bytes`, wrapping on overflow.
    #[must_use]
    pub const fn wrapping_add(self, bytes: usize) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Logical bus address: an address space plus an offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusAddress {
    /// Address space.
    pub space: AddressSpace,
    /// Byte offset inside the space.
    pub address: u64,
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.space, self.address)
    }
}

/// A window request handed to the [`WindowAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowRequest {
    /// Address space of the window.
    pub space: AddressSpace,
    /// Privilege of the window; `None` for CR/CSR space.
    pub privilege: Option<Privilege>,
    /// Bus base address.
    pub base: u64,
    /// Size in bytes.
    pub size: u64,
}

/// Width of a single memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessWidth {
    /// 8-bit access.
    U8,
    /// 16-bit access.
    U16,
    /// 32-bit access.
    U32,
    /// 64-bit access.
    U64,
}

impl AccessWidth {
    /// Number of bytes moved by one access.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }

    /// Returns the width for a byte count of 1, 2, 4, or 8.
    #[must_use]
    pub const fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(Self::U8),
            2 => Some(Self::U16),
            4 => Some(Self::U32),
            8 => Some(Self::U64),
            _ => None,
        }
    }

    /// Mask selecting the value bits carried by this width.
    #[must_use]
    pub const fn value_mask(self) -> u64 {
        match self {
            Self::U8 => 0xFF,
            Self::U16 => 0xFFFF,
            Self::U32 => 0xFFFF_FFFF,
            Self::U64 => u64::MAX,
        }
    }

    /// Reverses the byte order of the low `bytes()` bytes of `value`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn swap_bytes(self, value: u64) -> u64 {
        match self {
            Self::U8 => value & 0xFF,
            Self::U16 => (value as u16).swap_bytes() as u64,
            Self::U32 => (value as u32).swap_bytes() as u64,
            Self::U64 => value.swap_bytes(),
        }
    }
}

/// A memory access touched an address that is not backed by anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("invalid address {addr}")]
pub struct AccessFault {
    /// Faulting host address.
    pub addr: HostAddr,
}

impl From<AccessFault> for crate::DevError {
    fn from(fault: AccessFault) -> Self {
        Self::InvalidAddress { addr: fault.addr }
    }
}

/// Fallible access to host-mapped memory.
///
/// Invalid addresses are reported as [`AccessFault`] instead of crashing
/// the process.
pub trait HostMemory {
    /// Reads one value of `width` from `addr`, zero-extended to 64 bits.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault`] when `addr` is not backed by memory.
    fn read(&self, addr: HostAddr, width: AccessWidth) -> Result<u64, AccessFault>;

    /// Writes the low bits of `value` with `width` to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault`] when `addr` is not backed by memory.
    fn write(&self, addr: HostAddr, width: AccessWidth, value: u64) -> Result<(), AccessFault>;

    /// Copies `len` bytes from `src` to `dst` with no element semantics.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault`] for the first byte that cannot be accessed.
    fn copy_bytes(&self, src: HostAddr, dst: HostAddr, len: usize) -> Result<(), AccessFault> {
        for offset in 0..len {
            let byte = self.read(src.wrapping_add(offset), AccessWidth::U8)?;
            self.write(dst.wrapping_add(offset), AccessWidth::U8, byte)?;
        }
        Ok(())
    }
}

/// Creates, shares, and reference-counts bus windows.
pub trait WindowAllocator {
    /// Returns the host address of the start of the requested range, or
    /// `None` when no window can be produced.
    fn acquire_window(&self, request: &WindowRequest) -> Option<HostAddr>;
}

/// Maps a host address back to the bus address it is a window onto.
pub trait AddressLookup {
    /// Returns the bus address behind `addr`, if it lies in a known window.
    fn resolve(&self, addr: HostAddr) -> Option<BusAddress>;
}

/// The bridge's latched bus-error register.
pub trait BusErrorRegister {
    /// Reads the latched error record and clears it.
    fn read_and_clear(&self) -> VmeBusError;
}

macro_rules! forward_through_pointers {
    ($($pointer:ty),+) => {$(
        impl<T: WindowAllocator + ?Sized> WindowAllocator for $pointer {
            fn acquire_window(&self, request: &WindowRequest) -> Option<HostAddr> {
                (**self).acquire_window(request)
            }
        }

        impl<T: AddressLookup + ?Sized> AddressLookup for $pointer {
            fn resolve(&self, addr: HostAddr) -> Option<BusAddress> {
                (**self).resolve(addr)
            }
        }

        impl<T: BusErrorRegister + ?Sized> BusErrorRegister for $pointer {
            fn read_and_clear(&self) -> VmeBusError {
                (**self).read_and_clear()
            }
        }

        impl<T: HostMemory + ?Sized> HostMemory for $pointer {
            fn read(&self, addr: HostAddr, width: AccessWidth) -> Result<u64, AccessFault> {
                (**self).read(addr, width)
            }

            fn write(
                &self,
                addr: HostAddr,
                width: AccessWidth,
                value: u64,
            ) -> Result<(), AccessFault> {
                (**self).write(addr, width, value)
            }

            fn copy_bytes(
                &self,
                src: HostAddr,
                dst: HostAddr,
                len: usize,
            ) -> Result<(), AccessFault> {
                (**self).copy_bytes(src, dst, len)
            }
        }
    )+};
}

forward_through_pointers!(&T, Arc<T>);

/// Interrupt service routine invoked with the parameter it was connected with.
pub type IsrFn = dyn Fn(usize) + Send + Sync;

/// Shareable handle to an interrupt service routine.
///
/// Handles compare equal when they refer to the same routine allocation,
/// which is how a routine is identified again on disconnect.
#[derive(Clone)]
pub struct InterruptHandler(Arc<IsrFn>);

impl InterruptHandler {
    /// Wraps `isr` in a new handler handle.
    pub fn new(isr: impl Fn(usize) + Send + Sync + 'static) -> Self {
        Self(Arc::new(isr))
    }

    /// Runs the routine.
    pub fn invoke(&self, parameter: usize) {
        (self.0)(parameter);
    }
}

impl PartialEq for InterruptHandler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for InterruptHandler {}

impl fmt::Debug for InterruptHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InterruptHandler")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Interrupt controller delivering vector events to dispatch threads.
pub trait InterruptController {
    /// Chains `handler` onto `vector` of `source`. Returns `false` on refusal.
    fn connect_handler(
        &self,
        source: InterruptSource,
        vector: u32,
        handler: InterruptHandler,
        parameter: usize,
    ) -> bool;

    /// Removes `handler` from `vector` of `source`. Returns `false` when the
    /// handler was not connected.
    fn disconnect_handler(
        &self,
        source: InterruptSource,
        vector: u32,
        handler: &InterruptHandler,
    ) -> bool;

    /// Body of a dispatch thread: waits for events of `source`/`vector` and
    /// runs the connected handlers. Returns when the controller shuts down.
    fn dispatch_loop(&self, source: InterruptSource, vector: u32);
}

/// Everything a bridge backend provides, bundled for [`crate::DevLib`].
pub trait VmeBridge:
    WindowAllocator
    + AddressLookup
    + BusErrorRegister
    + HostMemory
    + InterruptController
    + Send
    + Sync
    + 'static
{
}

impl<T> VmeBridge for T where
    T: WindowAllocator
        + AddressLookup
        + BusErrorRegister
        + HostMemory
        + InterruptController
        + Send
        + Sync
        + 'static
{
}
