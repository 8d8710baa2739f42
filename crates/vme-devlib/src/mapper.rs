//! Address-space mapper: turns bus-address requests into host windows.
//!
//! Windowing policy per space:
//! - A16 is small enough to map whole; every request offsets into the one
//!   64 KiB window.
//! - A24 requests that stay inside one 4 MiB chunk map that chunk, so at most
//!   four A24 chunk windows ever exist. Requests crossing a chunk boundary get
//!   an exact one-off window.
//! - A32 and CR/CSR requests map exactly what was asked for.
//!
//! Sharing and reference counting of identical windows is the allocator's job.

use log::{debug, warn};

use crate::{
    a24_chunk_base, fits_in_a24_chunk, AddressSpace, DevError, HostAddr, Privilege,
    WindowAllocator, WindowRequest, A16_LIMIT, A24_CHUNK_BYTES,
};

/// A bus-address range a caller wants to access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AddressSpaceRequest {
    /// Address space.
    pub space: AddressSpace,
    /// Bus base address of the range.
    pub base: u64,
    /// Size of the range in bytes.
    pub size: u64,
}

impl AddressSpaceRequest {
    /// Creates a request for `size` bytes at `space:base`.
    #[must_use]
    pub const fn new(space: AddressSpace, base: u64, size: u64) -> Self {
        Self { space, base, size }
    }
}

/// Host view of a requested range.
///
/// Only successfully mapped ranges are represented; the memory behind it is
/// owned by the window allocator and never released by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappedWindow {
    /// Host address of the first byte of the requested range.
    pub host: HostAddr,
    /// Window that was requested from the allocator.
    pub window: WindowRequest,
    /// Offset of the requested range inside that window.
    pub offset: u64,
}

impl MappedWindow {
    /// Host address of the start of the allocator window.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn window_host(&self) -> HostAddr {
        HostAddr(self.host.0.wrapping_sub(self.offset as usize))
    }
}

/// Selects the allocator window and intra-window offset for `request`.
///
/// The request must already be validated by [`validate_request`].
#[must_use]
pub const fn plan_window(
    request: &AddressSpaceRequest,
    privilege: Privilege,
) -> (WindowRequest, u64) {
    let AddressSpaceRequest { space, base, size } = *request;
    match space {
        AddressSpace::A16 => (
            WindowRequest {
                space,
                privilege: Some(privilege),
                base: 0,
                size: A16_LIMIT,
            },
            base,
        ),
        AddressSpace::A24 if fits_in_a24_chunk(base, size) => {
            let chunk = a24_chunk_base(base);
            (
                WindowRequest {
                    space,
                    privilege: Some(privilege),
                    base: chunk,
                    size: A24_CHUNK_BYTES,
                },
                base - chunk,
            )
        }
        AddressSpace::A24 | AddressSpace::A32 => (
            WindowRequest {
                space,
                privilege: Some(privilege),
                base,
                size,
            },
            0,
        ),
        AddressSpace::CrCsr => (
            WindowRequest {
                space,
                privilege: None,
                base,
                size,
            },
            0,
        ),
    }
}

/// Checks that `request` neither wraps nor leaves its address space.
///
/// # Errors
///
/// Returns [`DevError::BadArgument`] when `base + size` overflows and
/// [`DevError::OutOfRange`] when it exceeds the extent of the space.
pub fn validate_request(request: &AddressSpaceRequest, crcsr_limit: u64) -> Result<(), DevError> {
    let end = request
        .base
        .checked_add(request.size)
        .ok_or(DevError::BadArgument {
            reason: "address size overflow",
        })?;
    if end > request.space.limit(crcsr_limit) {
        return Err(DevError::OutOfRange {
            space: request.space,
            end,
        });
    }
    Ok(())
}

/// Maps bus-address requests through a [`WindowAllocator`].
#[derive(Debug)]
pub struct AddressMapper<A> {
    allocator: A,
    privilege: Privilege,
    crcsr_limit: u64,
}

impl<A: WindowAllocator> AddressMapper<A> {
    /// Creates a mapper opening windows with `privilege`.
    pub const fn new(allocator: A, privilege: Privilege, crcsr_limit: u64) -> Self {
        Self {
            allocator,
            privilege,
            crcsr_limit,
        }
    }

    /// Returns the underlying allocator.
    pub const fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Maps `request` and returns the host view of its first byte.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::BadArgument`] or [`DevError::OutOfRange`] for
    /// invalid requests (without calling the allocator) and
    /// [`DevError::MapFailed`] when the allocator produces no window.
    pub fn map(&self, request: &AddressSpaceRequest) -> Result<MappedWindow, DevError> {
        debug!(
            "map {}:{:#x}[{:#x}]",
            request.space, request.base, request.size
        );
        if let Err(err) = validate_request(request, self.crcsr_limit) {
            debug!("rejecting map request: {err}");
            return Err(err);
        }

        let (window, offset) = plan_window(request, self.privilege);
        let Some(window_host) = self.allocator.acquire_window(&window) else {
            warn!(
                "window allocator failed for {}:{:#x}[{:#x}]",
                window.space, window.base, window.size
            );
            return Err(DevError::MapFailed {
                space: window.space,
                base: window.base,
                size: window.size,
            });
        };

        #[allow(clippy::cast_possible_truncation)]
        let host = window_host.wrapping_add(offset as usize);
        debug!(
            "{}:{:#x}[{:#x}] mapped to {host}",
            request.space, request.base, request.size
        );
        Ok(MappedWindow {
            host,
            window,
            offset,
        })
    }
}
