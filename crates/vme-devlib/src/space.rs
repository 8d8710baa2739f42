//! VME address spaces, their extents, and the A24 chunking geometry.

use std::fmt;

/// Extent of A16 space in bytes (64 KiB).
pub const A16_LIMIT: u64 = 0x1_0000;
/// Extent of A24 space in bytes (16 MiB).
pub const A24_LIMIT: u64 = 0x100_0000;
/// Extent of A32 space in bytes (4 GiB).
pub const A32_LIMIT: u64 = 0x1_0000_0000;
/// Default extent of CR/CSR space in bytes (16 MiB, 24-bit addressing).
pub const CRCSR_DEFAULT_LIMIT: u64 = 0x100_0000;

/// Size of the chunks A24 space is windowed in (4 MiB).
pub const A24_CHUNK_BYTES: u64 = 0x40_0000;
/// Address bits selecting the A24 chunk (bits 22 and 23).
pub const A24_CHUNK_MASK: u64 = A24_LIMIT - A24_CHUNK_BYTES;

/// Logical VME address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AddressSpace {
    /// 16-bit short I/O space.
    A16,
    /// 24-bit standard space.
    A24,
    /// 32-bit extended space.
    A32,
    /// Configuration ROM / control and status register space.
    CrCsr,
}

impl AddressSpace {
    /// All address spaces in canonical order.
    pub const ALL: [Self; 4] = [Self::A16, Self::A24, Self::A32, Self::CrCsr];

    /// Returns the addressable extent of this space in bytes.
    ///
    /// CR/CSR space is device specific; `crcsr_limit` supplies its extent.
    #[must_use]
    pub const fn limit(self, crcsr_limit: u64) -> u64 {
        match self {
            Self::A16 => A16_LIMIT,
            Self::A24 => A24_LIMIT,
            Self::A32 => A32_LIMIT,
            Self::CrCsr => crcsr_limit,
        }
    }

    /// Short upper-case name used in address strings and log output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::A16 => "A16",
            Self::A24 => "A24",
            Self::A32 => "A32",
            Self::CrCsr => "CRCSR",
        }
    }

    /// Parses a space name (`A16`, `A24`, `A32`, `CRCSR`/`CSR`), ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|space| space.name().eq_ignore_ascii_case(name))
            .or_else(|| name.eq_ignore_ascii_case("CSR").then_some(Self::CrCsr))
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// VME privilege (address modifier class) used when opening a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Privilege {
    /// Supervisory address modifiers.
    #[default]
    Supervisory,
    /// Non-privileged address modifiers.
    User,
}

/// Returns the base of the 4 MiB A24 chunk containing `address`.
#[must_use]
pub const fn a24_chunk_base(address: u64) -> u64 {
    address & A24_CHUNK_MASK
}

/// Returns `true` when `[base, base + size)` lies inside one A24 chunk.
///
/// A zero-sized range is treated as the single byte at `base`.
#[must_use]
pub const fn fits_in_a24_chunk(base: u64, size: u64) -> bool {
    let last = base.saturating_add(size.saturating_sub(1));
    (base ^ last) & !(A24_CHUNK_BYTES - 1) == 0
}
