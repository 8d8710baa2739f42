//! Latched VME bus-error record.
//!
//! The bridge latches the first bus error it sees together with the
//! faulting address. The record stays untouched until it is read, and
//! reading it clears it.

use std::fmt;

use bitfield_struct::bitfield;

use crate::AddressSpace;

/// Raw 32-bit status word of the latched error record.
///
/// Layout (LSB to MSB):
/// - bit 0: error latched since the last readout
/// - bit 1: overflow (never set by the hardware)
/// - bit 2: error was on a write access
/// - bit 3: error was a bus timeout
/// - bits 4..5: originator of the access
/// - bits 6..22: id (meaning undocumented, kept opaque)
/// - bits 23..27: length in words (meaning undocumented, kept opaque)
/// - bits 28..31: addressing mode code
#[bitfield(u32)]
#[derive(PartialEq, Eq, Hash)]
pub struct VmeErrorStatus {
    /// Error latched since the last readout.
    pub err: bool,
    /// More than one error happened.
    pub over: bool,
    /// Failed access was a write.
    pub write: bool,
    /// Failed access ended in a bus timeout.
    pub timeout: bool,
    /// Originator code, see [`ErrorSource`].
    #[bits(2)]
    pub source: u8,
    /// Opaque id field.
    #[bits(17)]
    pub id: u32,
    /// Opaque length field.
    #[bits(5)]
    pub length: u8,
    /// Addressing mode code, see [`AddressingMode`].
    #[bits(4)]
    pub mode: u8,
}

/// Originator of the access that produced a bus error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSource {
    /// Host access through the PCIe master path.
    Pcie,
    /// Unassigned originator code 1.
    Reserved,
    /// Internal DMA engine.
    Idma,
    /// User logic.
    User,
}

impl ErrorSource {
    /// Decodes a 2-bit originator code.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => Self::Pcie,
            1 => Self::Reserved,
            2 => Self::Idma,
            _ => Self::User,
        }
    }

    /// Returns the 2-bit originator code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Pcie => 0,
            Self::Reserved => 1,
            Self::Idma => 2,
            Self::User => 3,
        }
    }
}

/// VME addressing mode of the access that produced a bus error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    /// CR/CSR single cycle.
    CrCsr,
    /// A16 single cycle.
    A16,
    /// A24 single cycle.
    A24,
    /// A32 single cycle.
    A32,
    /// Block transfer.
    Blt,
    /// Multiplexed block transfer.
    Mblt,
    /// Two-edge VME.
    TwoEdgeVme,
    /// Two-edge source synchronous at 160 MB/s.
    TwoEdgeSst160,
    /// Two-edge source synchronous at 267 MB/s.
    TwoEdgeSst267,
    /// Two-edge source synchronous at 320 MB/s.
    TwoEdgeSst320,
    /// Interrupt acknowledge cycle.
    Iack,
    /// Code without an assigned mode.
    Reserved(u8),
}

impl AddressingMode {
    /// Decodes a 4-bit mode code.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code & 0xF {
            0 => Self::CrCsr,
            1 => Self::A16,
            2 => Self::A24,
            3 => Self::A32,
            4 => Self::Blt,
            5 => Self::Mblt,
            6 => Self::TwoEdgeVme,
            8 => Self::TwoEdgeSst160,
            9 => Self::TwoEdgeSst267,
            10 => Self::TwoEdgeSst320,
            15 => Self::Iack,
            other => Self::Reserved(other),
        }
    }

    /// Returns the 4-bit mode code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::CrCsr => 0,
            Self::A16 => 1,
            Self::A24 => 2,
            Self::A32 => 3,
            Self::Blt => 4,
            Self::Mblt => 5,
            Self::TwoEdgeVme => 6,
            Self::TwoEdgeSst160 => 8,
            Self::TwoEdgeSst267 => 9,
            Self::TwoEdgeSst320 => 10,
            Self::Iack => 15,
            Self::Reserved(code) => code & 0xF,
        }
    }

    /// Single-cycle mode used for plain accesses to `space`.
    #[must_use]
    pub const fn single_cycle(space: AddressSpace) -> Self {
        match space {
            AddressSpace::CrCsr => Self::CrCsr,
            AddressSpace::A16 => Self::A16,
            AddressSpace::A24 => Self::A24,
            AddressSpace::A32 => Self::A32,
        }
    }
}

/// One readout of the latched bus-error register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VmeBusError {
    /// Faulting bus address; the lowest two bits are always zero.
    pub address: u64,
    /// Status word.
    pub status: VmeErrorStatus,
}

impl VmeBusError {
    /// Readout of an empty register.
    pub const NONE: Self = Self {
        address: 0,
        status: VmeErrorStatus::new(),
    };

    /// Builds the record a bus timeout of a single-cycle access would latch.
    #[must_use]
    pub const fn timeout(
        source: ErrorSource,
        mode: AddressingMode,
        address: u64,
        is_write: bool,
    ) -> Self {
        Self {
            address: address & !0b11,
            status: VmeErrorStatus::new()
                .with_err(true)
                .with_write(is_write)
                .with_timeout(true)
                .with_source(source.code())
                .with_mode(mode.code()),
        }
    }

    /// Decodes a raw address and status word pair.
    #[must_use]
    pub const fn from_raw(address: u64, status: u32) -> Self {
        Self {
            address: address & !0b11,
            status: VmeErrorStatus::from_bits(status),
        }
    }

    /// Returns `true` when an error was latched.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.status.err()
    }

    /// Returns `true` when the failed access was a write.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        self.status.write()
    }

    /// Returns `true` when the failed access timed out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        self.status.timeout()
    }

    /// Originator of the failed access.
    #[must_use]
    pub const fn source(&self) -> ErrorSource {
        ErrorSource::from_code(self.status.source())
    }

    /// Addressing mode of the failed access.
    #[must_use]
    pub const fn mode(&self) -> AddressingMode {
        AddressingMode::from_code(self.status.mode())
    }

    /// Opaque id field.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.status.id()
    }

    /// Opaque length field.
    #[must_use]
    pub const fn length(&self) -> u8 {
        self.status.length()
    }
}

impl fmt::Display for VmeBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_error() {
            return f.write_str("no error");
        }
        write!(
            f,
            "{:?} {} {:?} at {:#x}{}",
            self.source(),
            if self.is_write() { "write" } else { "read" },
            self.mode(),
            self.address,
            if self.is_timeout() { " (timeout)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressingMode, ErrorSource, VmeBusError, VmeErrorStatus};
    use crate::AddressSpace;

    #[test]
    fn status_word_layout_matches_register() {
        let status = VmeErrorStatus::from_bits(0x3000_0000 | 0b1_1101);
        assert!(status.err());
        assert!(!status.over());
        assert!(status.write());
        assert!(status.timeout());
        assert_eq!(status.source(), 1);
        assert_eq!(status.mode(), 3);

        let opaque = VmeErrorStatus::from_bits((0x1_2345 << 6) | (0x15 << 23));
        assert_eq!(opaque.id(), 0x1_2345);
        assert_eq!(opaque.length(), 0x15);
        assert!(!opaque.err());
    }

    #[test]
    fn timeout_record_clears_low_address_bits() {
        let err = VmeBusError::timeout(
            ErrorSource::Pcie,
            AddressingMode::A24,
            0x12_3457,
            true,
        );
        assert_eq!(err.address, 0x12_3454);
        assert!(err.is_error());
        assert!(err.is_write());
        assert!(err.is_timeout());
        assert_eq!(err.source(), ErrorSource::Pcie);
        assert_eq!(err.mode(), AddressingMode::A24);
    }

    #[test]
    fn empty_register_reports_no_error() {
        assert!(!VmeBusError::NONE.is_error());
        assert_eq!(VmeBusError::NONE.to_string(), "no error");
        assert_eq!(VmeBusError::default(), VmeBusError::NONE);
    }

    #[test]
    fn mode_codes_roundtrip() {
        for code in 0u8..16 {
            assert_eq!(AddressingMode::from_code(code).code(), code);
        }
        assert_eq!(AddressingMode::from_code(7), AddressingMode::Reserved(7));
        assert_eq!(AddressingMode::from_code(15), AddressingMode::Iack);
    }

    #[test]
    fn source_codes_roundtrip() {
        for code in 0u8..4 {
            assert_eq!(ErrorSource::from_code(code).code(), code);
        }
        assert_eq!(ErrorSource::from_code(2), ErrorSource::Idma);
    }

    #[test]
    fn single_cycle_modes_follow_space() {
        assert_eq!(
            AddressingMode::single_cycle(AddressSpace::CrCsr),
            AddressingMode::CrCsr
        );
        assert_eq!(
            AddressingMode::single_cycle(AddressSpace::A32).code(),
            3
        );
    }

    #[test]
    fn raw_decode_keeps_opaque_fields() {
        let err = VmeBusError::from_raw(0xFFFF_FFFF, (7 << 6) | (3 << 23) | 1);
        assert_eq!(err.address, 0xFFFF_FFFC);
        assert_eq!(err.id(), 7);
        assert_eq!(err.length(), 3);
        assert_eq!(err.mode(), AddressingMode::CrCsr);
    }
}
