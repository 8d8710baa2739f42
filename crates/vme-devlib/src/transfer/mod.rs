//! Raw memory transfers over mapped windows.
//!
//! Fill, copy and compare walk memory element by element with a selectable
//! width, optionally reversing the byte order of every element. All accesses
//! go through [`HostMemory`], so an invalid address ends the transfer with
//! [`DevError::InvalidAddress`] instead of taking the process down.

/// `[space:]address` endpoints and size strings.
pub mod endpoint;
/// Throughput instrumentation.
pub mod throughput;
/// Element widths.
pub mod width;

pub use endpoint::{parse_number, parse_size, TransferEndpoint};
pub use throughput::{format_throughput, Stopwatch};
pub use width::{fill_width, TransferWidth, COPY_WIDTHS, FILL_WIDTHS};

use log::debug;

use crate::{AccessWidth, DevError, HostAddr, HostMemory};

/// A copy or compare between two host ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferSpec {
    /// First byte of the source range.
    pub source: HostAddr,
    /// First byte of the destination range.
    pub destination: HostAddr,
    /// Number of bytes covered.
    pub size: usize,
    /// Element width and byte order.
    pub width: TransferWidth,
}

/// A pattern fill of one host range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FillSpec {
    /// First byte of the range.
    pub destination: HostAddr,
    /// Number of bytes covered.
    pub size: usize,
    /// Element width.
    pub width: AccessWidth,
    /// Value of the first element.
    pub pattern: u32,
    /// Added to the pattern after every element.
    pub increment: i32,
}

/// Result of a compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOutcome {
    /// Every element matched.
    Equal,
    /// First differing element.
    Mismatch {
        /// Byte offset of the element.
        offset: usize,
    },
}

fn element_addr(base: HostAddr, index: usize, width: AccessWidth) -> HostAddr {
    base.wrapping_add(index * width.bytes())
}

/// Writes `spec.pattern` across the range, stepping the pattern by
/// `spec.increment` after every element.
///
/// Only whole elements are written.
///
/// # Errors
///
/// Returns [`DevError::InvalidAddress`] when an element cannot be written.
pub fn fill<M: HostMemory + ?Sized>(memory: &M, spec: &FillSpec) -> Result<(), DevError> {
    debug!(
        "fill {}[{:#x}] width={} pattern={:#x} increment={}",
        spec.destination,
        spec.size,
        spec.width.bytes(),
        spec.pattern,
        spec.increment
    );
    let mut pattern = spec.pattern;
    for index in 0..spec.size / spec.width.bytes() {
        memory.write(
            element_addr(spec.destination, index, spec.width),
            spec.width,
            u64::from(pattern) & spec.width.value_mask(),
        )?;
        pattern = pattern.wrapping_add_signed(spec.increment);
    }
    Ok(())
}

/// Copies the source range to the destination range.
///
/// Throughput is logged when `diagnostics` is set.
///
/// # Errors
///
/// Returns [`DevError::InvalidAddress`] when an element cannot be read or
/// written.
pub fn copy<M: HostMemory + ?Sized>(
    memory: &M,
    spec: &TransferSpec,
    diagnostics: bool,
) -> Result<(), DevError> {
    debug!(
        "copy {} -> {}[{:#x}] {:?}",
        spec.source, spec.destination, spec.size, spec.width
    );
    let stopwatch = Stopwatch::start(diagnostics);
    match spec.width {
        TransferWidth::Bulk => memory.copy_bytes(spec.source, spec.destination, spec.size)?,
        TransferWidth::Elements { width, swap } => {
            for index in 0..spec.size / width.bytes() {
                let mut value = memory.read(element_addr(spec.source, index, width), width)?;
                if swap {
                    value = width.swap_bytes(value);
                }
                memory.write(element_addr(spec.destination, index, width), width, value)?;
            }
        }
    }
    stopwatch.report(spec.size);
    Ok(())
}

/// Compares the destination range against the source range.
///
/// With a byte-swapping width, each destination element is compared with
/// the byte-reversed source element. A trailing partial element is ignored.
///
/// # Errors
///
/// Returns [`DevError::InvalidAddress`] when an element cannot be read.
pub fn compare<M: HostMemory + ?Sized>(
    memory: &M,
    spec: &TransferSpec,
) -> Result<CompareOutcome, DevError> {
    let (width, swap) = match spec.width {
        TransferWidth::Bulk => (AccessWidth::U8, false),
        TransferWidth::Elements { width, swap } => (width, swap),
    };
    for index in 0..spec.size / width.bytes() {
        let mut expected = memory.read(element_addr(spec.source, index, width), width)?;
        if swap {
            expected = width.swap_bytes(expected);
        }
        let actual = memory.read(element_addr(spec.destination, index, width), width)?;
        if actual != expected {
            let offset = index * width.bytes();
            debug!("mismatch at offset {offset:#x}");
            return Ok(CompareOutcome::Mismatch { offset });
        }
    }
    Ok(CompareOutcome::Equal)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::{compare, copy, fill, CompareOutcome, FillSpec, TransferSpec, TransferWidth};
    use crate::{AccessFault, AccessWidth, DevError, HostAddr, HostMemory};

    /// Little-endian byte arena starting at host address 0.
    struct Arena(RefCell<Vec<u8>>);

    impl Arena {
        fn new(len: usize) -> Self {
            Self(RefCell::new(vec![0; len]))
        }

        fn bytes(&self, start: usize, len: usize) -> Vec<u8> {
            self.0.borrow()[start..start + len].to_vec()
        }
    }

    impl HostMemory for Arena {
        fn read(&self, addr: HostAddr, width: AccessWidth) -> Result<u64, AccessFault> {
            let bytes = self.0.borrow();
            let slice = bytes
                .get(addr.0..addr.0 + width.bytes())
                .ok_or(AccessFault { addr })?;
            let mut raw = [0; 8];
            raw[..slice.len()].copy_from_slice(slice);
            Ok(u64::from_le_bytes(raw))
        }

        fn write(&self, addr: HostAddr, width: AccessWidth, value: u64) -> Result<(), AccessFault> {
            let mut bytes = self.0.borrow_mut();
            let slice = bytes
                .get_mut(addr.0..addr.0 + width.bytes())
                .ok_or(AccessFault { addr })?;
            slice.copy_from_slice(&value.to_le_bytes()[..width.bytes()]);
            Ok(())
        }
    }

    fn spec(source: usize, destination: usize, size: usize, width: i32) -> TransferSpec {
        TransferSpec {
            source: HostAddr(source),
            destination: HostAddr(destination),
            size,
            width: TransferWidth::from_signed(width).expect("legal width"),
        }
    }

    #[test]
    fn fill_steps_pattern_per_element() {
        let arena = Arena::new(16);
        fill(
            &arena,
            &FillSpec {
                destination: HostAddr(0),
                size: 8,
                width: AccessWidth::U16,
                pattern: 0x00FE,
                increment: 1,
            },
        )
        .expect("fill");
        assert_eq!(arena.bytes(0, 8), [0xFE, 0, 0xFF, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn fill_truncates_pattern_to_element_width() {
        let arena = Arena::new(4);
        fill(
            &arena,
            &FillSpec {
                destination: HostAddr(0),
                size: 4,
                width: AccessWidth::U8,
                pattern: 0x1_02FF,
                increment: -1,
            },
        )
        .expect("fill");
        assert_eq!(arena.bytes(0, 4), [0xFF, 0xFE, 0xFD, 0xFC]);
    }

    #[test]
    fn swapping_copy_reverses_each_element() {
        let arena = Arena::new(16);
        for (index, byte) in (1..=8u8).enumerate() {
            arena.write(HostAddr(index), AccessWidth::U8, u64::from(byte)).expect("seed");
        }
        copy(&arena, &spec(0, 8, 8, -4), false).expect("copy");
        assert_eq!(arena.bytes(8, 8), [4, 3, 2, 1, 8, 7, 6, 5]);
        assert_eq!(compare(&arena, &spec(0, 8, 8, -4)), Ok(CompareOutcome::Equal));
        assert_eq!(
            compare(&arena, &spec(0, 8, 8, 4)),
            Ok(CompareOutcome::Mismatch { offset: 0 })
        );
    }

    #[test]
    fn bulk_copy_moves_partial_trailing_bytes() {
        let arena = Arena::new(10);
        arena.write(HostAddr(0), AccessWidth::U32, 0x0403_0201).expect("seed");
        arena.write(HostAddr(4), AccessWidth::U8, 5).expect("seed");
        copy(&arena, &spec(0, 5, 5, 0), true).expect("copy");
        assert_eq!(arena.bytes(5, 5), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn compare_reports_element_aligned_offset() {
        let arena = Arena::new(32);
        arena.write(HostAddr(16 + 11), AccessWidth::U8, 0x55).expect("poke");
        assert_eq!(
            compare(&arena, &spec(0, 16, 16, 8)),
            Ok(CompareOutcome::Mismatch { offset: 8 })
        );
        assert_eq!(
            compare(&arena, &spec(0, 16, 16, 1)),
            Ok(CompareOutcome::Mismatch { offset: 11 })
        );
    }

    #[test]
    fn invalid_address_is_reported_not_fatal() {
        let arena = Arena::new(8);
        assert_eq!(
            copy(&arena, &spec(0, 6, 4, 2), false),
            Err(DevError::InvalidAddress { addr: HostAddr(8) })
        );
    }
}
