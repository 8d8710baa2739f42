//! Element widths of raw memory transfers.

use crate::{AccessWidth, DevError};

/// Allowed widths of [`super::fill`], in the order they are reported.
pub const FILL_WIDTHS: &str = "1, 2, or 4";
/// Allowed widths of [`super::copy`] and [`super::compare`].
pub const COPY_WIDTHS: &str = "1, 2, 4, 8, -2, -4, -8";

/// Access pattern of a copy or compare.
///
/// Widths are given the way operators type them: `1`, `2`, `4`, `8` move
/// elements of that size, a negative width additionally reverses the byte
/// order of every element, and `0` is a plain bulk byte copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferWidth {
    /// Bulk transfer without element semantics.
    Bulk,
    /// Element-wise transfer.
    Elements {
        /// Element size.
        width: AccessWidth,
        /// Reverse the byte order of each element.
        swap: bool,
    },
}

impl TransferWidth {
    /// Parses a signed width for copy and compare.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::IllegalWidth`] for anything but
    /// `0, 1, -1, 2, 4, 8, -2, -4, -8`.
    pub const fn from_signed(width: i32) -> Result<Self, DevError> {
        let (bytes, swap) = match width {
            0 => return Ok(Self::Bulk),
            1 | -1 => (1, false),
            2 | 4 | 8 => (width.unsigned_abs() as usize, false),
            -2 | -4 | -8 => (width.unsigned_abs() as usize, true),
            _ => {
                return Err(DevError::IllegalWidth {
                    width,
                    allowed: COPY_WIDTHS,
                })
            }
        };
        match AccessWidth::from_bytes(bytes) {
            Some(width) => Ok(Self::Elements { width, swap }),
            None => Err(DevError::IllegalWidth {
                width,
                allowed: COPY_WIDTHS,
            }),
        }
    }
}

/// Parses the width of a fill: `1`, `2`, `4`, with `0` meaning bytes.
///
/// # Errors
///
/// Returns [`DevError::IllegalWidth`] for any other width.
pub const fn fill_width(width: i32) -> Result<AccessWidth, DevError> {
    match width {
        0 | 1 => Ok(AccessWidth::U8),
        2 => Ok(AccessWidth::U16),
        4 => Ok(AccessWidth::U32),
        _ => Err(DevError::IllegalWidth {
            width,
            allowed: FILL_WIDTHS,
        }),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{fill_width, TransferWidth};
    use crate::{AccessWidth, StatusKind};

    #[rstest]
    #[case(0, TransferWidth::Bulk)]
    #[case(1, TransferWidth::Elements { width: AccessWidth::U8, swap: false })]
    #[case(-1, TransferWidth::Elements { width: AccessWidth::U8, swap: false })]
    #[case(2, TransferWidth::Elements { width: AccessWidth::U16, swap: false })]
    #[case(-4, TransferWidth::Elements { width: AccessWidth::U32, swap: true })]
    #[case(8, TransferWidth::Elements { width: AccessWidth::U64, swap: false })]
    #[case(-8, TransferWidth::Elements { width: AccessWidth::U64, swap: true })]
    fn signed_widths_parse(#[case] width: i32, #[case] expected: TransferWidth) {
        assert_eq!(TransferWidth::from_signed(width), Ok(expected));
    }

    #[rstest]
    #[case(3)]
    #[case(16)]
    #[case(-3)]
    #[case(i32::MIN)]
    fn illegal_signed_widths_name_allowed_set(#[case] width: i32) {
        let err = TransferWidth::from_signed(width).expect_err("illegal");
        assert_eq!(err.kind(), StatusKind::IllegalWidth);
        assert!(err.to_string().ends_with("must be 1, 2, 4, 8, -2, -4, -8"));
    }

    #[test]
    fn fill_rejects_eight_and_negative_widths() {
        assert_eq!(fill_width(0), Ok(AccessWidth::U8));
        assert_eq!(fill_width(4), Ok(AccessWidth::U32));
        for width in [8, -2, 3] {
            let err = fill_width(width).expect_err("illegal fill width");
            assert!(err.to_string().ends_with("must be 1, 2, or 4"));
        }
    }
}
