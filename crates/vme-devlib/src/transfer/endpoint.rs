//! Operator-facing `[space:]address` endpoints and size strings.

use std::str::FromStr;

use crate::{AddressSpace, DevError, HostAddr};

/// One side of a transfer as an operator writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferEndpoint {
    /// Bus address that still has to be mapped.
    Bus {
        /// Address space.
        space: AddressSpace,
        /// Bus address.
        address: u64,
    },
    /// Host address used as is.
    Host(HostAddr),
}

impl FromStr for TransferEndpoint {
    type Err = DevError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if let Some((prefix, address)) = text.split_once(':') {
            let space = AddressSpace::from_name(prefix.trim()).ok_or(DevError::BadArgument {
                reason: "unknown address space",
            })?;
            return Ok(Self::Bus {
                space,
                address: parse_number(address)?,
            });
        }
        let address = usize::try_from(parse_number(text)?).map_err(|_| DevError::BadArgument {
            reason: "host address too large",
        })?;
        Ok(Self::Host(HostAddr(address)))
    }
}

/// Parses an unsigned number in C notation: `0x` hex, leading-`0` octal,
/// or decimal.
///
/// # Errors
///
/// Returns [`DevError::BadArgument`] when `text` is not a number.
pub fn parse_number(text: &str) -> Result<u64, DevError> {
    let text = text.trim();
    let parsed = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8)
    } else {
        text.parse()
    };
    parsed.map_err(|_| DevError::BadArgument {
        reason: "malformed number",
    })
}

/// Parses a size with an optional binary unit suffix (`k`, `M`, `G`).
///
/// # Errors
///
/// Returns [`DevError::BadArgument`] when `text` is malformed or the size
/// does not fit in `usize`.
pub fn parse_size(text: &str) -> Result<usize, DevError> {
    let text = text.trim();
    let (digits, shift) = match text.char_indices().last() {
        Some((at, 'k' | 'K')) => (&text[..at], 10),
        Some((at, 'm' | 'M')) => (&text[..at], 20),
        Some((at, 'g' | 'G')) => (&text[..at], 30),
        _ => (text, 0),
    };
    let too_large = || DevError::BadArgument {
        reason: "size too large",
    };
    let scaled = parse_number(digits)?
        .checked_mul(1 << shift)
        .ok_or_else(too_large)?;
    usize::try_from(scaled).map_err(|_| too_large())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{parse_number, parse_size, TransferEndpoint};
    use crate::{AddressSpace, HostAddr, StatusKind};

    #[rstest]
    #[case("a24:0x100000", TransferEndpoint::Bus { space: AddressSpace::A24, address: 0x10_0000 })]
    #[case("A32:4096", TransferEndpoint::Bus { space: AddressSpace::A32, address: 4096 })]
    #[case("CRCSR:0x7f000", TransferEndpoint::Bus { space: AddressSpace::CrCsr, address: 0x7_F000 })]
    #[case("0x7fff0000", TransferEndpoint::Host(HostAddr(0x7FFF_0000)))]
    #[case(" 010 ", TransferEndpoint::Host(HostAddr(8)))]
    fn endpoints_parse(#[case] text: &str, #[case] expected: TransferEndpoint) {
        assert_eq!(text.parse::<TransferEndpoint>(), Ok(expected));
    }

    #[rstest]
    #[case("A64:0x0")]
    #[case("A16:zz")]
    #[case("")]
    fn malformed_endpoints_are_bad_arguments(#[case] text: &str) {
        let err = text.parse::<TransferEndpoint>().expect_err("malformed");
        assert_eq!(err.kind(), StatusKind::BadArgument);
    }

    #[rstest]
    #[case("0", 0)]
    #[case("0x1F", 31)]
    #[case("017", 15)]
    #[case("4k", 4096)]
    #[case("2M", 2 << 20)]
    #[case("0x10K", 16 << 10)]
    #[case("1G", 1 << 30)]
    fn sizes_parse_with_units(#[case] text: &str, #[case] expected: usize) {
        assert_eq!(parse_size(text), Ok(expected));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert!(parse_number("0x").is_err());
        assert!(parse_number("09").is_err());
        assert!(parse_size("k").is_err());
    }
}
