//! Bus-error probe engine.
//!
//! A probe performs one access and decides from the latched bus-error
//! register whether the access hit a device. The register is shared by all
//! bus traffic and carries no tag tying an error to the access that caused
//! it, so an error only counts as ours when its originator, direction,
//! addressing mode and address all agree with the probed access. Errors that
//! disagree belong to someone else; the access is repeated until it either
//! completes cleanly or produces a matching error.

use std::sync::{Mutex, PoisonError};

use log::debug;

use crate::{
    AccessWidth, AddressLookup, AddressSpace, AddressingMode, BusAddress, BusErrorRegister,
    DevError, ErrorSource, HostAddr, HostMemory, VmeBusError, DEFAULT_PROBE_RETRY_LIMIT,
};

/// Serializes probes process-wide; the error register is a single resource.
static PROBE_LOCK: Mutex<()> = Mutex::new(());

/// Direction of a probe access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// Read the target and return its value.
    Read,
    /// Write a value to the target.
    Write,
}

impl ProbeKind {
    /// Returns `true` for writes.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

/// How a latched error of one addressing mode is compared with an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorMatchRule {
    /// Addressing mode recorded in the error.
    pub mode: AddressingMode,
    /// Address space the access must belong to.
    pub space: AddressSpace,
    /// Address bits that must agree between error and access.
    pub address_mask: u64,
}

/// Match rules for the single-cycle modes a probe can produce.
///
/// The register drops the two lowest address bits, and A16 and the 24-bit
/// spaces only latch as many address bits as the space has.
pub const ERROR_MATCH_RULES: [ErrorMatchRule; 4] = [
    ErrorMatchRule {
        mode: AddressingMode::CrCsr,
        space: AddressSpace::CrCsr,
        address_mask: 0x00FF_FFFC,
    },
    ErrorMatchRule {
        mode: AddressingMode::A16,
        space: AddressSpace::A16,
        address_mask: 0x0000_FFFC,
    },
    ErrorMatchRule {
        mode: AddressingMode::A24,
        space: AddressSpace::A24,
        address_mask: 0x00FF_FFFC,
    },
    ErrorMatchRule {
        mode: AddressingMode::A32,
        space: AddressSpace::A32,
        address_mask: 0xFFFF_FFFC,
    },
];

/// Returns the match rule for errors latched in `mode`.
#[must_use]
pub fn match_rule(mode: AddressingMode) -> Option<&'static ErrorMatchRule> {
    ERROR_MATCH_RULES.iter().find(|rule| rule.mode == mode)
}

/// Returns `true` when `error` plausibly came from accessing `target`.
#[must_use]
pub fn error_matches_access(error: &VmeBusError, target: &BusAddress, kind: ProbeKind) -> bool {
    error.is_error()
        && error.source() == ErrorSource::Pcie
        && error.is_write() == kind.is_write()
        && match_rule(error.mode()).is_some_and(|rule| {
            rule.space == target.space && (error.address ^ target.address) & rule.address_mask == 0
        })
}

/// Probe access widths: 1, 2, or 4 bytes.
fn probe_width(word_size: u32) -> Result<AccessWidth, DevError> {
    match word_size {
        1 => Ok(AccessWidth::U8),
        2 => Ok(AccessWidth::U16),
        4 => Ok(AccessWidth::U32),
        _ => Err(DevError::BadArgument {
            reason: "probe word size must be 1, 2, or 4",
        }),
    }
}

/// Performs single diagnostic accesses and attributes bus errors to them.
#[derive(Debug)]
pub struct ProbeEngine<B> {
    bus: B,
    retry_limit: u32,
}

impl<B> ProbeEngine<B>
where
    B: AddressLookup + BusErrorRegister + HostMemory,
{
    /// Creates an engine with the default retry limit.
    pub const fn new(bus: B) -> Self {
        Self::with_retry_limit(bus, DEFAULT_PROBE_RETRY_LIMIT)
    }

    /// Creates an engine giving up after `retry_limit` unattributed errors.
    ///
    /// The access is always made at least once, so a limit of 0 counts as 1.
    pub const fn with_retry_limit(bus: B, retry_limit: u32) -> Self {
        let retry_limit = if retry_limit == 0 { 1 } else { retry_limit };
        Self { bus, retry_limit }
    }

    /// Returns the bus the engine probes.
    pub const fn bus(&self) -> &B {
        &self.bus
    }

    /// Probes `addr` with one access of `word_size` bytes.
    ///
    /// Reads return the value read; writes store the low bits of `value`
    /// and return it. When the retry limit runs out without an error that
    /// matches this access, the access is reported as successful: so far,
    /// unmatched errors have always belonged to other addresses.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::AddressNotFound`] when `addr` is in no window,
    /// [`DevError::BadArgument`] for word sizes other than 1, 2, or 4,
    /// [`DevError::NoDevice`] when the access timed out on the bus, and
    /// [`DevError::InvalidAddress`] when the host access itself faults.
    pub fn probe(
        &self,
        kind: ProbeKind,
        word_size: u32,
        addr: HostAddr,
        value: u64,
    ) -> Result<u64, DevError> {
        let target = self
            .bus
            .resolve(addr)
            .ok_or(DevError::AddressNotFound { addr })?;
        let width = probe_width(word_size)?;

        let _guard = PROBE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        // Stale errors from earlier traffic must not be attributed to us.
        self.bus.read_and_clear();

        let mut result = 0;
        for attempt in 1..=self.retry_limit {
            result = match kind {
                ProbeKind::Read => self.bus.read(addr, width)?,
                ProbeKind::Write => {
                    let value = value & width.value_mask();
                    self.bus.write(addr, width, value)?;
                    value
                }
            };

            let error = self.bus.read_and_clear();
            if !error.is_error() {
                return Ok(result);
            }

            debug!("our access was {kind:?} {target}, latched error: {error}");
            if error_matches_access(&error, &target, kind) {
                return Err(DevError::NoDevice {
                    space: target.space,
                    address: target.address,
                });
            }
            debug!("try again attempt={attempt}");
        }

        debug!(
            "giving up on {target} after {} unattributed errors",
            self.retry_limit
        );
        Ok(result)
    }

    /// Reads `word_size` bytes from `addr` if a device answers.
    ///
    /// # Errors
    ///
    /// See [`ProbeEngine::probe`].
    pub fn read_probe(&self, word_size: u32, addr: HostAddr) -> Result<u64, DevError> {
        debug!("read probe word_size={word_size} addr={addr}");
        self.probe(ProbeKind::Read, word_size, addr, 0)
    }

    /// Writes `value` with `word_size` bytes to `addr` if a device answers.
    ///
    /// # Errors
    ///
    /// See [`ProbeEngine::probe`].
    pub fn write_probe(&self, word_size: u32, addr: HostAddr, value: u64) -> Result<(), DevError> {
        debug!("write probe word_size={word_size} addr={addr} value={value:#x}");
        self.probe(ProbeKind::Write, word_size, addr, value)
            .map(|_| ())
    }
}
