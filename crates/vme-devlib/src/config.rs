//! Runtime configuration for a device-support instance.

use crate::{Privilege, CRCSR_DEFAULT_LIMIT};

/// Default cap on probe iterations before an unresolved error is ignored.
pub const DEFAULT_PROBE_RETRY_LIMIT: u32 = 1000;

/// Default stack size of interrupt dispatch threads.
pub const DEFAULT_IRQ_THREAD_STACK_SIZE: usize = 256 * 1024;

/// Top-level configuration for [`crate::DevLib`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DevLibConfig {
    /// Privilege of A16/A24/A32 windows. Callers have no way to ask for a
    /// specific one, so all windows share it.
    pub privilege: Privilege,
    /// Extent of CR/CSR space on this bridge.
    pub crcsr_limit: u64,
    /// Iteration cap of the bus-error probe loop; 0 counts as 1.
    pub probe_retry_limit: u32,
    /// Stack size of interrupt dispatch threads.
    pub irq_thread_stack_size: usize,
    /// Log throughput of raw memory copies.
    pub transfer_diagnostics: bool,
}

impl Default for DevLibConfig {
    fn default() -> Self {
        Self {
            privilege: Privilege::Supervisory,
            crcsr_limit: CRCSR_DEFAULT_LIMIT,
            probe_retry_limit: DEFAULT_PROBE_RETRY_LIMIT,
            irq_thread_stack_size: DEFAULT_IRQ_THREAD_STACK_SIZE,
            transfer_diagnostics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DevLibConfig, DEFAULT_PROBE_RETRY_LIMIT};
    use crate::{Privilege, CRCSR_DEFAULT_LIMIT};

    #[test]
    fn default_config_uses_supervisory_windows_and_full_retry_budget() {
        let config = DevLibConfig::default();

        assert_eq!(config.privilege, Privilege::Supervisory);
        assert_eq!(config.crcsr_limit, CRCSR_DEFAULT_LIMIT);
        assert_eq!(config.probe_retry_limit, DEFAULT_PROBE_RETRY_LIMIT);
        assert!(!config.transfer_diagnostics);
    }
}
