//! Device-support operation table of one bridge.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::transfer::{self, CompareOutcome, FillSpec, TransferEndpoint, TransferSpec};
use crate::{
    fill_width, AddressMapper, AddressSpace, AddressSpaceRequest, DevError, DevLibConfig,
    HostAddr, InterruptDispatcher, InterruptHandler, MappedWindow, ProbeEngine, TransferWidth,
    VmeBridge,
};

/// Mapper, probe engine and interrupt dispatcher of one bridge, configured
/// together.
pub struct DevLib<B> {
    bridge: Arc<B>,
    config: DevLibConfig,
    mapper: AddressMapper<Arc<B>>,
    probe: ProbeEngine<Arc<B>>,
    dispatcher: InterruptDispatcher<B>,
}

impl<B> fmt::Debug for DevLib<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevLib")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl<B: VmeBridge> DevLib<B> {
    /// Builds the operation table on top of `bridge`.
    pub fn new(bridge: Arc<B>, config: DevLibConfig) -> Self {
        Self {
            mapper: AddressMapper::new(Arc::clone(&bridge), config.privilege, config.crcsr_limit),
            probe: ProbeEngine::with_retry_limit(Arc::clone(&bridge), config.probe_retry_limit),
            dispatcher: InterruptDispatcher::new(Arc::clone(&bridge), config.irq_thread_stack_size),
            bridge,
            config,
        }
    }

    /// Returns the configuration the instance was built with.
    pub const fn config(&self) -> &DevLibConfig {
        &self.config
    }

    /// Returns the bridge backend.
    pub const fn bridge(&self) -> &Arc<B> {
        &self.bridge
    }

    /// Returns the interrupt dispatcher.
    pub const fn dispatcher(&self) -> &InterruptDispatcher<B> {
        &self.dispatcher
    }

    /// Initializes device support. Nothing has to be set up ahead of time.
    ///
    /// # Errors
    ///
    /// Never fails.
    #[allow(clippy::unnecessary_wraps)]
    pub fn init(&self) -> Result<(), DevError> {
        info!(
            "VME device support ready: {:?} windows, CR/CSR limit {:#x}",
            self.config.privilege, self.config.crcsr_limit
        );
        Ok(())
    }

    /// Maps `size` bytes at `space:base` and returns the host address of
    /// `base`.
    ///
    /// # Errors
    ///
    /// See [`AddressMapper::map`].
    pub fn map_address(
        &self,
        space: AddressSpace,
        base: u64,
        size: u64,
    ) -> Result<HostAddr, DevError> {
        self.map(&AddressSpaceRequest::new(space, base, size))
            .map(|window| window.host)
    }

    /// Maps `request` and returns the full window description.
    ///
    /// # Errors
    ///
    /// See [`AddressMapper::map`].
    pub fn map(&self, request: &AddressSpaceRequest) -> Result<MappedWindow, DevError> {
        self.mapper.map(request)
    }

    /// Reads `word_size` bytes from `addr` if a device answers.
    ///
    /// # Errors
    ///
    /// See [`ProbeEngine::probe`].
    pub fn read_probe(&self, word_size: u32, addr: HostAddr) -> Result<u64, DevError> {
        self.probe.read_probe(word_size, addr)
    }

    /// Writes `value` to `addr` if a device answers.
    ///
    /// # Errors
    ///
    /// See [`ProbeEngine::probe`].
    pub fn write_probe(&self, word_size: u32, addr: HostAddr, value: u64) -> Result<(), DevError> {
        self.probe.write_probe(word_size, addr, value)
    }

    /// Chains `handler` onto `vector`.
    ///
    /// # Errors
    ///
    /// See [`InterruptDispatcher::connect`].
    pub fn connect_interrupt(
        &self,
        vector: u32,
        handler: InterruptHandler,
        parameter: usize,
    ) -> Result<(), DevError> {
        self.dispatcher.connect(vector, handler, parameter)
    }

    /// Removes `handler` from `vector`.
    ///
    /// # Errors
    ///
    /// See [`InterruptDispatcher::disconnect`].
    pub fn disconnect_interrupt(
        &self,
        vector: u32,
        handler: &InterruptHandler,
    ) -> Result<(), DevError> {
        self.dispatcher.disconnect(vector, handler)
    }

    /// Enables interrupt `level`. Levels are always enabled on this bridge.
    ///
    /// # Errors
    ///
    /// Never fails.
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    pub fn enable_interrupt_level(&self, level: u32) -> Result<(), DevError> {
        debug!("enable interrupt level {level}");
        Ok(())
    }

    /// Disables interrupt `level`, which this bridge cannot do.
    ///
    /// # Errors
    ///
    /// Always returns [`DevError::InterruptDisableFailed`].
    #[allow(clippy::unused_self)]
    pub fn disable_interrupt_level(&self, level: u32) -> Result<(), DevError> {
        warn!("interrupt level {level} cannot be disabled");
        Err(DevError::InterruptDisableFailed { level })
    }

    /// Reports whether `vector` is unavailable. Handlers chain, so never.
    #[must_use]
    pub const fn interrupt_in_use(&self, vector: u32) -> bool {
        self.dispatcher.in_use(vector)
    }

    /// Allocates A24-addressable DMA memory. The bridge only offers A32
    /// slave windows, so there never is any.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn a24_malloc(&self, size: usize) -> Option<HostAddr> {
        debug!("A24 allocation of {size:#x} bytes unsupported");
        None
    }

    /// Releases memory from [`DevLib::a24_malloc`].
    #[allow(clippy::unused_self)]
    pub fn a24_free(&self, addr: HostAddr) {
        debug!("A24 free of {addr} ignored");
    }

    /// Turns an endpoint into a host address, mapping `size` bytes of bus
    /// endpoints.
    ///
    /// # Errors
    ///
    /// See [`AddressMapper::map`].
    pub fn resolve_endpoint(
        &self,
        endpoint: &TransferEndpoint,
        size: usize,
    ) -> Result<HostAddr, DevError> {
        match *endpoint {
            TransferEndpoint::Host(addr) => Ok(addr),
            TransferEndpoint::Bus { space, address } => {
                let size = u64::try_from(size).map_err(|_| DevError::BadArgument {
                    reason: "address size overflow",
                })?;
                self.map_address(space, address, size)
            }
        }
    }

    /// Fills `size` bytes at `destination` with an incrementing pattern.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::IllegalWidth`] unless `width` is `0`, `1`, `2` or
    /// `4`, mapping errors for bus endpoints, and
    /// [`DevError::InvalidAddress`] when memory cannot be written.
    pub fn fill(
        &self,
        destination: &TransferEndpoint,
        size: usize,
        width: i32,
        pattern: u32,
        increment: i32,
    ) -> Result<(), DevError> {
        let width = fill_width(width)?;
        let spec = FillSpec {
            destination: self.resolve_endpoint(destination, size)?,
            size,
            width,
            pattern,
            increment,
        };
        transfer::fill(self.bridge.as_ref(), &spec)
    }

    /// Copies `size` bytes from `source` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::IllegalWidth`] for unsupported widths, mapping
    /// errors for bus endpoints, and [`DevError::InvalidAddress`] when memory
    /// cannot be accessed.
    pub fn copy(
        &self,
        source: &TransferEndpoint,
        destination: &TransferEndpoint,
        size: usize,
        width: i32,
    ) -> Result<(), DevError> {
        let spec = self.transfer_spec(source, destination, size, width)?;
        transfer::copy(self.bridge.as_ref(), &spec, self.config.transfer_diagnostics)
    }

    /// Compares `size` bytes at `destination` against `source`.
    ///
    /// # Errors
    ///
    /// Same as [`DevLib::copy`].
    pub fn compare(
        &self,
        source: &TransferEndpoint,
        destination: &TransferEndpoint,
        size: usize,
        width: i32,
    ) -> Result<CompareOutcome, DevError> {
        let spec = self.transfer_spec(source, destination, size, width)?;
        transfer::compare(self.bridge.as_ref(), &spec)
    }

    fn transfer_spec(
        &self,
        source: &TransferEndpoint,
        destination: &TransferEndpoint,
        size: usize,
        width: i32,
    ) -> Result<TransferSpec, DevError> {
        let width = TransferWidth::from_signed(width)?;
        Ok(TransferSpec {
            source: self.resolve_endpoint(source, size)?,
            destination: self.resolve_endpoint(destination, size)?,
            size,
            width,
        })
    }
}
