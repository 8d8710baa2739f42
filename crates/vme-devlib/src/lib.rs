//! Device-support core for VME bus bridges.

/// Address spaces, their extents, and window privilege.
pub mod space;
pub use space::{
    a24_chunk_base, fits_in_a24_chunk, AddressSpace, Privilege, A16_LIMIT, A24_CHUNK_BYTES,
    A24_CHUNK_MASK, A24_LIMIT, A32_LIMIT, CRCSR_DEFAULT_LIMIT,
};

/// Status taxonomy returned by every operation.
pub mod error;
pub use error::{DevError, StatusKind};

/// Bridge backend contracts and shared address types.
pub mod bus;
pub use bus::{
    AccessFault, AccessWidth, AddressLookup, BusAddress, BusErrorRegister, HostAddr, HostMemory,
    InterruptController, InterruptHandler, IsrFn, VmeBridge, WindowAllocator, WindowRequest,
};

/// Latched bus-error record decoding.
pub mod berr;
pub use berr::{AddressingMode, ErrorSource, VmeBusError, VmeErrorStatus};

/// Runtime configuration.
pub mod config;
pub use config::{DevLibConfig, DEFAULT_IRQ_THREAD_STACK_SIZE, DEFAULT_PROBE_RETRY_LIMIT};

/// Address-space mapper.
pub mod mapper;
pub use mapper::{plan_window, validate_request, AddressMapper, AddressSpaceRequest, MappedWindow};

/// Bus-error probe engine.
pub mod probe;
pub use probe::{
    error_matches_access, match_rule, ErrorMatchRule, ProbeEngine, ProbeKind, ERROR_MATCH_RULES,
};

/// Interrupt vector dispatcher.
pub mod irq;
pub use irq::{
    dispatch_thread_name, InterruptDispatcher, InterruptSource, USER_VECTOR_COUNT, VECTOR_COUNT,
    VME_VECTOR_COUNT,
};

/// Raw memory fill, copy and compare.
pub mod transfer;
pub use transfer::{
    fill_width, format_throughput, parse_number, parse_size, CompareOutcome, FillSpec,
    Stopwatch, TransferEndpoint, TransferSpec, TransferWidth, COPY_WIDTHS, FILL_WIDTHS,
};

/// Software bridge backend.
pub mod sim;
pub use sim::{SimulatedBridge, SIM_HOST_BASE, SIM_HOST_GRANULE};

/// Device-support operation table.
pub mod devlib;
pub use devlib::DevLib;

#[cfg(test)]
use proptest as _;
