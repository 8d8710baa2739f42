//! Software model of a VME bridge.
//!
//! [`SimulatedBridge`] implements every collaborator trait so the device
//! support layer runs without hardware: windows are handed out at synthetic
//! host addresses, devices are byte arrays placed in bus address spaces, and
//! host buffers stand in for local RAM. Accessing bus space where no device
//! sits behaves like a real bus timeout: reads float high and the error
//! register latches the failed access.
//!
//! Multi-byte values are stored little-endian.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{
    AccessFault, AccessWidth, AddressLookup, AddressSpace, AddressingMode, BusAddress,
    BusErrorRegister, ErrorSource, HostAddr, HostMemory, InterruptController, InterruptHandler,
    InterruptSource, VmeBusError, WindowAllocator, WindowRequest,
};

/// First synthetic host address handed out.
pub const SIM_HOST_BASE: usize = 0x1000_0000;
/// Host addresses are handed out in units of this many bytes.
pub const SIM_HOST_GRANULE: usize = 0x1000;

#[derive(Debug)]
struct SimWindow {
    request: WindowRequest,
    host: HostAddr,
    users: usize,
}

impl SimWindow {
    fn covers(&self, request: &WindowRequest) -> bool {
        self.request.space == request.space
            && self.request.privilege == request.privilege
            && self.request.base <= request.base
            && request.base.saturating_add(request.size)
                <= self.request.base.saturating_add(self.request.size)
    }

    fn bus_address(&self, addr: HostAddr, len: usize) -> Option<BusAddress> {
        let offset = addr.0.checked_sub(self.host.0)?;
        let end = offset.checked_add(len)?;
        if u64::try_from(end).ok()? > self.request.size {
            return None;
        }
        Some(BusAddress {
            space: self.request.space,
            address: self.request.base + u64::try_from(offset).ok()?,
        })
    }
}

#[derive(Debug)]
struct SimDevice {
    space: AddressSpace,
    base: u64,
    bytes: Vec<u8>,
}

impl SimDevice {
    fn range(&mut self, target: BusAddress, len: usize) -> Option<&mut [u8]> {
        if target.space != self.space {
            return None;
        }
        let start = usize::try_from(target.address.checked_sub(self.base)?).ok()?;
        self.bytes.get_mut(start..start.checked_add(len)?)
    }
}

#[derive(Debug)]
struct HostBuffer {
    host: HostAddr,
    bytes: Vec<u8>,
}

impl HostBuffer {
    fn range(&mut self, addr: HostAddr, len: usize) -> Option<&mut [u8]> {
        let start = addr.0.checked_sub(self.host.0)?;
        self.bytes.get_mut(start..start.checked_add(len)?)
    }
}

#[derive(Debug, Default)]
struct SimMemory {
    windows: Vec<SimWindow>,
    devices: Vec<SimDevice>,
    buffers: Vec<HostBuffer>,
    next_host: usize,
    window_requests: Vec<WindowRequest>,
    refuse_windows: bool,
    accesses: usize,
}

impl SimMemory {
    fn reserve_host(&mut self, len: u64) -> Option<HostAddr> {
        let len = usize::try_from(len).ok()?.max(1);
        let host = self.next_host.max(SIM_HOST_BASE);
        let granules = len.div_ceil(SIM_HOST_GRANULE) + 1;
        self.next_host = host.checked_add(granules.checked_mul(SIM_HOST_GRANULE)?)?;
        Some(HostAddr(host))
    }

    fn resolve(&self, addr: HostAddr, len: usize) -> Option<BusAddress> {
        self.windows
            .iter()
            .find_map(|window| window.bus_address(addr, len))
    }
}

#[derive(Debug, Default)]
struct SimErrors {
    latched: VmeBusError,
    foreign: VecDeque<VmeBusError>,
}

impl SimErrors {
    /// The register keeps its first error until read.
    fn latch(&mut self, error: VmeBusError) {
        if !self.latched.is_error() {
            self.latched = error;
        }
    }
}

type DispatchKey = (InterruptSource, u32);

#[derive(Debug, Default)]
struct SimInterrupts {
    handlers: Vec<(InterruptSource, u32, InterruptHandler, usize)>,
    loops: HashMap<DispatchKey, Sender<()>>,
    pending: HashMap<DispatchKey, usize>,
    refuse_handlers: bool,
    shut_down: bool,
}

impl SimInterrupts {
    fn handlers_for(&self, key: DispatchKey) -> Vec<(InterruptHandler, usize)> {
        self.handlers
            .iter()
            .filter(|(source, vector, _, _)| {
                *source == key.0
                    && (matches!(source, InterruptSource::User(_)) || *vector == key.1)
            })
            .map(|(_, _, handler, parameter)| (handler.clone(), *parameter))
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn load(bytes: &[u8]) -> u64 {
    let mut raw = [0; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

fn store(bytes: &mut [u8], value: u64) {
    let len = bytes.len();
    bytes.copy_from_slice(&value.to_le_bytes()[..len]);
}

/// Simulated bridge with windows, devices, host buffers, a latched error
/// register, and an interrupt controller.
#[derive(Debug, Default)]
pub struct SimulatedBridge {
    memory: Mutex<SimMemory>,
    errors: Mutex<SimErrors>,
    interrupts: Mutex<SimInterrupts>,
}

impl SimulatedBridge {
    /// Creates an empty bridge: no devices, no windows, no buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a zero-filled device of `size` bytes at `space:base`.
    pub fn add_device(&self, space: AddressSpace, base: u64, size: usize) {
        lock(&self.memory).devices.push(SimDevice {
            space,
            base,
            bytes: vec![0; size],
        });
    }

    /// Returns `len` bytes of device memory at `space:address`, if a device
    /// covers them.
    #[must_use]
    pub fn device_bytes(&self, space: AddressSpace, address: u64, len: usize) -> Option<Vec<u8>> {
        let target = BusAddress { space, address };
        lock(&self.memory)
            .devices
            .iter_mut()
            .find_map(|device| device.range(target, len).map(|bytes| bytes.to_vec()))
    }

    /// Allocates a zero-filled host buffer of `len` bytes.
    ///
    /// Returns `None` when the synthetic host address range is exhausted.
    #[must_use]
    pub fn alloc_buffer(&self, len: usize) -> Option<HostAddr> {
        let mut memory = lock(&self.memory);
        let host = memory.reserve_host(u64::try_from(len).ok()?)?;
        memory.buffers.push(HostBuffer {
            host,
            bytes: vec![0; len],
        });
        Some(host)
    }

    /// Returns `len` bytes of host memory at `addr`, if one buffer holds them.
    #[must_use]
    pub fn buffer_bytes(&self, addr: HostAddr, len: usize) -> Option<Vec<u8>> {
        lock(&self.memory)
            .buffers
            .iter_mut()
            .find_map(|buffer| buffer.range(addr, len).map(|bytes| bytes.to_vec()))
    }

    /// Makes the window allocator fail (or work again).
    pub fn refuse_windows(&self, refuse: bool) {
        lock(&self.memory).refuse_windows = refuse;
    }

    /// Every request the window allocator received, in order.
    #[must_use]
    pub fn window_requests(&self) -> Vec<WindowRequest> {
        lock(&self.memory).window_requests.clone()
    }

    /// Number of distinct windows opened.
    #[must_use]
    pub fn window_count(&self) -> usize {
        lock(&self.memory).windows.len()
    }

    /// Number of acquisitions sharing the window that starts at `host`.
    #[must_use]
    pub fn window_users(&self, host: HostAddr) -> usize {
        lock(&self.memory)
            .windows
            .iter()
            .find(|window| window.host == host)
            .map_or(0, |window| window.users)
    }

    /// Number of memory accesses made through [`HostMemory`].
    #[must_use]
    pub fn access_count(&self) -> usize {
        lock(&self.memory).accesses
    }

    /// Queues an error caused by other bus traffic; it is latched during the
    /// next memory access, before that access itself completes.
    pub fn inject_foreign_error(&self, error: VmeBusError) {
        lock(&self.errors).foreign.push_back(error);
    }

    /// Latches `error` right away, unless another error is already latched.
    pub fn latch_error(&self, error: VmeBusError) {
        lock(&self.errors).latch(error);
    }

    /// Makes the interrupt controller refuse new handlers (or accept again).
    pub fn refuse_handlers(&self, refuse: bool) {
        lock(&self.interrupts).refuse_handlers = refuse;
    }

    /// Number of handlers connected to `vector`.
    #[must_use]
    pub fn handler_count(&self, vector: u32) -> usize {
        lock(&self.interrupts)
            .handlers
            .iter()
            .filter(|(_, connected, _, _)| *connected == vector)
            .count()
    }

    /// Signals an interrupt on `vector`. Events raised before the vector's
    /// dispatch loop runs are delivered once it starts.
    ///
    /// Returns `false` for vectors outside the dispatcher range.
    pub fn raise(&self, vector: u32) -> bool {
        let Some(source) = InterruptSource::for_vector(vector) else {
            return false;
        };
        let key = (source, source.dispatch_vector(vector));
        let mut interrupts = lock(&self.interrupts);
        if let Some(sender) = interrupts.loops.get(&key) {
            if sender.send(()).is_ok() {
                return true;
            }
        }
        *interrupts.pending.entry(key).or_default() += 1;
        true
    }

    /// Stops every dispatch loop; loops started later return at once.
    pub fn shutdown_interrupts(&self) {
        let mut interrupts = lock(&self.interrupts);
        interrupts.shut_down = true;
        interrupts.loops.clear();
    }

    fn run_handlers(&self, key: DispatchKey) {
        let handlers = lock(&self.interrupts).handlers_for(key);
        for (handler, parameter) in handlers {
            handler.invoke(parameter);
        }
    }

    fn access<T>(
        &self,
        addr: HostAddr,
        width: AccessWidth,
        is_write: bool,
        apply: impl FnOnce(&mut [u8]) -> T,
        floating: T,
    ) -> Result<T, AccessFault> {
        let len = width.bytes();
        let mut memory = lock(&self.memory);
        memory.accesses += 1;
        let mut errors = lock(&self.errors);
        if let Some(foreign) = errors.foreign.pop_front() {
            errors.latch(foreign);
        }

        if let Some(bytes) = memory
            .buffers
            .iter_mut()
            .find_map(|buffer| buffer.range(addr, len))
        {
            return Ok(apply(bytes));
        }

        let target = memory.resolve(addr, len).ok_or(AccessFault { addr })?;
        if let Some(bytes) = memory
            .devices
            .iter_mut()
            .find_map(|device| device.range(target, len))
        {
            return Ok(apply(bytes));
        }

        errors.latch(VmeBusError::timeout(
            ErrorSource::Pcie,
            AddressingMode::single_cycle(target.space),
            target.address,
            is_write,
        ));
        Ok(floating)
    }
}

impl WindowAllocator for SimulatedBridge {
    fn acquire_window(&self, request: &WindowRequest) -> Option<HostAddr> {
        let mut memory = lock(&self.memory);
        memory.window_requests.push(*request);
        if memory.refuse_windows {
            return None;
        }

        if let Some(window) = memory
            .windows
            .iter_mut()
            .find(|window| window.covers(request))
        {
            window.users += 1;
            let offset = usize::try_from(request.base - window.request.base).ok()?;
            return window.host.checked_add(offset);
        }

        let host = memory.reserve_host(request.size)?;
        memory.windows.push(SimWindow {
            request: *request,
            host,
            users: 1,
        });
        Some(host)
    }
}

impl AddressLookup for SimulatedBridge {
    fn resolve(&self, addr: HostAddr) -> Option<BusAddress> {
        lock(&self.memory).resolve(addr, 1)
    }
}

impl BusErrorRegister for SimulatedBridge {
    fn read_and_clear(&self) -> VmeBusError {
        std::mem::take(&mut lock(&self.errors).latched)
    }
}

impl HostMemory for SimulatedBridge {
    fn read(&self, addr: HostAddr, width: AccessWidth) -> Result<u64, AccessFault> {
        self.access(addr, width, false, |bytes| load(bytes), width.value_mask())
    }

    fn write(&self, addr: HostAddr, width: AccessWidth, value: u64) -> Result<(), AccessFault> {
        self.access(addr, width, true, |bytes| store(bytes, value), ())
    }
}

impl InterruptController for SimulatedBridge {
    fn connect_handler(
        &self,
        source: InterruptSource,
        vector: u32,
        handler: InterruptHandler,
        parameter: usize,
    ) -> bool {
        let mut interrupts = lock(&self.interrupts);
        if interrupts.refuse_handlers {
            return false;
        }
        interrupts
            .handlers
            .push((source, vector, handler, parameter));
        true
    }

    fn disconnect_handler(
        &self,
        source: InterruptSource,
        vector: u32,
        handler: &InterruptHandler,
    ) -> bool {
        let mut interrupts = lock(&self.interrupts);
        let position = interrupts.handlers.iter().position(|(s, v, h, _)| {
            *s == source && *v == vector && h == handler
        });
        position
            .map(|index| interrupts.handlers.remove(index))
            .is_some()
    }

    fn dispatch_loop(&self, source: InterruptSource, vector: u32) {
        let key = (source, vector);
        let (sender, events) = mpsc::channel();
        let backlog = {
            let mut interrupts = lock(&self.interrupts);
            if interrupts.shut_down {
                return;
            }
            interrupts.loops.insert(key, sender);
            interrupts.pending.remove(&key).unwrap_or(0)
        };

        for _ in 0..backlog {
            self.run_handlers(key);
        }
        while events.recv().is_ok() {
            self.run_handlers(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::{SimulatedBridge, SIM_HOST_BASE};
    use crate::{
        AccessFault, AccessWidth, AddressLookup, AddressSpace, AddressingMode, BusAddress,
        BusErrorRegister, ErrorSource, HostAddr, HostMemory, InterruptController,
        InterruptHandler, InterruptSource, Privilege, VmeBusError, WindowAllocator,
        WindowRequest,
    };

    fn a24(base: u64, size: u64) -> WindowRequest {
        WindowRequest {
            space: AddressSpace::A24,
            privilege: Some(Privilege::Supervisory),
            base,
            size,
        }
    }

    #[test]
    fn covered_requests_share_a_window() {
        let bridge = SimulatedBridge::new();
        let whole = bridge.acquire_window(&a24(0x40_0000, 0x40_0000)).expect("window");
        let inner = bridge.acquire_window(&a24(0x41_0000, 0x100)).expect("shared");

        assert_eq!(whole, HostAddr(SIM_HOST_BASE));
        assert_eq!(inner, HostAddr(SIM_HOST_BASE + 0x1_0000));
        assert_eq!(bridge.window_count(), 1);
        assert_eq!(bridge.window_users(whole), 2);
    }

    #[test]
    fn lookup_maps_host_back_to_bus() {
        let bridge = SimulatedBridge::new();
        let host = bridge.acquire_window(&a24(0x80_0000, 0x1000)).expect("window");
        assert_eq!(
            bridge.resolve(host.wrapping_add(0x10)),
            Some(BusAddress {
                space: AddressSpace::A24,
                address: 0x80_0010,
            })
        );
        assert_eq!(bridge.resolve(host.wrapping_add(0x1000)), None);
    }

    #[test]
    fn empty_bus_space_floats_high_and_latches_timeout() {
        let bridge = SimulatedBridge::new();
        let host = bridge.acquire_window(&a24(0x80_0000, 0x1000)).expect("window");

        assert_eq!(bridge.read(host.wrapping_add(6), AccessWidth::U16), Ok(0xFFFF));
        let error = bridge.read_and_clear();
        assert_eq!(
            error,
            VmeBusError::timeout(ErrorSource::Pcie, AddressingMode::A24, 0x80_0004, false)
        );
        assert!(!bridge.read_and_clear().is_error());
    }

    #[test]
    fn latched_error_is_not_overwritten_until_read() {
        let bridge = SimulatedBridge::new();
        let host = bridge.acquire_window(&a24(0, 0x100)).expect("window");
        let foreign = VmeBusError::timeout(ErrorSource::Idma, AddressingMode::A32, 0x100, true);
        bridge.latch_error(foreign);

        bridge.write(host, AccessWidth::U8, 1).expect("write completes");
        assert_eq!(bridge.read_and_clear(), foreign);
    }

    #[test]
    fn device_memory_is_little_endian() {
        let bridge = SimulatedBridge::new();
        bridge.add_device(AddressSpace::A16, 0x100, 0x10);
        let host = bridge
            .acquire_window(&WindowRequest {
                space: AddressSpace::A16,
                privilege: Some(Privilege::Supervisory),
                base: 0,
                size: 0x1_0000,
            })
            .expect("window");

        bridge
            .write(host.wrapping_add(0x104), AccessWidth::U32, 0x1122_3344)
            .expect("device write");
        assert_eq!(
            bridge.device_bytes(AddressSpace::A16, 0x104, 4),
            Some(vec![0x44, 0x33, 0x22, 0x11])
        );
        assert!(!bridge.read_and_clear().is_error());
    }

    #[test]
    fn unmapped_host_address_faults() {
        let bridge = SimulatedBridge::new();
        assert_eq!(
            bridge.read(HostAddr(0x10), AccessWidth::U8),
            Err(AccessFault {
                addr: HostAddr(0x10)
            })
        );
    }

    #[test]
    fn buffers_do_not_straddle_their_end() {
        let bridge = SimulatedBridge::new();
        let buffer = bridge.alloc_buffer(6).expect("buffer");
        assert!(bridge.write(buffer.wrapping_add(4), AccessWidth::U16, 7).is_ok());
        assert!(bridge.write(buffer.wrapping_add(4), AccessWidth::U32, 7).is_err());
        assert_eq!(bridge.buffer_bytes(buffer.wrapping_add(4), 2), Some(vec![7, 0]));
    }

    #[test]
    fn events_raised_before_dispatch_starts_are_delivered() {
        let bridge = Arc::new(SimulatedBridge::new());
        let (sender, received) = mpsc::channel();
        let sender = Mutex::new(sender);
        let handler = InterruptHandler::new(move |parameter| {
            let _ = sender.lock().expect("sender lock").send(parameter);
        });
        assert!(bridge.connect_handler(InterruptSource::VmeAnyLevel, 0x21, handler, 7));
        assert!(bridge.raise(0x21));
        assert!(bridge.raise(0x21));

        let dispatcher = Arc::clone(&bridge);
        let loop_thread =
            thread::spawn(move || dispatcher.dispatch_loop(InterruptSource::VmeAnyLevel, 0x21));
        for _ in 0..2 {
            assert_eq!(received.recv_timeout(Duration::from_secs(5)), Ok(7));
        }

        assert!(bridge.raise(0x21));
        assert_eq!(received.recv_timeout(Duration::from_secs(5)), Ok(7));
        bridge.shutdown_interrupts();
        loop_thread.join().expect("dispatch loop ends");
    }
}
