//! Interrupt vector dispatcher.
//!
//! Every vector gets its own dispatch thread, started the first time a
//! handler is connected to it and kept for the rest of the process. Several
//! handlers may chain on one vector; they share its thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::{DevError, InterruptController, InterruptHandler};

/// Number of VME bus vectors.
pub const VME_VECTOR_COUNT: u32 = 256;
/// Number of user interrupt vectors following the VME vectors.
pub const USER_VECTOR_COUNT: u32 = 32;
/// Total number of vectors accepted by the dispatcher.
pub const VECTOR_COUNT: u32 = VME_VECTOR_COUNT + USER_VECTOR_COUNT;

/// Controller-side interrupt source a vector is delivered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptSource {
    /// Any VME interrupt level; the vector selects the handler.
    VmeAnyLevel,
    /// User interrupt line `0..32`, in two banks of 16.
    User(u8),
}

impl InterruptSource {
    /// Returns the source delivering `vector`, or `None` when out of range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn for_vector(vector: u32) -> Option<Self> {
        if vector < VME_VECTOR_COUNT {
            Some(Self::VmeAnyLevel)
        } else if vector < VECTOR_COUNT {
            Some(Self::User((vector & 31) as u8))
        } else {
            None
        }
    }

    /// Vector number the controller dispatch loop for `vector` waits on.
    ///
    /// User lines carry no vector of their own and always dispatch on 0.
    #[must_use]
    pub const fn dispatch_vector(self, vector: u32) -> u32 {
        match self {
            Self::VmeAnyLevel => vector,
            Self::User(_) => 0,
        }
    }
}

impl fmt::Display for InterruptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VmeAnyLevel => f.write_str("VME"),
            Self::User(line) => {
                let bank = if line & 16 == 0 { 1 } else { 2 };
                write!(f, "USER{bank}.{}", line & 15)
            }
        }
    }
}

/// Name of the dispatch thread serving `vector`.
#[must_use]
pub fn dispatch_thread_name(vector: u32) -> String {
    match InterruptSource::for_vector(vector) {
        Some(InterruptSource::VmeAnyLevel) | None => format!("irq-VME{vector}"),
        Some(user) => format!("irq-{user}"),
    }
}

fn checked_source(vector: u32) -> Result<InterruptSource, DevError> {
    InterruptSource::for_vector(vector).ok_or_else(|| {
        debug!("vector {vector:#x} out of range");
        DevError::BadArgument {
            reason: "interrupt vector out of range",
        }
    })
}

/// Lazily starts per-vector dispatch threads and forwards handler
/// registrations to an [`InterruptController`].
pub struct InterruptDispatcher<C> {
    controller: Arc<C>,
    threads: Mutex<HashMap<u32, JoinHandle<()>>>,
    stack_size: usize,
}

impl<C> fmt::Debug for InterruptDispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptDispatcher")
            .field("threads", &self.thread_count())
            .field("stack_size", &self.stack_size)
            .finish_non_exhaustive()
    }
}

impl<C> InterruptDispatcher<C> {
    /// Number of dispatch threads started so far.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when `vector` already has a dispatch thread.
    #[must_use]
    pub fn has_thread(&self, vector: u32) -> bool {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&vector)
    }
}

impl<C> InterruptDispatcher<C>
where
    C: InterruptController + Send + Sync + 'static,
{
    /// Creates a dispatcher whose threads use `stack_size` bytes of stack.
    pub fn new(controller: Arc<C>, stack_size: usize) -> Self {
        Self {
            controller,
            threads: Mutex::new(HashMap::new()),
            stack_size,
        }
    }

    /// Returns the interrupt controller.
    pub fn controller(&self) -> &Arc<C> {
        &self.controller
    }

    /// Chains `handler` onto `vector`, starting the vector's dispatch thread
    /// if this is its first handler.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::BadArgument`] for vectors outside `0..288`,
    /// [`DevError::NoMemory`] when the dispatch thread cannot be started, and
    /// [`DevError::VectorInstallFailed`] when the controller refuses the
    /// handler.
    pub fn connect(
        &self,
        vector: u32,
        handler: InterruptHandler,
        parameter: usize,
    ) -> Result<(), DevError> {
        debug!("connect vector={vector:#x} handler={handler:?} parameter={parameter:#x}");
        let source = checked_source(vector)?;

        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        if !threads.contains_key(&vector) {
            let thread = self.spawn_dispatch_thread(source, vector)?;
            threads.insert(vector, thread);
        }

        debug!("connect vector {vector:#x} handler to controller");
        if !self
            .controller
            .connect_handler(source, vector, handler, parameter)
        {
            warn!("could not connect vector {vector:#x} interrupt handler");
            return Err(DevError::VectorInstallFailed { vector });
        }
        Ok(())
    }

    /// Removes `handler` from `vector`. The dispatch thread stays alive.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::BadArgument`] for vectors outside `0..288` and
    /// [`DevError::VectorNotInUse`] when the controller does not know the
    /// handler.
    pub fn disconnect(&self, vector: u32, handler: &InterruptHandler) -> Result<(), DevError> {
        debug!("disconnect vector={vector:#x} handler={handler:?}");
        let source = checked_source(vector)?;
        if self.controller.disconnect_handler(source, vector, handler) {
            Ok(())
        } else {
            Err(DevError::VectorNotInUse { vector })
        }
    }

    /// Reports whether `vector` is unavailable for new handlers.
    ///
    /// Handlers chain, so a vector never is.
    #[must_use]
    pub const fn in_use(&self, _vector: u32) -> bool {
        false
    }

    fn spawn_dispatch_thread(
        &self,
        source: InterruptSource,
        vector: u32,
    ) -> Result<JoinHandle<()>, DevError> {
        let name = dispatch_thread_name(vector);
        debug!("starting handler thread {name}");
        let controller = Arc::clone(&self.controller);
        let dispatch_vector = source.dispatch_vector(vector);
        thread::Builder::new()
            .name(name.clone())
            .stack_size(self.stack_size)
            .spawn(move || controller.dispatch_loop(source, dispatch_vector))
            .map_err(|err| {
                warn!("starting handler thread {name} failed: {err}");
                DevError::NoMemory { vector }
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;

    use super::{dispatch_thread_name, InterruptDispatcher, InterruptSource, VECTOR_COUNT};
    use crate::{DevError, InterruptController, InterruptHandler, StatusKind};

    #[derive(Default)]
    struct CountingController {
        connected: Mutex<Vec<(InterruptSource, u32, usize)>>,
        loops: Mutex<Vec<(InterruptSource, u32)>>,
        refuse: bool,
    }

    impl InterruptController for CountingController {
        fn connect_handler(
            &self,
            source: InterruptSource,
            vector: u32,
            _handler: InterruptHandler,
            parameter: usize,
        ) -> bool {
            self.connected
                .lock()
                .unwrap()
                .push((source, vector, parameter));
            !self.refuse
        }

        fn disconnect_handler(
            &self,
            _source: InterruptSource,
            _vector: u32,
            _handler: &InterruptHandler,
        ) -> bool {
            false
        }

        fn dispatch_loop(&self, source: InterruptSource, vector: u32) {
            self.loops.lock().unwrap().push((source, vector));
        }
    }

    fn dispatcher(controller: CountingController) -> InterruptDispatcher<CountingController> {
        InterruptDispatcher::new(controller.into(), 64 * 1024)
    }

    #[rstest]
    #[case(0, Some(InterruptSource::VmeAnyLevel))]
    #[case(255, Some(InterruptSource::VmeAnyLevel))]
    #[case(256, Some(InterruptSource::User(0)))]
    #[case(271, Some(InterruptSource::User(15)))]
    #[case(272, Some(InterruptSource::User(16)))]
    #[case(287, Some(InterruptSource::User(31)))]
    #[case(288, None)]
    fn vectors_map_to_controller_sources(
        #[case] vector: u32,
        #[case] expected: Option<InterruptSource>,
    ) {
        assert_eq!(InterruptSource::for_vector(vector), expected);
    }

    #[rstest]
    #[case(5, "irq-VME5")]
    #[case(256, "irq-USER1.0")]
    #[case(271, "irq-USER1.15")]
    #[case(272, "irq-USER2.0")]
    #[case(287, "irq-USER2.15")]
    fn thread_names_follow_source(#[case] vector: u32, #[case] name: &str) {
        assert_eq!(dispatch_thread_name(vector), name);
    }

    #[test]
    fn out_of_range_vector_is_bad_argument() {
        let dispatcher = dispatcher(CountingController::default());
        let err = dispatcher
            .connect(VECTOR_COUNT, InterruptHandler::new(|_| {}), 0)
            .expect_err("vector 288 is out of range");
        assert_eq!(err.kind(), StatusKind::BadArgument);
        assert_eq!(dispatcher.thread_count(), 0);
    }

    #[test]
    fn one_thread_per_vector_regardless_of_handler_count() {
        let dispatcher = dispatcher(CountingController::default());
        dispatcher
            .connect(0x40, InterruptHandler::new(|_| {}), 1)
            .expect("first handler");
        dispatcher
            .connect(0x40, InterruptHandler::new(|_| {}), 2)
            .expect("second handler");
        assert_eq!(dispatcher.thread_count(), 1);

        dispatcher
            .connect(0x41, InterruptHandler::new(|_| {}), 3)
            .expect("other vector");
        assert_eq!(dispatcher.thread_count(), 2);
        assert!(dispatcher.has_thread(0x40));
        assert!(dispatcher.has_thread(0x41));
        assert!(!dispatcher.has_thread(0x42));
    }

    #[test]
    fn user_vectors_connect_through_user_source() {
        let dispatcher = dispatcher(CountingController::default());
        dispatcher
            .connect(260, InterruptHandler::new(|_| {}), 7)
            .expect("user vector");
        assert_eq!(
            dispatcher.controller().connected.lock().unwrap().as_slice(),
            [(InterruptSource::User(4), 260, 7)]
        );
    }

    #[test]
    fn refused_handler_keeps_started_thread() {
        let dispatcher = dispatcher(CountingController {
            refuse: true,
            ..CountingController::default()
        });
        let err = dispatcher
            .connect(9, InterruptHandler::new(|_| {}), 0)
            .expect_err("controller refuses");
        assert_eq!(err, DevError::VectorInstallFailed { vector: 9 });
        assert!(dispatcher.has_thread(9));
    }

    #[test]
    fn unknown_handler_disconnect_is_not_in_use() {
        let dispatcher = dispatcher(CountingController::default());
        let err = dispatcher
            .disconnect(3, &InterruptHandler::new(|_| {}))
            .expect_err("nothing connected");
        assert_eq!(err.kind(), StatusKind::VectorNotInUse);
        assert!(!dispatcher.in_use(3));
    }
}
