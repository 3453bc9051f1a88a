//! Interrupt
#[cfg(doc)]
use crate::spinlock::SpinLockGuard;
use crate::{Machine, spinlock::SpinLock};
use std::{
    cell::Cell,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Enumeration representing the interrupt state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

type PreemptHook = Arc<dyn Fn() + Send + Sync>;

/// The interrupt controller of the machine.
///
/// [`Interrupt::disable`] and [`Interrupt::restore`] flip the interrupt flag
/// without letting time pass; they are the building blocks of the context
/// switch path. Kernel code should prefer [`InterruptGuard`], which lets the
/// clock advance when it re-enables interrupts.
pub struct Interrupt {
    enabled: AtomicBool,
    in_handler: AtomicBool,
    yield_on_return: AtomicBool,
    preempt: SpinLock<Option<PreemptHook>>,
}

impl Interrupt {
    pub(crate) fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            in_handler: AtomicBool::new(false),
            yield_on_return: AtomicBool::new(false),
            preempt: SpinLock::new(None),
        }
    }

    /// Reads the current interrupt state.
    pub fn state(&self) -> InterruptState {
        if self.enabled.load(Ordering::SeqCst) {
            InterruptState::On
        } else {
            InterruptState::Off
        }
    }

    /// Disables interrupts and returns the previous state.
    pub fn disable(&self) -> InterruptState {
        if self.enabled.swap(false, Ordering::SeqCst) {
            InterruptState::On
        } else {
            InterruptState::Off
        }
    }

    /// Sets the interrupt flag to `state`.
    pub fn restore(&self, state: InterruptState) {
        self.enabled
            .store(state == InterruptState::On, Ordering::SeqCst);
    }

    /// Whether an interrupt handler is running.
    pub fn in_handler(&self) -> bool {
        self.in_handler.load(Ordering::SeqCst)
    }

    pub(crate) fn set_in_handler(&self, v: bool) {
        self.in_handler.store(v, Ordering::SeqCst);
    }

    /// Asks for the interrupted thread to be preempted once the running
    /// handler returns.
    pub fn request_yield(&self) {
        self.yield_on_return.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_yield_request(&self) -> bool {
        self.yield_on_return.swap(false, Ordering::SeqCst)
    }

    /// Registers the function that preempts the running thread.
    pub fn register_preempt_handler(&self, f: impl Fn() + Send + Sync + 'static) {
        let prev = self.disable();
        let mut hook = self.preempt.lock();
        *hook = Some(Arc::new(f));
        hook.unlock();
        self.restore(prev);
    }

    pub(crate) fn preempt(&self) {
        let prev = self.disable();
        let guard = self.preempt.lock();
        let hook = guard.clone();
        guard.unlock();
        self.restore(prev);
        if let Some(hook) = hook {
            hook();
        }
    }
}

thread_local! {
    static NESTING: Cell<usize> = const { Cell::new(0) };
    static INITIAL_STATE: Cell<InterruptState> = const { Cell::new(InterruptState::Off) };
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, interrupts are disabled. When the
/// outermost guard of a thread is dropped, the interrupt state is restored to
/// what it was before that guard was created. Re-enabling interrupts lets
/// the clock tick, which may deliver a timer interrupt and preempt the
/// current thread.
///
/// Nesting is tracked per thread, so a thread may block while guarded; the
/// guard depth travels with the thread and is restored when it runs again.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation** to prevent unintended interrupt state changes.
/// - Due to Rust's ownership and scoping rules, this invariant is naturally
///   upheld unless `drop()` is explicitly called prematurely or an
///   [`InterruptGuard`] is stored in a struct field, as [`SpinLockGuard`]
///   does.
///
/// On a host thread not attached to any [`Machine`], the guard does nothing.
pub struct InterruptGuard {
    machine: Option<Arc<Machine>>,
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, disabling interrupts.
    ///
    /// # Example
    /// ```rust
    /// use nucleus_machine::interrupt::InterruptGuard;
    ///
    /// let guard = InterruptGuard::new(); // Disables interrupts
    /// // Critical section...
    /// drop(guard); // Interrupts are restored.
    /// ```
    pub fn new() -> Self {
        let machine = Machine::current();
        if let Some(machine) = machine.as_ref() {
            let prev = machine.interrupt().disable();
            let depth = NESTING.get();
            if depth == 0 {
                INITIAL_STATE.set(prev);
            }
            NESTING.set(depth + 1);
        }
        Self {
            machine,
            _not_send: PhantomData,
        }
    }

    /// Whether the calling thread holds at least one guard.
    pub fn is_guarded() -> bool {
        NESTING.get() > 0
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let Some(machine) = self.machine.take() else {
            return;
        };
        let depth = NESTING.get();
        assert!(depth > 0, "Mismatched InterruptGuard drop calls: {depth}");
        NESTING.set(depth - 1);
        if depth == 1 && INITIAL_STATE.get() == InterruptState::On {
            if std::thread::panicking() {
                machine.interrupt().restore(InterruptState::On);
            } else {
                machine.enable();
            }
        }
    }
}
