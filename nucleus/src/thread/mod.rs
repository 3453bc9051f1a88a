//! Thread abstraction, an abstraction of a cpu core.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. Exactly one thread holds the CPU at a time;
//! the others are either runnable, waiting in the scheduler's queue, or
//! parked, waiting for someone to hand their [`ParkHandle`] back to the
//! scheduler.
//!
//! A thread blocks itself with [`Current::park_with`]. The closure receives
//! the thread's [`ParkHandle`] and is expected to store it somewhere a waker
//! can find it, such as the wait queue of a lock:
//!
//! ```
//! use nucleus::{SystemConfigurationBuilder, sync::SpinLock, thread::{Current, ThreadBuilder}};
//! use std::sync::Arc;
//!
//! let kernel = SystemConfigurationBuilder::new().boot().unwrap();
//! let code = kernel.run(|| {
//!     let slot = Arc::new(SpinLock::new(None));
//!     let waker = {
//!         let slot = slot.clone();
//!         ThreadBuilder::new("waker").spawn(move || {
//!             let mut slot = slot.lock();
//!             let handle: Option<nucleus::thread::ParkHandle> = slot.take();
//!             slot.unlock();
//!             handle.unwrap().unpark();
//!         })
//!     };
//!     Current::park_with(|handle| {
//!         let mut guard = slot.lock();
//!         *guard = Some(handle);
//!         guard.unlock();
//!     });
//!     waker.join();
//! });
//! assert_eq!(code, Ok(0));
//! ```
pub mod scheduler;

use crate::{Kernel, KernelError, kernel::Outcome, sync::SpinLock};
use crossbeam_utils::sync::{Parker, Unparker};
use nucleus_machine::{
    Machine,
    interrupt::{InterruptGuard, InterruptState},
};
use std::{
    cell::RefCell,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is exited with exitcode.
    Exited(i32),
    /// Thread is parked.
    Parked,
}

/// An thread abstraction.
pub struct Thread {
    /// Thread id
    pub tid: u64,
    /// Thread name
    pub name: String,
    state: SpinLock<ThreadState>,
    joiners: SpinLock<Vec<ParkHandle>>,
    dispatched: AtomicBool,
    unparker: Unparker,
}

impl Thread {
    pub(crate) fn new(tid: u64, name: String, unparker: Unparker) -> Self {
        Self {
            tid,
            name,
            state: SpinLock::new(ThreadState::Runnable),
            joiners: SpinLock::new(Vec::new()),
            dispatched: AtomicBool::new(false),
            unparker,
        }
    }

    /// State of the thread.
    pub fn state(&self) -> ThreadState {
        let guard = self.state.lock();
        let state = *guard;
        guard.unlock();
        state
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        let mut guard = self.state.lock();
        *guard = state;
        guard.unlock();
    }

    pub(crate) fn wake_host(&self) {
        self.unparker.unpark();
    }
}

/// Payload unwinding a thread that called [`Current::exit`].
struct ExitSignal(i32);

/// Payload unwinding a thread stranded at shutdown.
pub(crate) struct Shutdown;

pub(crate) struct Context {
    pub(crate) kernel: Kernel,
    pub(crate) thread: Arc<Thread>,
    parker: Parker,
}

thread_local! {
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// Runs `f` with the context of the calling kernel thread.
pub(crate) fn context<R>(f: impl FnOnce(&Context) -> R) -> Option<R> {
    CONTEXT.with(|ctx| ctx.borrow().as_ref().map(f))
}

/// The very beginning of the thread.
pub(crate) fn thread_start(
    kernel: Kernel,
    th: Arc<Thread>,
    parker: Parker,
    thread_fn: Box<dyn FnOnce() + Send>,
) {
    kernel.machine().attach();
    CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = Some(Context {
            kernel: kernel.clone(),
            thread: th.clone(),
            parker,
        })
    });

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        kernel.wait_for_dispatch(&th);
        kernel.machine().interrupt().restore(InterruptState::On);
        thread_fn();
    }));
    let exit_code = match result {
        Ok(()) => Some(0),
        Err(payload) => {
            if let Some(ExitSignal(code)) = payload.downcast_ref::<ExitSignal>() {
                Some(*code)
            } else if payload.is::<Shutdown>() {
                None
            } else {
                log::warn!("Thread: {} (tid {}) panicked.", th.name, th.tid);
                Some(-1)
            }
        }
    };
    if let Some(code) = exit_code {
        kernel.exit_current(&th, code);
    }

    CONTEXT.with(|ctx| ctx.borrow_mut().take());
    Machine::detach();
}

impl Kernel {
    /// Tears down the running thread `th` and passes the CPU on.
    ///
    /// When `th` is the `main` thread, the kernel halts instead.
    fn exit_current(&self, th: &Arc<Thread>, exit_code: i32) {
        self.machine().interrupt().disable();
        th.set_state(ThreadState::Exited(exit_code));

        let mut threads = self.inner.threads.lock();
        threads.remove(&th.tid);
        threads.unlock();

        let mut joiners = th.joiners.lock();
        let waiting = std::mem::take(&mut *joiners);
        joiners.unlock();
        for joiner in waiting {
            joiner.unpark();
        }

        log::debug!(
            "Thread: {} (tid {}) exited with {exit_code}.",
            th.name,
            th.tid
        );
        if self.is_main(th.tid) {
            self.finish(Outcome::Halted(exit_code));
        } else {
            self.reschedule(th);
        }
    }
}

/// Get specified thread's [`ThreadState`] by TID (Thread ID).
///
/// Exited threads are forgotten by the kernel.
///
/// # Errors
/// [`KernelError::InvalidArgument`] if no live thread has this id.
pub fn get_state_by_tid(tid: u64) -> Result<ThreadState, KernelError> {
    let kernel = Kernel::current();
    let threads = kernel.inner.threads.lock();
    let state = threads.get(&tid).map(|th| th.state());
    threads.unlock();
    state.ok_or(KernelError::InvalidArgument)
}

/// A handle to join thread.
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: u64,
    th: Arc<Thread>,
}

impl JoinHandle {
    /// Join this handle and returns exit code.
    pub fn join(self) -> i32 {
        let guard = InterruptGuard::new();
        if !matches!(self.th.state(), ThreadState::Exited(_)) {
            Current::park_with(|handle| {
                let mut joiners = self.th.joiners.lock();
                joiners.push(handle);
                joiners.unlock();
            });
        }
        drop(guard);

        match self.th.state() {
            ThreadState::Exited(code) => code,
            state => unreachable!("Joined thread {} is {state:?}.", self.tid),
        }
    }
}

/// A handle that represent the parked thread.
///
/// Only one handle exists per parked thread. Consuming it with
/// [`ParkHandle::unpark`] makes the thread runnable again.
pub struct ParkHandle {
    th: Arc<Thread>,
}

impl ParkHandle {
    /// Thread id of the parked thread.
    pub fn tid(&self) -> u64 {
        self.th.tid
    }

    /// Consume the handle and unpark the underlying thread.
    pub fn unpark(self) {
        let kernel = Kernel::current();
        let guard = InterruptGuard::new();
        self.th.set_state(ThreadState::Runnable);
        kernel.inner.scheduler.push_to_queue(self.th);
        drop(guard);
    }
}

/// The opaque structure indicating the running thread on the current cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// Run a function `f` with [`ParkHandle`] for current thread, and then park
    /// the current thread.
    ///
    /// `f` runs with interrupts disabled, and the thread does not run again
    /// until the handle is unparked. The caller may hold an
    /// [`InterruptGuard`]; it stays in effect when the thread resumes.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        let kernel = Kernel::current();
        let th = with_current(|th| th.clone());
        let guard = InterruptGuard::new();
        th.set_state(ThreadState::Parked);
        f(ParkHandle { th: th.clone() });
        kernel.reschedule(&th);
        drop(guard);
    }

    /// Give up the CPU to the next runnable thread.
    ///
    /// Interrupts are re-enabled on the way out, so the clock ticks and a due
    /// timer interrupt is delivered, as with any other interrupt enable.
    /// Inside an interrupt handler, the yield is deferred until the handler
    /// returns. Outside a kernel thread, this does nothing.
    pub fn yield_now() {
        Self::switch_out(true);
    }

    /// The machine's preemption hook.
    ///
    /// The interrupted thread already let the clock tick when it re-enabled
    /// interrupts, so coming back does not tick again.
    pub(crate) fn preempt() {
        Self::switch_out(false);
    }

    fn switch_out(tick: bool) {
        let Some((kernel, th)) = context(|ctx| (ctx.kernel.clone(), ctx.thread.clone())) else {
            return;
        };
        let machine = kernel.machine();
        let interrupt = machine.interrupt();
        if interrupt.in_handler() {
            interrupt.request_yield();
            return;
        }
        let prev = interrupt.disable();
        th.set_state(ThreadState::Runnable);
        kernel.inner.scheduler.push_to_queue(th.clone());
        kernel.reschedule(&th);
        if tick && prev == InterruptState::On {
            machine.enable();
        } else {
            interrupt.restore(prev);
        }
    }

    /// Exit the current thread with `exit_code`.
    pub fn exit(exit_code: i32) -> ! {
        assert!(
            !InterruptGuard::is_guarded(),
            "Try to exit a thread while holding a lock."
        );
        panic::resume_unwind(Box::new(ExitSignal(exit_code)))
    }

    /// Get the current thread's id.
    pub fn get_tid() -> u64 {
        with_current(|th| th.tid)
    }
}

/// Run a function `f` with current thread as an argument.
///
/// # Panics
/// When called outside a kernel thread.
pub fn with_current<R>(f: impl FnOnce(&Arc<Thread>) -> R) -> R {
    match context(|ctx| f(&ctx.thread)) {
        Some(r) => r,
        None => panic!("with_current() called outside a kernel thread."),
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    name: String,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
        }
    }

    /// Spawn the thread on the current kernel.
    ///
    /// # Errors
    /// [`KernelError::NoMemory`] if the host could not create the thread.
    pub fn try_spawn<F: FnOnce() + Send + 'static>(
        self,
        thread_fn: F,
    ) -> Result<JoinHandle, KernelError> {
        let kernel = Kernel::current();
        let guard = InterruptGuard::new();
        let th = kernel.spawn(self.name, Box::new(thread_fn));
        drop(guard);
        th.map(|th| JoinHandle { tid: th.tid, th })
    }

    /// Spawn the thread.
    ///
    /// # Panics
    /// If the thread could not be created.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        match self.try_spawn(thread_fn) {
            Ok(handle) => handle,
            Err(e) => panic!("Failed to spawn a thread: {e}"),
        }
    }
}
