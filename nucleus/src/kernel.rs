//! The kernel context.
use crate::{
    KernelError,
    sync::SpinLock,
    thread::{Current, Thread, ThreadState, context, scheduler::Scheduler},
};
use crossbeam_utils::sync::{Parker, Unparker};
use nucleus_machine::{Machine, MachineConfig, timer::Tick};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

/// How a run of the kernel ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// `main` exited with the code.
    Halted(i32),
    /// Every thread is blocked and nothing can wake them.
    Deadlock,
    /// The CPU idled past the tick budget.
    TickBudget,
}

pub(crate) struct KernelInner {
    pub(crate) machine: Arc<Machine>,
    pub(crate) scheduler: Box<dyn Scheduler>,
    pub(crate) threads: SpinLock<BTreeMap<u64, Arc<Thread>>>,
    host_threads: SpinLock<Vec<std::thread::JoinHandle<()>>>,
    next_tid: AtomicU64,
    main_tid: AtomicU64,
    outcome: SpinLock<Option<Outcome>>,
    runner: SpinLock<Option<Unparker>>,
    pub(crate) shutdown: AtomicBool,
    started: AtomicBool,
}

/// A booted kernel.
///
/// The kernel owns the machine, the scheduler and every thread it spawned.
/// It is created by [`SystemConfigurationBuilder::boot`] and cloned cheaply;
/// kernel threads reach the kernel they run on through [`Kernel::current`].
///
/// [`SystemConfigurationBuilder::boot`]: crate::SystemConfigurationBuilder::boot
#[derive(Clone)]
pub struct Kernel {
    pub(crate) inner: Arc<KernelInner>,
}

impl Kernel {
    pub(crate) fn new(config: MachineConfig, scheduler: Box<dyn Scheduler>) -> Self {
        let machine = Machine::new(config);
        machine
            .interrupt()
            .register_preempt_handler(Current::preempt);
        Self {
            inner: Arc::new(KernelInner {
                machine,
                scheduler,
                threads: SpinLock::new(BTreeMap::new()),
                host_threads: SpinLock::new(Vec::new()),
                next_tid: AtomicU64::new(1),
                main_tid: AtomicU64::new(0),
                outcome: SpinLock::new(None),
                runner: SpinLock::new(None),
                shutdown: AtomicBool::new(false),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// The kernel the calling kernel thread runs on.
    ///
    /// # Panics
    /// When called outside a kernel thread.
    pub fn current() -> Kernel {
        match Self::try_current() {
            Some(kernel) => kernel,
            None => panic!("Kernel::current() called outside a kernel thread."),
        }
    }

    /// The kernel the calling kernel thread runs on, if any.
    pub fn try_current() -> Option<Kernel> {
        context(|ctx| ctx.kernel.clone())
    }

    /// The machine this kernel runs on.
    pub fn machine(&self) -> &Arc<Machine> {
        &self.inner.machine
    }

    /// The current tick of the machine's clock.
    pub fn ticks(&self) -> Tick {
        self.inner.machine.timer().now()
    }

    /// Runs `f` as the `main` thread and waits for the kernel to halt.
    ///
    /// The kernel halts when `main` exits; threads still blocked at that
    /// point are discarded. The returned value is the exit code of `main`:
    /// `0` when `f` returns, the code given to [`Current::exit`], or `-1`
    /// when `f` panics.
    ///
    /// # Errors
    /// - [`KernelError::Busy`] if the kernel already ran.
    /// - [`KernelError::Deadlock`] if every thread blocked with no timer
    ///   handler left to wake any of them.
    /// - [`KernelError::TimedOut`] if the CPU idled past the tick budget.
    /// - [`KernelError::NoMemory`] if the host refused to spawn a thread.
    pub fn run(&self, f: impl FnOnce() + Send + 'static) -> Result<i32, KernelError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(KernelError::Busy);
        }
        let parker = Parker::new();
        let mut runner = self.inner.runner.lock();
        *runner = Some(parker.unparker().clone());
        runner.unlock();

        let main = self.spawn("main".into(), Box::new(f))?;
        self.inner.main_tid.store(main.tid, Ordering::SeqCst);
        log::info!("Kernel: running main thread (tid {}).", main.tid);
        if let Some(first) = self.inner.scheduler.next_to_run() {
            first.set_state(ThreadState::Running);
            self.dispatch(&first);
        }

        let outcome = loop {
            let guard = self.inner.outcome.lock();
            let outcome = *guard;
            guard.unlock();
            if let Some(outcome) = outcome {
                break outcome;
            }
            parker.park();
        };
        self.shutdown();

        log::info!("Kernel: {outcome:?} at tick {}.", self.ticks());
        match outcome {
            Outcome::Halted(code) => Ok(code),
            Outcome::Deadlock => Err(KernelError::Deadlock),
            Outcome::TickBudget => Err(KernelError::TimedOut),
        }
    }

    pub(crate) fn spawn(
        &self,
        name: String,
        f: Box<dyn FnOnce() + Send>,
    ) -> Result<Arc<Thread>, KernelError> {
        let tid = self.inner.next_tid.fetch_add(1, Ordering::SeqCst);
        let parker = Parker::new();
        let th = Arc::new(Thread::new(tid, name, parker.unparker().clone()));

        let host = {
            let (kernel, th) = (self.clone(), th.clone());
            std::thread::Builder::new()
                .name(format!("{}:{}", th.name, th.tid))
                .spawn(move || crate::thread::thread_start(kernel, th, parker, f))
                .map_err(|e| {
                    log::error!("Kernel: failed to spawn a host thread: {e}");
                    KernelError::NoMemory
                })?
        };

        let mut threads = self.inner.threads.lock();
        threads.insert(tid, th.clone());
        threads.unlock();
        let mut hosts = self.inner.host_threads.lock();
        hosts.push(host);
        hosts.unlock();

        self.inner.scheduler.push_to_queue(th.clone());
        log::debug!("Thread: spawned {} (tid {tid}).", th.name);
        Ok(th)
    }

    pub(crate) fn is_main(&self, tid: u64) -> bool {
        self.inner.main_tid.load(Ordering::SeqCst) == tid
    }

    /// Records how the run ended and wakes up [`Kernel::run`].
    ///
    /// Only the first outcome counts.
    pub(crate) fn finish(&self, outcome: Outcome) {
        let mut slot = self.inner.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        slot.unlock();

        let runner = self.inner.runner.lock();
        if let Some(runner) = runner.as_ref() {
            runner.unpark();
        }
        runner.unlock();
    }

    fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.machine.halt();

        let mut threads = self.inner.threads.lock();
        let stranded = std::mem::take(&mut *threads);
        threads.unlock();
        if !stranded.is_empty() {
            log::debug!("Kernel: discarding {} blocked thread(s).", stranded.len());
        }
        for th in stranded.values() {
            th.wake_host();
        }

        let mut hosts = self.inner.host_threads.lock();
        let hosts_to_join = std::mem::take(&mut *hosts);
        hosts.unlock();
        for host in hosts_to_join {
            let _ = host.join();
        }

        while self.inner.scheduler.next_to_run().is_some() {}
    }
}
