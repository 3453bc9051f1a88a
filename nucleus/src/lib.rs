//! # Nucleus, a cooperative teaching kernel.
//!
//! Nucleus runs kernel threads on a simulated single-core
//! [`Machine`](nucleus_machine::Machine). Every kernel thread is backed by a
//! host thread, but only the thread that holds the CPU executes; the others
//! wait to be dispatched. Scheduling decisions are therefore fully
//! deterministic for a given configuration.
//!
//! A kernel is booted from a [`SystemConfigurationBuilder`], which yields a
//! [`Kernel`] context. [`Kernel::run`] starts the `main` thread and returns
//! once it exits:
//!
//! ```
//! use nucleus::{SystemConfigurationBuilder, thread::ThreadBuilder};
//!
//! let kernel = SystemConfigurationBuilder::new().boot().unwrap();
//! let code = kernel.run(|| {
//!     let child = ThreadBuilder::new("child").spawn(|| {});
//!     assert_eq!(child.join(), 0);
//! });
//! assert_eq!(code, Ok(0));
//! ```
#![warn(missing_docs)]

mod kernel;

pub mod sync;
pub mod thread;

pub use kernel::Kernel;
pub use nucleus_machine::{
    Idle, MachineConfig, kprint, kprintln,
    timer::{Tick, Timer},
};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thread::scheduler::{Fifo, Scheduler};

/// Enum representing errors that can occur during a kernel operation.
///
/// Each variant carries the errno value it corresponds to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(isize)]
pub enum KernelError {
    /// Cannot allocate memory. (ENOMEM)
    NoMemory = -12,
    /// Device or resource busy. (EBUSY)
    Busy = -16,
    /// Invalid argument. (EINVAL)
    InvalidArgument = -22,
    /// Resource deadlock would occur. (EDEADLK)
    Deadlock = -35,
    /// Connection timed out. (ETIMEDOUT)
    TimedOut = -110,
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            KernelError::NoMemory => "cannot allocate memory",
            KernelError::Busy => "device or resource busy",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::Deadlock => "every thread is blocked",
            KernelError::TimedOut => "tick budget exhausted",
        };
        write!(f, "{msg} ({})", isize::from(*self))
    }
}

impl std::error::Error for KernelError {}

/// Environment variable holding the default log level.
pub const LOG_ENV: &str = "NUCLEUS_LOG";

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring the machine and the scheduling policy before the kernel boots.
pub struct SystemConfigurationBuilder {
    machine: MachineConfig,
    scheduler: Box<dyn Scheduler>,
    log_level: Option<log::LevelFilter>,
}

impl Default for SystemConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemConfigurationBuilder {
    /// Starts from the default configuration: a 500-tick timer, one tick per
    /// interrupt enable, and the first-in-first-out scheduler.
    pub fn new() -> Self {
        Self {
            machine: MachineConfig::default(),
            scheduler: Box::new(Fifo::default()),
            log_level: None,
        }
    }

    /// Sets the ticks between two timer interrupts.
    pub fn timer_interval(mut self, ticks: Tick) -> Self {
        self.machine.timer_interval = ticks;
        self
    }

    /// Sets the ticks the clock advances whenever interrupts are re-enabled.
    pub fn kernel_tick(mut self, ticks: Tick) -> Self {
        self.machine.kernel_tick = ticks;
        self
    }

    /// Sets the tick past which an idle CPU gives up.
    pub fn tick_budget(mut self, ticks: Tick) -> Self {
        self.machine.tick_budget = ticks;
        self
    }

    /// Sets the system-wide scheduler.
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    /// Sets the console log level, overriding [`LOG_ENV`].
    pub fn log_level(mut self, level: log::LevelFilter) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Boots a kernel with this configuration.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] if the timer interval is zero.
    pub fn boot(self) -> Result<Kernel, KernelError> {
        let level = self.log_level.unwrap_or_else(|| {
            std::env::var(LOG_ENV)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(log::LevelFilter::Warn)
        });
        kprint::init(level);

        if self.machine.timer_interval == 0 {
            log::error!("Boot: the timer interval must be positive.");
            return Err(KernelError::InvalidArgument);
        }
        log::info!(
            "Boot: timer every {} ticks, {} tick(s) per interrupt enable, budget {}.",
            self.machine.timer_interval,
            self.machine.kernel_tick,
            self.machine.tick_budget
        );
        Ok(Kernel::new(self.machine, self.scheduler))
    }
}
