//! Simulated single-core machine.
//!
//! This crate models the hardware that the kernel runs on: a single CPU whose
//! interrupts can be enabled and disabled, a periodic timer device, and a
//! console. The machine is shared by every host thread that executes kernel
//! code; a host thread gains access to it with [`Machine::attach`].
//!
//! ## Time
//!
//! The machine keeps a logical clock counted in [`Tick`]s. The clock only
//! moves forward at two points:
//!
//! - whenever interrupts are re-enabled ([`Machine::enable`]), the clock
//!   advances by [`MachineConfig::kernel_tick`], and
//! - whenever the CPU has nothing to run ([`Machine::idle`]), the clock jumps
//!   to the next timer interrupt.
//!
//! When the clock reaches a multiple of [`MachineConfig::timer_interval`], the
//! registered timer handler is invoked with interrupts disabled. A handler
//! that wants the interrupted thread to give up the CPU calls
//! [`Interrupt::request_yield`]; the preemption hook runs once the handler
//! returned and interrupts are back on.
#![warn(missing_docs)]

pub mod interrupt;
pub mod kprint;
pub mod spinlock;
pub mod timer;

use interrupt::{Interrupt, InterruptState};
use std::{
    cell::RefCell,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use timer::{Tick, Timer};

thread_local! {
    static CURRENT_MACHINE: RefCell<Option<Arc<Machine>>> = const { RefCell::new(None) };
}

/// Static parameters of a [`Machine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MachineConfig {
    /// Ticks between two timer interrupts.
    pub timer_interval: Tick,
    /// Ticks the clock advances every time interrupts are re-enabled.
    ///
    /// Zero makes the clock advance only while the CPU idles.
    pub kernel_tick: Tick,
    /// The clock never idles past this tick.
    pub tick_budget: Tick,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            timer_interval: 500,
            kernel_tick: 1,
            tick_budget: 10_000_000,
        }
    }
}

/// Outcome of [`Machine::idle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Idle {
    /// The clock jumped to the next timer interrupt and the handler ran.
    Fired,
    /// There is no timer handler; idling can never make progress.
    NoTimer,
    /// The next timer interrupt lies beyond the tick budget.
    BudgetExhausted,
}

/// The simulated CPU.
pub struct Machine {
    config: MachineConfig,
    interrupt: Interrupt,
    timer: Timer,
    halted: AtomicBool,
}

impl Machine {
    /// Creates a powered-on machine with interrupts disabled.
    pub fn new(config: MachineConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            interrupt: Interrupt::new(),
            timer: Timer::new(config.timer_interval),
            halted: AtomicBool::new(false),
        })
    }

    /// The configuration this machine was built with.
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// The interrupt controller.
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// The timer device.
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Binds the calling host thread to this machine.
    pub fn attach(self: &Arc<Self>) {
        CURRENT_MACHINE.with(|m| *m.borrow_mut() = Some(self.clone()));
    }

    /// Unbinds the calling host thread from its machine, if any.
    pub fn detach() {
        CURRENT_MACHINE.with(|m| m.borrow_mut().take());
    }

    /// The machine the calling host thread is bound to.
    pub fn current() -> Option<Arc<Machine>> {
        CURRENT_MACHINE.with(|m| m.borrow().clone())
    }

    /// Powers the machine off.
    ///
    /// After halting, enabling interrupts neither advances the clock nor
    /// delivers interrupts.
    pub fn halt(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            log::debug!("Machine: halted at tick {}.", self.timer.now());
        }
    }

    /// Whether [`Machine::halt`] was called.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Enables interrupts and lets the clock advance by one kernel tick.
    ///
    /// A due timer interrupt is delivered before returning, and the
    /// preemption hook runs if the handler asked for it. Once the clock is
    /// past the tick budget, every call runs the preemption hook so that the
    /// scheduler can end the run.
    pub fn enable(&self) {
        self.interrupt.restore(InterruptState::On);
        if self.is_halted() {
            return;
        }
        let now = self.timer.advance(self.config.kernel_tick);
        if now >= self.timer.next_due() {
            self.deliver(now);
        }
        if self.out_of_budget() {
            self.interrupt.request_yield();
        }
        if self.interrupt.take_yield_request() {
            self.interrupt.preempt();
        }
    }

    /// Whether the clock has run past [`MachineConfig::tick_budget`].
    pub fn out_of_budget(&self) -> bool {
        self.timer.now() > self.config.tick_budget
    }

    /// Idles the CPU until the next timer interrupt.
    ///
    /// Must be called with interrupts disabled. A yield requested by the
    /// handler is dropped, as there is no thread to preempt.
    pub fn idle(&self) -> Idle {
        if !self.timer.has_handler() {
            return Idle::NoTimer;
        }
        let due = self.timer.next_due();
        if due > self.config.tick_budget {
            return Idle::BudgetExhausted;
        }
        self.timer.jump_to(due);
        self.deliver(due);
        self.interrupt.take_yield_request();
        Idle::Fired
    }

    fn deliver(&self, now: Tick) {
        let prev = self.interrupt.disable();
        self.timer.rearm(now);
        self.interrupt.set_in_handler(true);
        if let Some(handler) = self.timer.handler() {
            handler(now);
        }
        self.interrupt.set_in_handler(false);
        self.interrupt.restore(prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn machine(timer_interval: Tick, kernel_tick: Tick) -> Arc<Machine> {
        Machine::new(MachineConfig {
            timer_interval,
            kernel_tick,
            ..MachineConfig::default()
        })
    }

    #[test]
    fn enable_advances_clock() {
        let machine = machine(10, 3);
        machine.enable();
        machine.enable();
        assert_eq!(machine.timer().now(), 6);
        assert_eq!(machine.interrupt().state(), InterruptState::On);
    }

    #[test]
    fn handler_runs_with_interrupts_disabled() {
        let machine = machine(4, 1);
        let fired = Arc::new(AtomicU64::new(0));
        let seen = Arc::new(AtomicBool::new(true));
        {
            let (fired, seen, m) = (fired.clone(), seen.clone(), machine.clone());
            machine.timer().set_interrupt_handler(move |now| {
                fired.store(now, Ordering::SeqCst);
                if m.interrupt().state() == InterruptState::On || !m.interrupt().in_handler() {
                    seen.store(false, Ordering::SeqCst);
                }
            });
        }
        for _ in 0..3 {
            machine.enable();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        machine.enable();
        assert_eq!(fired.load(Ordering::SeqCst), 4);
        assert!(seen.load(Ordering::SeqCst));
        assert!(!machine.interrupt().in_handler());
        assert_eq!(machine.timer().next_due(), 8);
    }

    #[test]
    fn idle_jumps_to_next_interrupt() {
        let machine = machine(10, 0);
        assert_eq!(machine.idle(), Idle::NoTimer);

        let hits = Arc::new(AtomicU64::new(0));
        {
            let hits = hits.clone();
            machine.timer().set_interrupt_handler(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        machine.interrupt().disable();
        assert_eq!(machine.idle(), Idle::Fired);
        assert_eq!(machine.timer().now(), 10);
        assert_eq!(machine.idle(), Idle::Fired);
        assert_eq!(machine.timer().now(), 20);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn idle_respects_budget() {
        let machine = Machine::new(MachineConfig {
            timer_interval: 10,
            kernel_tick: 0,
            tick_budget: 25,
        });
        machine.timer().set_interrupt_handler(|_| {});
        assert_eq!(machine.idle(), Idle::Fired);
        assert_eq!(machine.idle(), Idle::Fired);
        assert_eq!(machine.idle(), Idle::BudgetExhausted);
        assert_eq!(machine.timer().now(), 20);
    }

    #[test]
    fn yield_request_runs_preempt_hook() {
        let machine = machine(2, 1);
        let preempted = Arc::new(AtomicU64::new(0));
        {
            let m = machine.clone();
            machine
                .timer()
                .set_interrupt_handler(move |_| m.interrupt().request_yield());
            let preempted = preempted.clone();
            machine.interrupt().register_preempt_handler(move || {
                preempted.fetch_add(1, Ordering::SeqCst);
            });
        }
        for _ in 0..6 {
            machine.enable();
        }
        assert_eq!(preempted.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn enable_past_budget_runs_preempt_hook() {
        let machine = Machine::new(MachineConfig {
            timer_interval: 100,
            kernel_tick: 1,
            tick_budget: 3,
        });
        let preempted = Arc::new(AtomicU64::new(0));
        {
            let preempted = preempted.clone();
            machine.interrupt().register_preempt_handler(move || {
                preempted.fetch_add(1, Ordering::SeqCst);
            });
        }
        for _ in 0..3 {
            machine.enable();
        }
        assert!(!machine.out_of_budget());
        assert_eq!(preempted.load(Ordering::SeqCst), 0);
        machine.enable();
        machine.enable();
        assert!(machine.out_of_budget());
        assert_eq!(preempted.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn halted_machine_stops_time() {
        let machine = machine(10, 5);
        machine.enable();
        machine.halt();
        machine.enable();
        assert!(machine.is_halted());
        assert_eq!(machine.timer().now(), 5);
    }
}
