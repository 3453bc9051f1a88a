//! Thread scheduler
//!
//! A thread gives up the CPU by calling [`Kernel::reschedule`], which asks
//! the [`Scheduler`] for the next thread and hands the CPU over to it. When
//! nothing is runnable the CPU idles until the next timer interrupt, which
//! may wake a sleeping thread. If idling can never make progress the run
//! ends with a deadlock. A clock past the tick budget ends the run at the
//! next reschedule.

use super::{Shutdown, Thread, ThreadState, context};
use crate::{Kernel, kernel::Outcome};
use crossbeam_queue::SegQueue;
use nucleus_machine::Idle;
use std::sync::{Arc, atomic::Ordering};

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] trait defines the common functionality expected from a
/// thread scheduler: it keeps the runnable threads and decides which one
/// runs next. Different policies, such as round robin or priority-based
/// scheduling, implement this trait with their own queueing strategy.
pub trait Scheduler: Send + Sync {
    /// Peek a next thread to run.
    ///
    /// This method checks the queue and returns the next thread to run. If no
    /// threads are available, it returns `None`.
    fn next_to_run(&self) -> Option<Arc<Thread>>;

    /// Push a thread `th` into scheduling queue.
    ///
    /// This method adds the specified thread to the queue of threads waiting to
    /// be scheduled.
    fn push_to_queue(&self, th: Arc<Thread>);
}

/// A First-in-first-out scheduler.
#[derive(Default)]
pub struct Fifo {
    runqueue: SegQueue<Arc<Thread>>,
}

impl Scheduler for Fifo {
    fn next_to_run(&self) -> Option<Arc<Thread>> {
        self.runqueue.pop()
    }

    fn push_to_queue(&self, th: Arc<Thread>) {
        self.runqueue.push(th);
    }
}

impl Kernel {
    /// Hands the CPU from `current` over to the next runnable thread.
    ///
    /// Interrupts must be disabled. Returns once `current` is dispatched
    /// again, or right away if `current` has exited.
    pub(crate) fn reschedule(&self, current: &Arc<Thread>) {
        let machine = self.machine();
        assert!(
            !machine.interrupt().in_handler(),
            "Try to reschedule a thread inside an interrupt handler."
        );
        let exited = matches!(current.state(), ThreadState::Exited(_));

        loop {
            if machine.out_of_budget() {
                log::warn!(
                    "Scheduler: ran past the tick budget ({}).",
                    machine.config().tick_budget
                );
                self.finish(Outcome::TickBudget);
                break;
            }
            if let Some(next) = self.inner.scheduler.next_to_run() {
                if Arc::ptr_eq(&next, current) {
                    current.set_state(ThreadState::Running);
                    return;
                }
                next.set_state(ThreadState::Running);
                self.dispatch(&next);
                break;
            }
            match machine.idle() {
                Idle::Fired => continue,
                Idle::NoTimer => {
                    log::warn!(
                        "Scheduler: every thread is blocked at tick {}.",
                        self.ticks()
                    );
                    self.finish(Outcome::Deadlock);
                    break;
                }
                Idle::BudgetExhausted => {
                    log::warn!(
                        "Scheduler: idle past the tick budget ({}).",
                        machine.config().tick_budget
                    );
                    self.finish(Outcome::TickBudget);
                    break;
                }
            }
        }

        if !exited {
            self.wait_for_dispatch(current);
        }
    }

    /// Gives the CPU to `th`.
    pub(crate) fn dispatch(&self, th: &Thread) {
        th.dispatched.store(true, Ordering::SeqCst);
        th.wake_host();
    }

    /// Blocks the host thread of `th` until the CPU is handed to it.
    ///
    /// Unwinds with [`Shutdown`] if the kernel shuts down first.
    pub(crate) fn wait_for_dispatch(&self, th: &Thread) {
        loop {
            if th.dispatched.swap(false, Ordering::SeqCst) {
                return;
            }
            if self.inner.shutdown.load(Ordering::SeqCst) {
                std::panic::resume_unwind(Box::new(Shutdown));
            }
            context(|ctx| ctx.parker.park());
        }
    }
}
