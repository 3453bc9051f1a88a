//! # Alarm.
//!
//! The [`Alarm`] lets a thread sleep until the machine's clock reaches a
//! given tick. Sleeping threads are kept in a min-heap keyed on their wake-up
//! tick. The alarm installs itself as the timer interrupt handler: on every
//! timer interrupt it wakes each thread whose wake-up tick has passed, and
//! then asks for the interrupted thread to yield so that woken threads get a
//! chance to run.
//!
//! A sleeping thread is parked, not spinning, and is woken by the first
//! timer interrupt at or after its wake-up tick. The wake-up tick is a lower
//! bound; a thread may run later than that, depending on the interrupt period
//! and on the other runnable threads.
//!
//! The machine has a single timer handler slot. Creating a second alarm on
//! the same kernel replaces the first one, whose sleepers are never woken.
//! Dropping an alarm does not uninstall its handler: the handler keeps the
//! sleep queue alive, and threads still in it are woken on schedule. Only
//! the [`Alarm`] handle goes away, so no new thread can sleep on it.

use nucleus::{
    Kernel, Tick,
    sync::{InterruptGuard, SpinLock},
    thread::{Current, ParkHandle},
};
use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};

/// A parked thread waiting for its wake-up tick.
struct SleepRequest {
    wake_tick: Tick,
    /// Insertion order; breaks ties between equal wake-up ticks.
    seq: u64,
    handle: ParkHandle,
}

impl PartialEq for SleepRequest {
    fn eq(&self, other: &Self) -> bool {
        self.wake_tick == other.wake_tick && self.seq == other.seq
    }
}

impl Eq for SleepRequest {}

impl PartialOrd for SleepRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SleepRequest {
    // Reversed, so that the BinaryHeap pops the earliest request first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_tick
            .cmp(&self.wake_tick)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Sleepers {
    queue: BinaryHeap<SleepRequest>,
    next_seq: u64,
}

/// Timed wake-up queue driven by the timer interrupt.
pub struct Alarm {
    kernel: Kernel,
    sleepers: Arc<SpinLock<Sleepers>>,
}

impl Alarm {
    /// Creates an alarm and registers it as the timer interrupt handler of
    /// `kernel`.
    pub fn new(kernel: &Kernel) -> Self {
        let sleepers = Arc::new(SpinLock::new(Sleepers::default()));
        {
            let sleepers = sleepers.clone();
            kernel
                .machine()
                .timer()
                .set_interrupt_handler(move |now| timer_interrupt(&sleepers, now));
        }
        log::debug!(
            "Alarm: armed on a {}-tick timer.",
            kernel.machine().timer().interval()
        );
        Self {
            kernel: kernel.clone(),
            sleepers,
        }
    }

    /// Puts the current thread to sleep for at least `min_ticks` ticks.
    ///
    /// The thread becomes runnable at the first timer interrupt at or after
    /// `now + min_ticks`. A non-positive `min_ticks` still waits for the next
    /// timer interrupt.
    ///
    /// # Panics
    /// If the wake-up tick overflows the clock.
    pub fn wait_until(&self, min_ticks: i64) {
        let guard = InterruptGuard::new();
        let now = self.kernel.ticks();
        let wake_tick = match u64::try_from(min_ticks) {
            Ok(delta) => match now.checked_add(delta) {
                Some(wake_tick) => wake_tick,
                None => panic!("Alarm::wait_until: tick {now} + {delta} overflows."),
            },
            Err(_) => now,
        };
        log::trace!(
            "Alarm: thread {} sleeps until tick {wake_tick}.",
            Current::get_tid()
        );

        Current::park_with(|handle| {
            let mut sleepers = self.sleepers.lock();
            let seq = sleepers.next_seq;
            sleepers.next_seq += 1;
            sleepers.queue.push(SleepRequest {
                wake_tick,
                seq,
                handle,
            });
            sleepers.unlock();
        });
        drop(guard);
    }

    /// Number of threads sleeping on this alarm.
    pub fn sleeping(&self) -> usize {
        let sleepers = self.sleepers.lock();
        let len = sleepers.queue.len();
        sleepers.unlock();
        len
    }
}

/// Wakes every sleeper whose wake-up tick is at most `now`, then preempts the
/// interrupted thread.
fn timer_interrupt(sleepers: &SpinLock<Sleepers>, now: Tick) {
    let guard = InterruptGuard::new();
    let mut sleepers = sleepers.lock();
    while sleepers
        .queue
        .peek()
        .is_some_and(|request| request.wake_tick <= now)
    {
        if let Some(request) = sleepers.queue.pop() {
            log::trace!(
                "Alarm: waking thread {} at tick {now}.",
                request.handle.tid()
            );
            request.handle.unpark();
        }
    }
    sleepers.unlock();
    Current::yield_now();
    drop(guard);
}
