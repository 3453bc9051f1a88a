//! Periodic timer device.
use crate::spinlock::SpinLock;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// A point on the machine's logical clock.
pub type Tick = u64;

type Handler = Arc<dyn Fn(Tick) + Send + Sync>;

/// The periodic timer.
///
/// The timer interrupts the CPU every [`Timer::interval`] ticks. It has a
/// single handler slot; registering a handler replaces the previous one.
pub struct Timer {
    now: AtomicU64,
    interval: Tick,
    next_due: AtomicU64,
    handler: SpinLock<Option<Handler>>,
}

impl Timer {
    pub(crate) fn new(interval: Tick) -> Self {
        Self {
            now: AtomicU64::new(0),
            interval,
            next_due: AtomicU64::new(interval),
            handler: SpinLock::new(None),
        }
    }

    /// Current tick.
    pub fn now(&self) -> Tick {
        self.now.load(Ordering::SeqCst)
    }

    /// Ticks between two interrupts.
    pub fn interval(&self) -> Tick {
        self.interval
    }

    /// Tick of the next interrupt.
    pub fn next_due(&self) -> Tick {
        self.next_due.load(Ordering::SeqCst)
    }

    /// Registers `handler` to be called on every timer interrupt with the
    /// current tick.
    ///
    /// The handler runs with interrupts disabled.
    pub fn set_interrupt_handler(&self, handler: impl Fn(Tick) + Send + Sync + 'static) {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            log::warn!("Timer: replacing the registered interrupt handler.");
        }
        *slot = Some(Arc::new(handler));
        slot.unlock();
    }

    /// Whether a handler is registered.
    pub fn has_handler(&self) -> bool {
        let slot = self.handler.lock();
        let registered = slot.is_some();
        slot.unlock();
        registered
    }

    pub(crate) fn handler(&self) -> Option<Handler> {
        let slot = self.handler.lock();
        let handler = slot.clone();
        slot.unlock();
        handler
    }

    pub(crate) fn advance(&self, ticks: Tick) -> Tick {
        self.now.fetch_add(ticks, Ordering::SeqCst) + ticks
    }

    pub(crate) fn jump_to(&self, tick: Tick) {
        self.now.fetch_max(tick, Ordering::SeqCst);
    }

    /// Schedules the interrupt following the one delivered at `now`.
    pub(crate) fn rearm(&self, now: Tick) {
        self.next_due
            .store((now / self.interval + 1) * self.interval, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rearm_rounds_to_interval() {
        let timer = Timer::new(10);
        assert_eq!(timer.next_due(), 10);
        timer.rearm(10);
        assert_eq!(timer.next_due(), 20);
        timer.rearm(27);
        assert_eq!(timer.next_due(), 30);
    }

    #[test]
    fn replacing_handler() {
        let timer = Timer::new(10);
        assert!(!timer.has_handler());
        timer.set_interrupt_handler(|_| {});
        timer.set_interrupt_handler(|_| {});
        assert!(timer.has_handler());
    }
}
