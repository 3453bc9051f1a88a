//! # Condition Variable.
//!
//! A **Condition Variable** allows a thread to block until some predicate on
//! shared data becomes true, without consuming CPU cycles. Each
//! [`Condition`] is bound to exactly one [`Lock`] which guards the shared
//! data; every operation must be called while holding that lock.
//!
//! The usual pattern re-checks the predicate after every wake-up:
//!
//! ```rust
//! # use nucleus::{SystemConfigurationBuilder, sync::Lock};
//! # use nucleus_sync::Condition;
//! # use std::sync::Arc;
//! # let kernel = SystemConfigurationBuilder::new().boot().unwrap();
//! # kernel.run(|| {
//! # let lock = Arc::new(Lock::new());
//! # let cond = Condition::new(lock.clone());
//! # let ready = || true;
//! lock.acquire();
//! while !ready() {
//!     cond.sleep();
//! }
//! // ... use the shared data ...
//! lock.release();
//! # }).unwrap();
//! ```
//!
//! [`Condition::sleep`] releases the lock and blocks as one atomic step:
//! interrupts stay disabled from the release until the thread is parked, so
//! a [`Condition::wake`] issued by the next lock holder always finds the
//! sleeper in the wait queue.

use nucleus::{
    sync::{InterruptGuard, Lock, SpinLock},
    thread::{Current, ParkHandle},
};
use std::{collections::VecDeque, sync::Arc};

/// A condition variable bound to a [`Lock`].
///
/// Waiters are woken in the order they went to sleep.
pub struct Condition {
    lock: Arc<Lock>,
    waiters: SpinLock<VecDeque<ParkHandle>>,
}

impl Condition {
    /// Creates a condition variable bound to `lock`.
    pub fn new(lock: Arc<Lock>) -> Self {
        Self {
            lock,
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// The lock this condition variable is bound to.
    pub fn lock(&self) -> &Arc<Lock> {
        &self.lock
    }

    /// Atomically releases the lock and blocks the current thread until
    /// another thread wakes it, then re-acquires the lock.
    ///
    /// # Panics
    /// If the current thread does not hold the bound lock.
    pub fn sleep(&self) {
        self.assert_held("sleep");

        let guard = InterruptGuard::new();
        self.lock.release();
        Current::park_with(|handle| {
            let mut waiters = self.waiters.lock();
            waiters.push_back(handle);
            waiters.unlock();
        });
        self.lock.acquire();
        drop(guard);
    }

    /// Wakes the thread that has been sleeping the longest, if any.
    ///
    /// # Panics
    /// If the current thread does not hold the bound lock.
    pub fn wake(&self) {
        self.assert_held("wake");

        let guard = InterruptGuard::new();
        self.wake_one();
        drop(guard);
    }

    /// Wakes every sleeping thread, oldest first.
    ///
    /// # Panics
    /// If the current thread does not hold the bound lock.
    pub fn wake_all(&self) {
        self.assert_held("wake_all");

        let guard = InterruptGuard::new();
        while self.wake_one() {}
        drop(guard);
    }

    /// Number of sleeping threads.
    pub fn waiters(&self) -> usize {
        let waiters = self.waiters.lock();
        let len = waiters.len();
        waiters.unlock();
        len
    }

    fn wake_one(&self) -> bool {
        let mut waiters = self.waiters.lock();
        let next = waiters.pop_front();
        waiters.unlock();
        match next {
            Some(handle) => {
                handle.unpark();
                true
            }
            None => false,
        }
    }

    fn assert_held(&self, op: &str) {
        assert!(
            self.lock.is_held_by_current(),
            "Condition::{op}: the bound lock is not held by the current thread."
        );
    }
}
