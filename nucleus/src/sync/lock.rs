//! # Sleeping lock.
//!
//! A [`Lock`] provides mutual exclusion between kernel threads without
//! spinning. A thread that calls [`Lock::acquire`] on a held lock is parked
//! in the lock's wait queue. [`Lock::release`] hands the lock directly to
//! the oldest waiter, so waiters acquire the lock in arrival order and a
//! newcomer can never barge in front of them.
//!
//! Unlike [`SpinLock`], a [`Lock`] does not own the data it protects and has
//! no guard; it tracks its owner instead, which lets condition variables
//! check that they are used with the lock held.
//!
//! [`SpinLock`]: crate::sync::SpinLock

use crate::{
    sync::SpinLock,
    thread::{Current, ParkHandle},
};
use std::collections::VecDeque;

struct LockInner {
    owner: Option<u64>,
    waiters: VecDeque<ParkHandle>,
}

/// A mutual exclusion lock that parks waiting threads.
pub struct Lock {
    inner: SpinLock<LockInner>,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    /// Creates an unlocked lock.
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(LockInner {
                owner: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquires the lock, parking the current thread until it is available.
    ///
    /// # Panics
    /// If the current thread already holds the lock.
    pub fn acquire(&self) {
        let tid = Current::get_tid();
        let mut inner = self.inner.lock();
        assert!(
            inner.owner != Some(tid),
            "Lock::acquire: thread {tid} already holds the lock."
        );
        if inner.owner.is_none() {
            inner.owner = Some(tid);
            inner.unlock();
            return;
        }
        Current::park_with(move |handle| {
            inner.waiters.push_back(handle);
            inner.unlock();
        });
    }

    /// Releases the lock, handing it to the oldest waiter if there is one.
    ///
    /// # Panics
    /// If the current thread does not hold the lock.
    pub fn release(&self) {
        let tid = Current::get_tid();
        let mut inner = self.inner.lock();
        assert!(
            inner.owner == Some(tid),
            "Lock::release: thread {tid} does not hold the lock."
        );
        match inner.waiters.pop_front() {
            Some(next) => {
                inner.owner = Some(next.tid());
                next.unpark();
            }
            None => inner.owner = None,
        }
        inner.unlock();
    }

    /// Whether the current thread holds the lock.
    pub fn is_held_by_current(&self) -> bool {
        let tid = Current::get_tid();
        let inner = self.inner.lock();
        let held = inner.owner == Some(tid);
        inner.unlock();
        held
    }
}
