//! Synchronization primitives.
//!
//! - [`SpinLock`]: a busy-waiting lock that keeps interrupts disabled while
//!   held. Use it for short critical sections that never block.
//! - [`Lock`]: a sleeping lock. A thread that finds it held is parked until
//!   the holder hands the lock over.
pub mod lock;

pub use lock::Lock;
pub use nucleus_machine::{
    interrupt::InterruptGuard,
    spinlock::{SpinLock, SpinLockGuard, WouldBlock},
};
