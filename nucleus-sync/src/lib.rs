//! # Synchronization core.
//!
//! This crate builds the blocking primitives of the kernel on top of the
//! thread and lock abstractions of [`nucleus`]:
//!
//! - [`Alarm`]: puts threads to sleep until the clock reaches a given tick.
//!   It hooks the machine's periodic timer interrupt and wakes every thread
//!   whose wake-up tick has passed.
//! - [`Condition`]: a condition variable bound to a
//!   [`Lock`](nucleus::sync::Lock). Releasing the lock and blocking happen
//!   atomically, so a wake-up can never slip in between.
//! - [`Communicator`]: a synchronous rendezvous channel. A speaker returns
//!   only after a listener took its word.
//!
//! [`Communicator`] is built from [`Condition`]s; [`Alarm`] stands on its
//! own.
//!
//! [`Alarm`]: alarm::Alarm
//! [`Condition`]: sync::Condition
//! [`Communicator`]: sync::Communicator
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod alarm;
pub mod sync;

pub use alarm::Alarm;
pub use sync::{Communicator, Condition, Word};
