//! # Blocking synchronization primitives.
//!
//! | Primitive         | Blocks Thread? | Wake order | Typical Use Case                          |
//! |-------------------|----------------|------------|-------------------------------------------|
//! | [`Lock`]          | Yes            | FIFO       | Exclusive access to shared data           |
//! | [`Condition`]     | Yes            | FIFO       | Waiting for a predicate under a [`Lock`]  |
//! | [`Communicator`]  | Yes            | FIFO       | Handing a word from one thread to another |
//!
//! [`Lock`]: nucleus::sync::Lock

pub mod communicator;
pub mod condition;

pub use communicator::{Communicator, Word};
pub use condition::Condition;
