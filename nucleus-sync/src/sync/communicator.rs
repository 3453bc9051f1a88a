//! # Rendezvous channel.
//!
//! A [`Communicator`] hands single words from speakers to listeners with no
//! buffering: [`Communicator::speak`] blocks until a listener has taken the
//! word, and [`Communicator::listen`] blocks until a word is available. Any
//! number of speakers and listeners may use the same communicator; every
//! spoken word is received by exactly one listener.
//!
//! Internally the communicator has a single slot and three condition
//! variables sharing one lock:
//!
//! - `speakers`: speakers waiting for the slot to become free,
//! - `listeners`: listeners waiting for a word to arrive, and
//! - `pickup`: the speaker whose word sits in the slot, waiting for a
//!   listener to take it.
//!
//! Every deposit and every pickup wakes one thread, never all of them.

use crate::sync::Condition;
use nucleus::sync::{Lock, SpinLock};
use std::sync::Arc;

/// The unit of data exchanged through a [`Communicator`].
pub type Word = i32;

#[derive(Default)]
struct RendezvousSlot {
    occupied: bool,
    value: Word,
    /// Words deposited so far.
    deposited: u64,
    /// Words taken by listeners so far.
    delivered: u64,
}

/// A synchronous single-slot channel.
pub struct Communicator {
    lock: Arc<Lock>,
    speakers: Condition,
    listeners: Condition,
    pickup: Condition,
    // Only accessed with `lock` held.
    slot: SpinLock<RendezvousSlot>,
}

impl Default for Communicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator {
    /// Creates a communicator with an empty slot.
    pub fn new() -> Self {
        let lock = Arc::new(Lock::new());
        Self {
            speakers: Condition::new(lock.clone()),
            listeners: Condition::new(lock.clone()),
            pickup: Condition::new(lock.clone()),
            lock,
            slot: SpinLock::new(RendezvousSlot::default()),
        }
    }

    /// Hands `word` to a listener.
    ///
    /// Blocks until a listener has taken this word. The slot is handed to
    /// waiting speakers one at a time.
    pub fn speak(&self, word: Word) {
        self.lock.acquire();
        while self.with_slot(|slot| slot.occupied) {
            self.speakers.sleep();
        }

        let ticket = self.with_slot(|slot| {
            slot.occupied = true;
            slot.value = word;
            slot.deposited += 1;
            slot.deposited
        });
        log::trace!("Communicator: word #{ticket} deposited.");
        self.listeners.wake();

        while self.with_slot(|slot| slot.delivered < ticket) {
            self.pickup.sleep();
        }
        self.lock.release();
    }

    /// Waits for a speaker and returns the word it spoke.
    pub fn listen(&self) -> Word {
        self.lock.acquire();
        while !self.with_slot(|slot| slot.occupied) {
            self.listeners.sleep();
        }

        let word = self.with_slot(|slot| {
            slot.occupied = false;
            slot.delivered += 1;
            slot.value
        });
        self.pickup.wake();
        self.speakers.wake();
        self.lock.release();
        word
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut RendezvousSlot) -> R) -> R {
        let mut slot = self.slot.lock();
        let r = f(&mut slot);
        slot.unlock();
        r
    }
}
