//! # Single-Response Guard
//!
//! A unit of work has several independent completion sources: the process
//! exiting, a stdin write failing, the watchdog firing, the client going away.
//! Each of them may try to finalize the unit of work. The first one wins and
//! every later attempt is a no-op.
//!
//! [`CompletionLatch`] is the bare check-and-set flag. [`Responder`] pairs a
//! latch with a one-shot channel so async tasks can race to deliver an outcome
//! to a single waiting caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Flips from open to claimed exactly once.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    claimed: AtomicBool,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the first caller only.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Sending half of a single-response channel.
///
/// Share it (behind an `Arc`) with every task that can finish the unit of work.
#[derive(Debug)]
pub struct Responder<T> {
    latch: CompletionLatch,
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

/// Create a responder and the receiver the caller awaits.
pub fn single_response<T>() -> (Responder<T>, oneshot::Receiver<T>) {
    let (sender, receiver) = oneshot::channel();
    let responder = Responder {
        latch: CompletionLatch::new(),
        sender: Mutex::new(Some(sender)),
    };
    (responder, receiver)
}

impl<T> Responder<T> {
    /// Deliver `outcome` if nobody has yet.
    ///
    /// Returns `false` when another source already finalized the unit of work
    /// (the outcome is dropped) or when the caller stopped listening.
    pub fn deliver(&self, outcome: T) -> bool {
        if !self.latch.try_claim() {
            return false;
        }

        let sender = match self.sender.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }
}
