//! Session gate: the single "may I still act" flag for a coaching session
//!
//! Every worker holds an `Arc<SessionGate>` and checks `is_open()` immediately
//! before a side effect (outbound send, playback schedule). Closing is a
//! compare-and-swap so exactly one caller wins, and only the winner cancels
//! the shared token that stops the worker loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Debug)]
pub struct SessionGate {
    closed: AtomicBool,
    token: CancellationToken,
}

impl SessionGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            token: CancellationToken::new(),
        })
    }

    /// True until `close()` has succeeded once.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Transition false -> true. Returns `true` only for the caller that
    /// performed the transition; later calls are no-ops returning `false`.
    pub fn close(&self) -> bool {
        let won = self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.token.cancel();
        }
        won
    }

    /// Resolves once the gate has been closed.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_succeeds_exactly_once() {
        let gate = SessionGate::new();
        assert!(gate.is_open());
        assert!(gate.close());
        assert!(!gate.is_open());
        assert!(!gate.close());
        assert!(!gate.is_open());
    }

    #[test]
    fn concurrent_close_has_single_winner() {
        let gate = SessionGate::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.close())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn cancelled_resolves_after_close() {
        let gate = SessionGate::new();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.cancelled().await })
        };
        gate.close();
        waiter.await.unwrap();
    }
}
