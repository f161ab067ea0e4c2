// src/node/settle.rs

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::sync::lock;

/// Barrier around logical-result transitions.
///
/// Writers open a transition with [`begin`](Self::begin) and close it by
/// dropping the guard. Readers call [`wait`](Self::wait) to block until no
/// transition is open, bounded by a timeout.
#[derive(Debug, Default)]
pub struct SettleGate {
    open: Mutex<usize>,
    settled: Condvar,
}

/// Open transition; closes on drop.
#[must_use = "the transition closes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SettleGuard<'a> {
    gate: &'a SettleGate,
}

impl SettleGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> SettleGuard<'_> {
        *lock(&self.open) += 1;
        SettleGuard { gate: self }
    }

    pub fn is_settled(&self) -> bool {
        *lock(&self.open) == 0
    }

    /// Returns `true` if settled within `timeout`.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = lock(&self.open);
        let (_guard, result) = self
            .settled
            .wait_timeout_while(guard, timeout, |open| *open > 0)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        let mut open = lock(&self.gate.open);
        *open = open.saturating_sub(1);
        if *open == 0 {
            self.gate.settled.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn wait_returns_immediately_when_settled() {
        let gate = SettleGate::new();
        assert!(gate.wait(Duration::from_millis(1)));
    }

    #[test]
    fn wait_times_out_while_transition_open() {
        let gate = SettleGate::new();
        let _g = gate.begin();
        let started = Instant::now();
        assert!(!gate.wait(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_wakes_when_guard_drops() {
        let gate = Arc::new(SettleGate::new());
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                let g = gate.begin();
                tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(20));
                drop(g);
            });
        }
        rx.recv().unwrap();
        assert!(gate.wait(Duration::from_secs(2)));
        assert!(gate.is_settled());
    }
}
