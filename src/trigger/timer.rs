// src/trigger/timer.rs

//! Periodic timer backing a trigger.
//!
//! The timer is a Tokio task driven by a `watch` channel holding the next
//! deadline. `None` pauses it; a new `Some(deadline)` re-arms it. When the
//! deadline elapses the task runs `on_fired(None)` on the blocking pool and
//! waits for it before looking at the channel again, so timer fires of one
//! trigger never overlap.

use std::sync::Weak;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error};

use super::engine::TriggerEngine;

/// The timer task has exited and can no longer be armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerGone;

pub(crate) struct PeriodicTimer {
    control: watch::Sender<Option<Instant>>,
    task: JoinHandle<()>,
}

impl PeriodicTimer {
    pub(crate) fn spawn(handle: &Handle, first: Instant, engine: Weak<TriggerEngine>) -> Self {
        let (control, rx) = watch::channel(Some(first));
        let task = handle.spawn(timer_loop(rx, engine));
        Self { control, task }
    }

    pub(crate) fn arm(&self, at: Instant) -> Result<(), TimerGone> {
        self.control.send(Some(at)).map_err(|_| TimerGone)
    }

    pub(crate) fn pause(&self) {
        // Nothing to pause once the task is gone.
        let _ = self.control.send(None);
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn timer_loop(mut rx: watch::Receiver<Option<Instant>>, engine: Weak<TriggerEngine>) {
    loop {
        let deadline = *rx.borrow_and_update();

        let Some(at) = deadline else {
            if rx.changed().await.is_err() {
                break;
            }
            continue;
        };

        tokio::select! {
            _ = sleep_until(at) => {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let owner = engine.owner_id().to_string();
                if let Err(err) = tokio::task::spawn_blocking(move || engine.on_fired(None)).await {
                    error!(node = %owner, error = %err, "periodic trigger fire failed");
                }
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("periodic timer task finished");
}
