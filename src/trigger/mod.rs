// src/trigger/mod.rs

//! Per-node triggers.
//!
//! - [`interval`] parses the `UNIT:INTEGER` period out of a reference string.
//! - [`engine`] holds [`TriggerEngine`], the event/periodic trigger.
//! - [`timer`] is the Tokio task behind periodic triggers.
//!
//! [`NodeTrigger`] is the seam for externally supplied triggers; the built-in
//! engine implements it too.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::errors::Result;
use crate::events::TreeEvent;

pub mod engine;
pub mod interval;
mod timer;

pub use engine::TriggerEngine;
pub use interval::parse_interval;

/// Handler invoked when a trigger fires. `None` means a timer fire.
pub type TriggerCallback = Arc<dyn Fn(Option<&TreeEvent>) + Send + Sync>;

/// Wrap a closure as a [`TriggerCallback`].
pub fn callback<F>(f: F) -> TriggerCallback
where
    F: Fn(Option<&TreeEvent>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identity of one registered callback, returned by `start` and consumed by
/// `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub(crate) u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read-only view of a trigger's schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerInfo {
    /// Next periodic fire; `None` if non-periodic or the timer is not running.
    pub next_run: Option<DateTime<Local>>,
    pub description: String,
}

/// Contract every trigger (built-in or plugin) satisfies.
pub trait NodeTrigger: Send + Sync {
    fn start(&self, callback: TriggerCallback) -> Result<CallbackId>;
    fn stop(&self, id: CallbackId) -> bool;
    fn info(&self) -> TriggerInfo;
}
