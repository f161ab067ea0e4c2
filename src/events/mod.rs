// src/events/mod.rs

//! Tree events and their asynchronous delivery to triggers.
//!
//! - [`TreeEvent`] is the immutable envelope a node emits when its state
//!   changes.
//! - [`queue`] holds the per-tree [`EventDispatchQueue`] that turns
//!   synchronous event production into non-reentrant trigger firing.
//! - [`router`] maps published events onto the triggers subscribed to them.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::types::NodeId;

pub mod queue;
pub mod router;

pub use queue::{ComposedQueueElement, EventDispatchQueue, ScheduleOutcome};
pub use router::EventRouter;

/// Name of an internal tree event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TreeEventName {
    Started,
    Finished,
    Breaked,
    Exception,
    LogicalChanged,
    ResultChanged,
    StateChanged,
    ProgressChanged,
    Custom(String),
}

impl TreeEventName {
    /// Token used in queue keys and configuration.
    pub fn as_str(&self) -> &str {
        match self {
            TreeEventName::Started => "Started",
            TreeEventName::Finished => "Finished",
            TreeEventName::Breaked => "Breaked",
            TreeEventName::Exception => "Exception",
            TreeEventName::LogicalChanged => "LogicalChanged",
            TreeEventName::ResultChanged => "ResultChanged",
            TreeEventName::StateChanged => "StateChanged",
            TreeEventName::ProgressChanged => "ProgressChanged",
            TreeEventName::Custom(s) => s,
        }
    }

    /// Name shown to users in trigger descriptions.
    pub fn display_name(&self) -> &str {
        match self {
            TreeEventName::Started => "started",
            TreeEventName::Finished => "finished",
            TreeEventName::Breaked => "aborted",
            TreeEventName::Exception => "exception",
            TreeEventName::LogicalChanged => "logical value changed",
            TreeEventName::ResultChanged => "result changed",
            TreeEventName::StateChanged => "state changed",
            TreeEventName::ProgressChanged => "progress",
            TreeEventName::Custom(s) => s,
        }
    }
}

static KNOWN_NAMES: [TreeEventName; 8] = [
    TreeEventName::Started,
    TreeEventName::Finished,
    TreeEventName::Breaked,
    TreeEventName::Exception,
    TreeEventName::LogicalChanged,
    TreeEventName::ResultChanged,
    TreeEventName::StateChanged,
    TreeEventName::ProgressChanged,
];

impl TreeEventName {
    /// Match `s` against the built-in names, ignoring ASCII case and
    /// surrounding whitespace. Never yields `Custom`.
    pub fn known(s: &str) -> Option<Self> {
        let s = s.trim();
        KNOWN_NAMES
            .iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s))
            .cloned()
    }

    pub fn known_tokens() -> impl Iterator<Item = &'static str> {
        KNOWN_NAMES.iter().map(TreeEventName::as_str)
    }
}

/// Built-in names win; anything else is taken verbatim as `Custom`.
/// Configuration only admits custom names listed in `[config].custom_events`.
impl FromStr for TreeEventName {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::known(s).unwrap_or_else(|| TreeEventName::Custom(s.trim().to_string())))
    }
}

impl fmt::Display for TreeEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope emitted when a node's state changes.
///
/// Immutable once built; shared as `Arc<TreeEvent>` between the producer,
/// the queue and the triggers that read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEvent {
    name: TreeEventName,
    source_id: NodeId,
    sender_id: NodeId,
    emitted_at: DateTime<Local>,
}

impl TreeEvent {
    pub fn new(
        name: TreeEventName,
        source_id: impl Into<NodeId>,
        sender_id: impl Into<NodeId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            source_id: source_id.into(),
            sender_id: sender_id.into(),
            emitted_at: Local::now(),
        })
    }

    pub fn name(&self) -> &TreeEventName {
        &self.name
    }

    /// Node whose state changed.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Node that forwarded the event (differs from the source for proxies).
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn emitted_at(&self) -> DateTime<Local> {
        self.emitted_at
    }
}

/// Receiver of events published by nodes.
pub trait TreeEventSink: Send + Sync {
    fn publish(&self, event: Arc<TreeEvent>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_parse_and_unknown_become_custom() {
        let n: TreeEventName = "LogicalChanged".parse().unwrap();
        assert_eq!(n, TreeEventName::LogicalChanged);

        let n: TreeEventName = "finished".parse().unwrap();
        assert_eq!(n, TreeEventName::Finished);
        assert_eq!(TreeEventName::known(" STATECHANGED "), Some(TreeEventName::StateChanged));
        assert_eq!(TreeEventName::known("Finshed"), None);

        let n: TreeEventName = " DiskFull ".parse().unwrap();
        assert_eq!(n, TreeEventName::Custom("DiskFull".into()));
        assert_eq!(n.as_str(), "DiskFull");
    }
}
