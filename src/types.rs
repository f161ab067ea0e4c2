// src/types.rs

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

/// Canonical node identifier type used throughout the tree.
pub type NodeId = String;

/// Tri-state outcome of a checker run or a combined group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Logical {
    True,
    False,
    #[default]
    Indeterminate,
}

impl Logical {
    pub fn as_option(self) -> Option<bool> {
        match self {
            Logical::True => Some(true),
            Logical::False => Some(false),
            Logical::Indeterminate => None,
        }
    }
}

impl From<Option<bool>> for Logical {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Logical::True,
            Some(false) => Logical::False,
            None => Logical::Indeterminate,
        }
    }
}

impl From<bool> for Logical {
    fn from(value: bool) -> Self {
        if value { Logical::True } else { Logical::False }
    }
}

impl fmt::Display for Logical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Logical::True => f.write_str("true"),
            Logical::False => f.write_str("false"),
            Logical::Indeterminate => f.write_str("null"),
        }
    }
}

/// Processing state of a node, independent of its logical value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingState {
    #[default]
    Idle,
    /// Triggered, but held back (gate veto, run delay, lock).
    Waiting,
    Working,
    Finished,
}

/// How the last logical evaluation of a node ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogicalResultState {
    #[default]
    None,
    Start,
    Done,
    Fault,
    Timeout,
    UserAbort,
}

/// Result object of the last checker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResult {
    pub node_id: NodeId,
    pub logical: Logical,
    pub state: LogicalResultState,
    /// Free-form payload returned by the checker (stdout, value, etc.).
    pub payload: Option<String>,
}

/// Progress counters reported by a checker (`finished` of `total`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub finished: u32,
    pub total: u32,
}

impl Progress {
    pub const COMPLETE: Progress = Progress {
        finished: 100,
        total: 100,
    };

    pub const NONE: Progress = Progress {
        finished: 0,
        total: 100,
    };

    pub fn is_complete(&self) -> bool {
        self.finished >= self.total
    }
}

impl Default for Progress {
    fn default() -> Self {
        Progress::NONE
    }
}

/// Tree-wide parameters handed to every plugin call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeParameters {
    pub tree_name: String,
    /// Base directory against which relative artifact paths are resolved.
    pub base_dir: PathBuf,
}

impl TreeParameters {
    pub fn new(tree_name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            tree_name: tree_name.into(),
            base_dir: base_dir.into(),
        }
    }
}

/// Admission policy of the event dispatch queue when an element for the same
/// (event, node) pair is already pending.
///
/// - `Suffix`: search the next free `(counter)` suffix and enqueue anyway.
/// - `Coalesce`: drop the new element; at most one pending element per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Admission {
    #[default]
    Suffix,
    Coalesce,
}

impl FromStr for Admission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "suffix" => Ok(Admission::Suffix),
            "coalesce" => Ok(Admission::Coalesce),
            other => Err(format!(
                "invalid admission: {other} (expected \"suffix\" or \"coalesce\")"
            )),
        }
    }
}

/// How a hot-reloadable artifact is fingerprinted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadFingerprint {
    /// Compare file modification times.
    #[default]
    Mtime,
    /// Compare a content hash (survives touch without change).
    Hash,
}
