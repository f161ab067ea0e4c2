// src/plugin/capability.rs

//! Contracts external plugins implement.

use std::fmt;

use crate::errors::PluginError;
use crate::events::TreeEvent;
use crate::types::{Logical, TreeParameters};

use super::checker::ProgressReporter;

/// Capabilities a plugin artifact can export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CanRun,
    Checker,
    ValueModifier,
    Logger,
    Trigger,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::CanRun => "CanRun",
            Capability::Checker => "Checker",
            Capability::ValueModifier => "ValueModifier",
            Capability::Logger => "Logger",
            Capability::Trigger => "Trigger",
        };
        f.write_str(s)
    }
}

/// Pre-run gate. May veto a run or rewrite the checker parameters in place.
pub trait CanRun: Send + Sync {
    fn can_run(
        &self,
        parameters: &mut String,
        tree: &TreeParameters,
        source: Option<&TreeEvent>,
    ) -> bool;
}

/// What a checker run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub logical: Logical,
    /// Free-form return payload (stdout, measured value, ...).
    pub payload: Option<String>,
}

impl CheckOutcome {
    pub fn new(logical: impl Into<Logical>) -> Self {
        Self {
            logical: logical.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// External process observer/controller sitting at a leaf of the tree.
///
/// `source` is the event that triggered the run, `None` for timer or manual
/// starts. Partial completion is reported through `progress`.
pub trait Checker: Send + Sync {
    fn run(
        &self,
        parameters: &str,
        tree: &TreeParameters,
        source: Option<&TreeEvent>,
        progress: &ProgressReporter,
    ) -> Result<CheckOutcome, PluginError>;
}

/// Value-transforming checker variant.
pub trait ValueModifier: Send + Sync {
    fn modify_value(&self, input: &str) -> Result<String, PluginError>;
}

/// External logging sink.
pub trait TreeLogger: Send + Sync {
    fn log(
        &self,
        logger_parameters: &str,
        tree: &TreeParameters,
        event: &TreeEvent,
        extra: &[String],
    ) -> Result<(), PluginError>;

    /// Release resources before the instance is dropped (shutdown or reload).
    fn dispose(&self) {}
}
