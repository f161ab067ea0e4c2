// src/engine/leaf.rs

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::events::TreeEvent;
use crate::node::{LogicalNode, TreeNode};
use crate::plugin::{CapabilityGate, CheckOutcome, CheckerHost, ValueModifier};
use crate::types::{
    Logical, LogicalResultState, NodeResult, ProcessingState, Progress, TreeParameters,
};

/// One checker leaf: its node, the checker host and the optional gate.
pub struct LeafJob {
    node: Arc<TreeNode>,
    checker: CheckerHost,
    gate: CapabilityGate,
    modifier: Option<Arc<dyn ValueModifier>>,
    parameters: String,
    tree: TreeParameters,
}

impl fmt::Debug for LeafJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafJob")
            .field("node", &self.node.id())
            .field("checker", &self.checker.path())
            .field("gate", &self.gate)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl LeafJob {
    /// Couple a node with its checker. Checker progress reports are written
    /// to the node as they arrive.
    pub fn new(
        node: Arc<TreeNode>,
        checker: CheckerHost,
        gate: CapabilityGate,
        parameters: impl Into<String>,
        tree: TreeParameters,
    ) -> Self {
        let target = Arc::downgrade(&node);
        checker.subscribe_progress(Arc::new(move |progress: Progress| {
            if let Some(node) = target.upgrade() {
                node.set_progress(progress);
            }
        }));

        Self {
            node,
            checker,
            gate,
            modifier: None,
            parameters: parameters.into(),
            tree,
        }
    }

    pub fn with_modifier(mut self, modifier: Arc<dyn ValueModifier>) -> Self {
        self.modifier = Some(modifier);
        self
    }

    pub fn node(&self) -> &Arc<TreeNode> {
        &self.node
    }

    pub fn checker(&self) -> &CheckerHost {
        &self.checker
    }

    pub fn gate(&self) -> &CapabilityGate {
        &self.gate
    }

    pub fn parameters(&self) -> &str {
        &self.parameters
    }

    /// Evaluate the leaf once.
    ///
    /// Returns `None` when the gate vetoed the run; the node is then left in
    /// `Waiting`. Checker failures and panics end the run with a `Fault`
    /// state and an indeterminate logical value.
    pub fn run(&self, source: Option<&TreeEvent>) -> Option<CheckOutcome> {
        let node = &self.node;
        let mut parameters = self.parameters.clone();

        if !self.gate.can_run(&mut parameters, &self.tree, source) {
            debug!(node = %node.id(), "run vetoed by gate");
            node.set_processing_state(ProcessingState::Waiting);
            return None;
        }

        node.set_processing_state(ProcessingState::Working);
        node.set_logical_result_state(LogicalResultState::Start);
        node.set_last_run(Some(Local::now()));

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.checker.run(&parameters, &self.tree, source)
        }));

        let (outcome, state) = match result {
            Ok(Ok(outcome)) => (self.modify(outcome), LogicalResultState::Done),
            Ok(Err(e)) => {
                warn!(node = %node.id(), error = %e, "checker failed");
                (
                    CheckOutcome::new(Logical::Indeterminate).with_payload(e.to_string()),
                    LogicalResultState::Fault,
                )
            }
            Err(_) => {
                warn!(node = %node.id(), "checker panicked");
                (
                    CheckOutcome::new(Logical::Indeterminate).with_payload("checker panicked"),
                    LogicalResultState::Fault,
                )
            }
        };

        if self.checker.take_invalid() {
            debug!(node = %node.id(), "first global-lock run; dependent views are stale");
        }

        node.set_logical(outcome.logical);
        node.set_result(Some(NodeResult {
            node_id: node.id().to_string(),
            logical: outcome.logical,
            state,
            payload: outcome.payload.clone(),
        }));
        node.set_progress(Progress::COMPLETE);
        node.set_processing_state(ProcessingState::Finished);
        node.set_logical_result_state(state);

        info!(
            node = %node.id(),
            logical = %outcome.logical,
            state = ?state,
            triggered_by = source.map(|e| e.name().as_str()).unwrap_or("timer"),
            "leaf evaluated"
        );
        Some(outcome)
    }

    fn modify(&self, mut outcome: CheckOutcome) -> CheckOutcome {
        let (Some(modifier), Some(payload)) = (&self.modifier, &outcome.payload) else {
            return outcome;
        };
        match modifier.modify_value(payload) {
            Ok(value) => outcome.payload = Some(value),
            Err(e) => warn!(
                node = %self.node.id(),
                error = %e,
                "value modifier failed; keeping raw payload"
            ),
        }
        outcome
    }
}
