// src/node/mod.rs

//! Logical tree nodes and proxies.
//!
//! - [`TreeNode`] is a plain node; its setters always apply and publish a
//!   [`TreeEvent`](crate::events::TreeEvent).
//! - [`NodeProxy`] aliases another node (bound) or owns an independent
//!   snapshot (detached).
//! - [`settle`] provides the barrier bound proxies wait on before reading a
//!   logical-result state that is mid-transition.

use std::time::Duration;

use chrono::{DateTime, Local};

use crate::types::{Logical, LogicalResultState, NodeId, NodeResult, ProcessingState, Progress};

pub mod proxy;
pub mod settle;
pub mod tree_node;

pub use proxy::{DEFAULT_SETTLE_TIMEOUT, NodeProxy, NodeRef, ProxyScope};
pub use settle::{SettleGate, SettleGuard};
pub use tree_node::TreeNode;

/// Every field a proxy mirrors.
///
/// Plain nodes keep their state in one of these; detached proxies own one as
/// their private copy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeSnapshot {
    pub result: Option<NodeResult>,
    pub logical: Logical,
    pub processing_state: ProcessingState,
    pub logical_result_state: LogicalResultState,
    pub last_run: Option<DateTime<Local>>,
    pub next_run: Option<DateTime<Local>>,
    pub next_run_info: Option<String>,
    pub referenced_node_name: String,
    pub referenced_node_id: NodeId,
    pub referenced_node_path: String,
    pub progress: Progress,
    /// Logical expression of a grouping node (job-scoped proxies only).
    pub logical_expression: Option<String>,
}

/// State access shared by plain nodes and proxies.
///
/// The external evaluator reads and writes node state only through this
/// trait, so it never needs to know whether it holds an alias.
pub trait LogicalNode: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn path(&self) -> &str;

    fn result(&self) -> Option<NodeResult>;
    fn set_result(&self, value: Option<NodeResult>);

    fn logical(&self) -> Logical;
    fn set_logical(&self, value: Logical);

    fn processing_state(&self) -> ProcessingState;
    fn set_processing_state(&self, value: ProcessingState);

    fn logical_result_state(&self) -> LogicalResultState;
    fn set_logical_result_state(&self, value: LogicalResultState);

    fn last_run(&self) -> Option<DateTime<Local>>;
    fn set_last_run(&self, value: Option<DateTime<Local>>);

    fn next_run(&self) -> Option<DateTime<Local>>;
    fn set_next_run(&self, value: Option<DateTime<Local>>);

    fn next_run_info(&self) -> Option<String>;
    fn set_next_run_info(&self, value: Option<String>);

    fn progress(&self) -> Progress;
    fn set_progress(&self, value: Progress);

    fn referenced_node_name(&self) -> String;
    fn referenced_node_id(&self) -> NodeId;
    fn referenced_node_path(&self) -> String;

    fn logical_expression(&self) -> Option<String> {
        None
    }

    /// Block until no logical-result transition is open, at most `timeout`.
    /// Returns `false` on timeout.
    fn wait_settled(&self, _timeout: Duration) -> bool {
        true
    }

    fn as_proxy(&self) -> Option<&NodeProxy> {
        None
    }

    /// Run `write` serialised against every other guarded write on this
    /// node. Bound proxies wrap their compare-then-write in it, so two
    /// aliases writing the same value emit one event. `write` must not
    /// write back through a proxy bound to this node.
    fn with_write_guard(&self, write: &mut dyn FnMut()) {
        write()
    }
}
