// src/node/proxy.rs

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, trace};

use crate::sync::lock;
use crate::types::{
    Logical, LogicalResultState, NodeId, NodeResult, ProcessingState, Progress, TreeParameters,
};

use super::{LogicalNode, NodeSnapshot};

/// Default bound on the settle wait before reading a logical-result state.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_millis(100);

/// What a proxy points at.
pub enum NodeRef {
    /// Live alias of a canonical node (which may itself be a proxy).
    Bound(Arc<dyn LogicalNode>),
    /// Independent private copy of every mirrored field.
    Detached(Mutex<NodeSnapshot>),
}

impl NodeRef {
    /// Single read dispatch point.
    fn read<T>(
        &self,
        bound: impl FnOnce(&dyn LogicalNode) -> T,
        detached: impl FnOnce(&NodeSnapshot) -> T,
    ) -> T {
        match self {
            NodeRef::Bound(target) => bound(target.as_ref()),
            NodeRef::Detached(snapshot) => detached(&*lock(snapshot)),
        }
    }

    /// Single write dispatch point.
    ///
    /// Bound: write through only if `value` differs from the target's current
    /// value. The compare and the write run under the origin's write guard,
    /// so concurrent aliases cannot both pass the compare. A bound proxy
    /// target is handed the write as is and suppresses against its own
    /// origin. Detached: overwrite the local field. Returns whether anything
    /// was written or forwarded.
    fn write<T: PartialEq>(
        &self,
        value: T,
        current: impl FnOnce(&dyn LogicalNode) -> T,
        apply: impl FnOnce(&dyn LogicalNode, T),
        field: impl FnOnce(&mut NodeSnapshot) -> &mut T,
    ) -> bool {
        match self {
            NodeRef::Bound(target) => match target.as_proxy() {
                Some(proxy) if !proxy.is_detached() => {
                    apply(target.as_ref(), value);
                    true
                }
                _ => {
                    let mut pending = Some((value, current, apply));
                    let mut written = false;
                    target.with_write_guard(&mut || {
                        if let Some((value, current, apply)) = pending.take() {
                            if current(target.as_ref()) != value {
                                apply(target.as_ref(), value);
                                written = true;
                            }
                        }
                    });
                    written
                }
            },
            NodeRef::Detached(snapshot) => {
                *field(&mut *lock(snapshot)) = value;
                true
            }
        }
    }
}

/// Whether a proxy aliases a single node or a whole job grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScope {
    Node,
    /// Also exposes the logical expression of the referenced grouping.
    Job,
}

/// Lightweight node aliasing another node.
///
/// The mode is fixed at construction: [`bound`](Self::bound) forwards every
/// read and write to the target, [`detached`](Self::detached) owns a
/// snapshot. Bound writes are suppressed when the value is unchanged so that
/// aliases never cause redundant downstream events; the suppression holds
/// across concurrent writers because the compare runs under the origin's
/// [`with_write_guard`](LogicalNode::with_write_guard). Writes made on the
/// origin directly bypass that guard.
pub struct NodeProxy {
    id: NodeId,
    name: String,
    path: String,
    scope: ProxyScope,
    node: NodeRef,
    settle_timeout: Duration,
    writes: Mutex<()>,
}

impl fmt::Debug for NodeProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match &self.node {
            NodeRef::Bound(target) => format!("bound -> {}", target.id()),
            NodeRef::Detached(_) => "detached".to_string(),
        };
        f.debug_struct("NodeProxy")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("mode", &mode)
            .finish_non_exhaustive()
    }
}

impl NodeProxy {
    /// Proxy forwarding to `target`.
    pub fn bound(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        path: impl Into<String>,
        target: Arc<dyn LogicalNode>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            scope: ProxyScope::Node,
            node: NodeRef::Bound(target),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            writes: Mutex::new(()),
        }
    }

    /// Proxy with its own state, created under `mother` in the tree described
    /// by `tree`.
    pub fn detached(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        mother: &dyn LogicalNode,
        tree: &TreeParameters,
    ) -> Self {
        let id = id.into();
        let name = name.into();
        let path = format!("{}/{}", mother.path(), name);

        debug!(
            tree = %tree.tree_name,
            node = %id,
            mother = %mother.id(),
            "creating detached proxy"
        );

        let snapshot = NodeSnapshot {
            referenced_node_name: name.clone(),
            referenced_node_id: id.clone(),
            referenced_node_path: path.clone(),
            progress: Progress::COMPLETE,
            ..NodeSnapshot::default()
        };

        Self {
            id,
            name,
            path,
            scope: ProxyScope::Node,
            node: NodeRef::Detached(Mutex::new(snapshot)),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            writes: Mutex::new(()),
        }
    }

    /// Switch to job scope (exposes the referenced grouping's expression).
    pub fn job_scoped(mut self) -> Self {
        self.scope = ProxyScope::Job;
        self
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn scope(&self) -> ProxyScope {
        self.scope
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.node, NodeRef::Detached(_))
    }

    pub fn node_ref(&self) -> &NodeRef {
        &self.node
    }

    /// Detached copy of this proxy's current view.
    pub fn snapshot(&self, id: impl Into<NodeId>) -> NodeProxy {
        let snapshot = NodeSnapshot {
            result: self.result(),
            logical: self.logical(),
            processing_state: self.processing_state(),
            logical_result_state: self.logical_result_state(),
            last_run: self.last_run(),
            next_run: self.next_run(),
            next_run_info: self.next_run_info(),
            referenced_node_name: self.referenced_node_name(),
            referenced_node_id: self.referenced_node_id(),
            referenced_node_path: self.referenced_node_path(),
            progress: Progress::COMPLETE,
            logical_expression: self.logical_expression(),
        };

        NodeProxy {
            id: id.into(),
            name: self.name.clone(),
            path: self.path.clone(),
            scope: self.scope,
            node: NodeRef::Detached(Mutex::new(snapshot)),
            settle_timeout: self.settle_timeout,
            writes: Mutex::new(()),
        }
    }

    /// Set the expression held by a detached job proxy. Ignored when bound.
    pub fn set_logical_expression(&self, value: Option<String>) {
        if let NodeRef::Detached(snapshot) = &self.node {
            lock(snapshot).logical_expression = value;
        }
    }

    /// Walk bound proxies down to the first non-proxy or detached origin.
    fn chain<T>(
        &self,
        on_proxy: impl FnOnce(&NodeProxy) -> T,
        on_origin: impl FnOnce(&dyn LogicalNode) -> T,
        detached: impl FnOnce(&NodeSnapshot) -> T,
    ) -> T {
        self.node.read(
            |target| match target.as_proxy() {
                Some(proxy) if !proxy.is_detached() => on_proxy(proxy),
                _ => on_origin(target),
            },
            detached,
        )
    }
}

impl LogicalNode for NodeProxy {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn result(&self) -> Option<NodeResult> {
        self.node.read(|t| t.result(), |s| s.result.clone())
    }

    fn set_result(&self, value: Option<NodeResult>) {
        self.node
            .write(value, |t| t.result(), |t, v| t.set_result(v), |s| &mut s.result);
    }

    fn logical(&self) -> Logical {
        self.node.read(|t| t.logical(), |s| s.logical)
    }

    fn set_logical(&self, value: Logical) {
        let written =
            self.node
                .write(value, |t| t.logical(), |t, v| t.set_logical(v), |s| &mut s.logical);
        trace!(proxy = %self.id, %value, written, "proxy set_logical");
    }

    fn processing_state(&self) -> ProcessingState {
        self.node.read(|t| t.processing_state(), |s| s.processing_state)
    }

    fn set_processing_state(&self, value: ProcessingState) {
        self.node.write(
            value,
            |t| t.processing_state(),
            |t, v| t.set_processing_state(v),
            |s| &mut s.processing_state,
        );
    }

    fn logical_result_state(&self) -> LogicalResultState {
        let timeout = self.settle_timeout;
        self.node.read(
            |t| {
                if !t.wait_settled(timeout) {
                    debug!(
                        proxy = %self.id,
                        target = %t.id(),
                        ?timeout,
                        "target still in transition after settle wait; reading anyway"
                    );
                }
                t.logical_result_state()
            },
            |s| s.logical_result_state,
        )
    }

    fn set_logical_result_state(&self, value: LogicalResultState) {
        self.node.write(
            value,
            |t| t.logical_result_state(),
            |t, v| t.set_logical_result_state(v),
            |s| &mut s.logical_result_state,
        );
    }

    fn last_run(&self) -> Option<DateTime<Local>> {
        self.node.read(|t| t.last_run(), |s| s.last_run)
    }

    fn set_last_run(&self, value: Option<DateTime<Local>>) {
        self.node
            .write(value, |t| t.last_run(), |t, v| t.set_last_run(v), |s| &mut s.last_run);
    }

    fn next_run(&self) -> Option<DateTime<Local>> {
        self.node.read(|t| t.next_run(), |s| s.next_run)
    }

    fn set_next_run(&self, value: Option<DateTime<Local>>) {
        self.node
            .write(value, |t| t.next_run(), |t, v| t.set_next_run(v), |s| &mut s.next_run);
    }

    fn next_run_info(&self) -> Option<String> {
        self.node.read(|t| t.next_run_info(), |s| s.next_run_info.clone())
    }

    fn set_next_run_info(&self, value: Option<String>) {
        self.node.write(
            value,
            |t| t.next_run_info(),
            |t, v| t.set_next_run_info(v),
            |s| &mut s.next_run_info,
        );
    }

    /// Detached proxies have no live source and always report complete.
    fn progress(&self) -> Progress {
        self.node.read(|t| t.progress(), |_| Progress::COMPLETE)
    }

    fn set_progress(&self, value: Progress) {
        self.node
            .write(value, |t| t.progress(), |t, v| t.set_progress(v), |s| &mut s.progress);
    }

    fn referenced_node_name(&self) -> String {
        self.chain(
            |p| p.referenced_node_name(),
            |origin| origin.name().to_string(),
            |s| s.referenced_node_name.clone(),
        )
    }

    fn referenced_node_id(&self) -> NodeId {
        self.chain(
            |p| p.referenced_node_id(),
            |origin| origin.id().to_string(),
            |s| s.referenced_node_id.clone(),
        )
    }

    fn referenced_node_path(&self) -> String {
        self.chain(
            |p| p.referenced_node_path(),
            |origin| origin.path().to_string(),
            |s| s.referenced_node_path.clone(),
        )
    }

    fn logical_expression(&self) -> Option<String> {
        if self.scope != ProxyScope::Job {
            return None;
        }
        self.node
            .read(|t| t.logical_expression(), |s| s.logical_expression.clone())
    }

    fn wait_settled(&self, timeout: Duration) -> bool {
        self.node.read(|t| t.wait_settled(timeout), |_| true)
    }

    fn as_proxy(&self) -> Option<&NodeProxy> {
        Some(self)
    }

    fn with_write_guard(&self, write: &mut dyn FnMut()) {
        match &self.node {
            NodeRef::Detached(_) => {
                let _serial = lock(&self.writes);
                write()
            }
            // Bound writes serialise on their origin.
            NodeRef::Bound(_) => write(),
        }
    }
}
