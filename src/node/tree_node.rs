// src/node/tree_node.rs

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::trace;

use crate::events::{TreeEvent, TreeEventName, TreeEventSink};
use crate::sync::{lock, read, write};
use crate::types::{Logical, LogicalResultState, NodeId, NodeResult, ProcessingState, Progress};

use super::settle::{SettleGate, SettleGuard};
use super::{LogicalNode, NodeSnapshot};

/// Plain (non-proxy) tree node.
///
/// Setters apply unconditionally and publish an event through the node's
/// sink, if one is attached. Write suppression is the proxies' job.
pub struct TreeNode {
    id: NodeId,
    name: String,
    path: String,
    state: RwLock<NodeSnapshot>,
    sink: RwLock<Option<Arc<dyn TreeEventSink>>>,
    settle: SettleGate,
    writes: Mutex<()>,
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("path", &self.path)
            .field("state", &*read(&self.state))
            .finish_non_exhaustive()
    }
}

impl TreeNode {
    pub fn new(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Arc<Self> {
        let id = id.into();
        let name = name.into();
        let path = path.into();

        let state = NodeSnapshot {
            referenced_node_name: name.clone(),
            referenced_node_id: id.clone(),
            referenced_node_path: path.clone(),
            ..NodeSnapshot::default()
        };

        Arc::new(Self {
            id,
            name,
            path,
            state: RwLock::new(state),
            sink: RwLock::new(None),
            settle: SettleGate::new(),
            writes: Mutex::new(()),
        })
    }

    /// A grouping node carrying a logical expression over its children.
    pub fn job(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        path: impl Into<String>,
        expression: impl Into<String>,
    ) -> Arc<Self> {
        let node = Self::new(id, name, path);
        write(&node.state).logical_expression = Some(expression.into());
        node
    }

    pub fn attach_sink(&self, sink: Arc<dyn TreeEventSink>) {
        *write(&self.sink) = Some(sink);
    }

    /// Open a logical-result transition. Bound proxies reading the
    /// logical-result state wait until every open guard is dropped.
    pub fn begin_transition(&self) -> SettleGuard<'_> {
        self.settle.begin()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        read(&self.state).clone()
    }

    fn emit(&self, name: TreeEventName) {
        let sink = read(&self.sink).clone();
        if let Some(sink) = sink {
            trace!(node = %self.id, event = %name, "publishing tree event");
            sink.publish(TreeEvent::new(name, self.id.clone(), self.id.clone()));
        }
    }

    fn update<T>(&self, value: T, field: impl FnOnce(&mut NodeSnapshot) -> &mut T) {
        *field(&mut *write(&self.state)) = value;
    }
}

impl LogicalNode for TreeNode {
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
        read(&self.state).result.clone()
    }

    fn set_result(&self, value: Option<NodeResult>) {
        self.update(value, |s| &mut s.result);
        self.emit(TreeEventName::ResultChanged);
    }

    fn logical(&self) -> Logical {
        read(&self.state).logical
    }

    fn set_logical(&self, value: Logical) {
        self.update(value, |s| &mut s.logical);
        self.emit(TreeEventName::LogicalChanged);
    }

    fn processing_state(&self) -> ProcessingState {
        read(&self.state).processing_state
    }

    fn set_processing_state(&self, value: ProcessingState) {
        self.update(value, |s| &mut s.processing_state);
        let name = match value {
            ProcessingState::Working => TreeEventName::Started,
            _ => TreeEventName::StateChanged,
        };
        self.emit(name);
    }

    fn logical_result_state(&self) -> LogicalResultState {
        read(&self.state).logical_result_state
    }

    fn set_logical_result_state(&self, value: LogicalResultState) {
        let _transition = self.settle.begin();
        self.update(value, |s| &mut s.logical_result_state);
        let name = match value {
            LogicalResultState::Done => TreeEventName::Finished,
            LogicalResultState::Fault | LogicalResultState::Timeout => TreeEventName::Exception,
            LogicalResultState::UserAbort => TreeEventName::Breaked,
            LogicalResultState::None | LogicalResultState::Start => TreeEventName::StateChanged,
        };
        self.emit(name);
    }

    fn last_run(&self) -> Option<DateTime<Local>> {
        read(&self.state).last_run
    }

    fn set_last_run(&self, value: Option<DateTime<Local>>) {
        self.update(value, |s| &mut s.last_run);
    }

    fn next_run(&self) -> Option<DateTime<Local>> {
        read(&self.state).next_run
    }

    fn set_next_run(&self, value: Option<DateTime<Local>>) {
        self.update(value, |s| &mut s.next_run);
    }

    fn next_run_info(&self) -> Option<String> {
        read(&self.state).next_run_info.clone()
    }

    fn set_next_run_info(&self, value: Option<String>) {
        self.update(value, |s| &mut s.next_run_info);
    }

    fn progress(&self) -> Progress {
        read(&self.state).progress
    }

    fn set_progress(&self, value: Progress) {
        self.update(value, |s| &mut s.progress);
        self.emit(TreeEventName::ProgressChanged);
    }

    fn referenced_node_name(&self) -> String {
        self.name.clone()
    }

    fn referenced_node_id(&self) -> NodeId {
        self.id.clone()
    }

    fn referenced_node_path(&self) -> String {
        self.path.clone()
    }

    fn logical_expression(&self) -> Option<String> {
        read(&self.state).logical_expression.clone()
    }

    fn wait_settled(&self, timeout: Duration) -> bool {
        self.settle.wait(timeout)
    }

    fn with_write_guard(&self, write: &mut dyn FnMut()) {
        let _serial = lock(&self.writes);
        write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<TreeEventName>>);

    impl TreeEventSink for Recording {
        fn publish(&self, event: Arc<TreeEvent>) {
            self.0.lock().unwrap().push(event.name().clone());
        }
    }

    #[test]
    fn setters_always_publish_even_for_same_value() {
        let node = TreeNode::new("1", "a", "root/a");
        let sink = Arc::new(Recording::default());
        node.attach_sink(sink.clone());

        node.set_logical(Logical::True);
        node.set_logical(Logical::True);
        node.set_logical_result_state(LogicalResultState::Done);

        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![
                TreeEventName::LogicalChanged,
                TreeEventName::LogicalChanged,
                TreeEventName::Finished
            ]
        );
        assert!(node.wait_settled(Duration::from_millis(1)));
    }

    #[test]
    fn plain_node_references_itself() {
        let node = TreeNode::job("7", "build", "root/build", "a AND b");
        assert_eq!(node.referenced_node_id(), "7");
        assert_eq!(node.referenced_node_path(), "root/build");
        assert_eq!(node.logical_expression().as_deref(), Some("a AND b"));
    }
}
