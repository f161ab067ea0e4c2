// src/engine/host.rs

//! Wiring a configured tree together.
//!
//! [`TreeHost::build`] turns a validated [`ConfigFile`] into nodes, leaf jobs,
//! connectors and triggers. [`TreeHost::start`] registers one callback per
//! trigger; each fire hands the leaf run to the tokio blocking pool, which
//! evaluates it and forwards the final event to the configured logger sink.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, ConnectorConfig};
use crate::errors::{Result, TreeError};
use crate::events::{EventDispatchQueue, EventRouter, TreeEvent, TreeEventName};
use crate::node::{LogicalNode, NodeProxy, TreeNode};
use crate::plugin::{
    CapabilityGate, CheckOutcome, CheckerHost, NamedLocks, PluginLoader, PluginSink,
};
use crate::sync::lock;
use crate::trigger::{self, CallbackId, NodeTrigger, TriggerEngine};
use crate::types::{LogicalResultState, TreeParameters};

use super::leaf::LeafJob;

/// Logger sink plus the parameters handed to every log call.
struct EventLog {
    sink: Option<PluginSink>,
    parameters: String,
    tree: TreeParameters,
}

impl EventLog {
    /// Log the event that closes a leaf run.
    fn record(&self, leaf: &LeafJob, outcome: &CheckOutcome) {
        let Some(sink) = &self.sink else {
            return;
        };
        let node = leaf.node();
        let name = match node.logical_result_state() {
            LogicalResultState::Done => TreeEventName::Finished,
            LogicalResultState::UserAbort => TreeEventName::Breaked,
            LogicalResultState::Fault | LogicalResultState::Timeout => TreeEventName::Exception,
            LogicalResultState::None | LogicalResultState::Start => TreeEventName::StateChanged,
        };
        let event = TreeEvent::new(name, node.id(), node.id());
        let mut extra = vec![outcome.logical.to_string()];
        extra.extend(outcome.payload.clone());

        if let Err(e) = sink.log(&self.parameters, &self.tree, &event, &extra) {
            warn!(node = %node.id(), error = %e, "logger sink failed");
        }
    }
}

struct LeafEntry {
    job: Arc<LeafJob>,
    trigger: Arc<dyn NodeTrigger>,
    /// Set when the trigger is the built-in engine registered with the router.
    engine: Option<Arc<TriggerEngine>>,
}

pub struct TreeHost {
    tree: TreeParameters,
    root: Arc<TreeNode>,
    router: Arc<EventRouter>,
    log: Arc<EventLog>,
    leaves: BTreeMap<String, LeafEntry>,
    connectors: BTreeMap<String, Arc<NodeProxy>>,
    started: Mutex<Vec<(Arc<dyn NodeTrigger>, CallbackId)>>,
}

impl std::fmt::Debug for TreeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeHost")
            .field("tree", &self.tree)
            .field("leaves", &self.leaves.keys().collect::<Vec<_>>())
            .field("connectors", &self.connectors.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TreeHost {
    /// Build the tree described by `cfg`. Nothing fires until [`start`].
    ///
    /// [`start`]: Self::start
    pub fn build(cfg: &ConfigFile, loader: Arc<dyn PluginLoader>) -> Result<Self> {
        let base_dir = cfg
            .config
            .base_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let tree = TreeParameters::new(cfg.config.tree_name.clone(), base_dir.clone());
        let tree_name = &cfg.config.tree_name;

        let queue = EventDispatchQueue::new(cfg.config.admission);
        let router = EventRouter::new(queue);
        let root = TreeNode::new("root", tree_name.clone(), tree_name.clone());

        let mut leaves = BTreeMap::new();
        for (name, node_cfg) in cfg.node.iter() {
            let node = TreeNode::new(name.clone(), name.clone(), format!("{tree_name}/{name}"));
            node.attach_sink(router.clone());

            let checker_path = artifact_path(&base_dir, &node_cfg.checker);
            let checker = loader.load_checker(&checker_path)?;
            let host = CheckerHost::new(
                node_cfg.checker.clone(),
                checker,
                node_cfg.policy(name),
                NamedLocks::global(),
            );
            let gate = CapabilityGate::new(
                Arc::clone(&loader),
                node_cfg.gate.as_deref().map(|p| artifact_path(&base_dir, p)),
            );

            let mut job = LeafJob::new(node, host, gate, node_cfg.parameters.clone(), tree.clone());
            if let Some(modifier) = &node_cfg.modifier {
                let modifier = loader.load_value_modifier(&artifact_path(&base_dir, modifier))?;
                job = job.with_modifier(modifier);
            }

            let (trigger, engine) = match &node_cfg.trigger_plugin {
                Some(plugin) => {
                    let trigger = loader.load_trigger(
                        &artifact_path(&base_dir, plugin),
                        name,
                        node_cfg.reference(),
                    )?;
                    (trigger, None)
                }
                None => {
                    let engine = TriggerEngine::new(
                        name.clone(),
                        node_cfg.watched(name),
                        node_cfg.event_names(),
                        node_cfg.reference(),
                    )?;
                    router.register(Arc::clone(&engine));
                    let trigger: Arc<dyn NodeTrigger> = engine.clone();
                    (trigger, Some(engine))
                }
            };

            debug!(node = %name, checker = %node_cfg.checker, "leaf built");
            leaves.insert(
                name.clone(),
                LeafEntry {
                    job: Arc::new(job),
                    trigger,
                    engine,
                },
            );
        }

        let mut connectors = BTreeMap::new();
        for name in cfg.connector.keys() {
            build_connector(cfg, name, &root, &leaves, &tree, &mut connectors)?;
        }

        let log = EventLog {
            sink: cfg.logger.as_ref().map(|logger| {
                PluginSink::new(
                    Arc::clone(&loader),
                    artifact_path(&base_dir, &logger.path),
                    logger.fingerprint(),
                )
            }),
            parameters: cfg
                .logger
                .as_ref()
                .map(|l| l.parameters.clone())
                .unwrap_or_default(),
            tree: tree.clone(),
        };

        info!(
            tree = %tree.tree_name,
            leaves = leaves.len(),
            connectors = connectors.len(),
            "tree built"
        );

        Ok(Self {
            tree,
            root,
            router,
            log: Arc::new(log),
            leaves,
            connectors,
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn tree(&self) -> &TreeParameters {
        &self.tree
    }

    pub fn root(&self) -> &Arc<TreeNode> {
        &self.root
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn leaf(&self, name: &str) -> Option<&Arc<LeafJob>> {
        self.leaves.get(name).map(|entry| &entry.job)
    }

    pub fn leaf_names(&self) -> impl Iterator<Item = &str> {
        self.leaves.keys().map(String::as_str)
    }

    pub fn connector(&self, name: &str) -> Option<&Arc<NodeProxy>> {
        self.connectors.get(name)
    }

    pub fn trigger(&self, name: &str) -> Option<&Arc<dyn NodeTrigger>> {
        self.leaves.get(name).map(|entry| &entry.trigger)
    }

    /// Any node or connector by name.
    pub fn node(&self, name: &str) -> Option<Arc<dyn LogicalNode>> {
        lookup(&self.leaves, &self.connectors, name)
    }

    /// Register a callback with every leaf trigger.
    ///
    /// Periodic triggers need a tokio runtime; call from inside one. Fires
    /// only dispatch: the run itself goes to the blocking pool of the runtime
    /// current here, so a slow checker never holds up other nodes. Without a
    /// runtime the run happens on the firing thread.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().ok();
        let mut started = lock(&self.started);
        for (name, entry) in self.leaves.iter() {
            let job = Arc::clone(&entry.job);
            let log = Arc::clone(&self.log);
            let weak_trigger: Weak<dyn NodeTrigger> = Arc::downgrade(&entry.trigger);
            let runtime = runtime.clone();

            let id = entry.trigger.start(trigger::callback(move |source| {
                let run = leaf_run(
                    Arc::clone(&job),
                    Arc::clone(&log),
                    weak_trigger.clone(),
                    source.cloned(),
                );
                match &runtime {
                    Some(handle) => {
                        handle.spawn_blocking(run);
                    }
                    None => run(),
                }
            }))?;

            publish_schedule(entry.job.node(), entry.trigger.as_ref());
            debug!(node = %name, callback = %id, "trigger started");
            started.push((Arc::clone(&entry.trigger), id));
        }
        info!(tree = %self.tree.tree_name, triggers = started.len(), "tree started");
        Ok(())
    }

    /// Evaluate every leaf once, in name order, on the calling thread.
    pub fn run_all_once(&self) -> Vec<(String, Option<CheckOutcome>)> {
        self.leaves
            .iter()
            .map(|(name, entry)| {
                let outcome = entry.job.run(None);
                if let Some(outcome) = &outcome {
                    self.log.record(&entry.job, outcome);
                }
                (name.clone(), outcome)
            })
            .collect()
    }

    /// Stop every started callback and release the logger.
    pub fn shutdown(&self) {
        let started = std::mem::take(&mut *lock(&self.started));
        for (trigger, id) in started {
            trigger.stop(id);
        }
        for entry in self.leaves.values() {
            if let Some(engine) = &entry.engine {
                self.router.unregister(engine);
            }
        }
        if let Some(sink) = &self.log.sink {
            sink.dispose();
        }
        info!(tree = %self.tree.tree_name, "tree stopped");
    }

    /// Human-readable outline used by `--dry-run`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "tree {} ({})", self.tree.tree_name, self.tree.base_dir.display());
        let _ = writeln!(out, "leaves ({}):", self.leaves.len());
        for (name, entry) in self.leaves.iter() {
            let info = entry.trigger.info();
            let _ = writeln!(out, "  - {name}");
            let _ = writeln!(out, "      checker: {}", entry.job.checker().path());
            if !entry.job.parameters().is_empty() {
                let _ = writeln!(out, "      parameters: {}", entry.job.parameters());
            }
            if let Some(path) = entry.job.gate().plugin_path() {
                let _ = writeln!(out, "      gate: {}", path.display());
            }
            let _ = writeln!(out, "      trigger: {}", info.description);
        }
        if !self.connectors.is_empty() {
            let _ = writeln!(out, "connectors ({}):", self.connectors.len());
            for (name, proxy) in self.connectors.iter() {
                let mode = if proxy.is_detached() { "detached" } else { "bound" };
                let _ = writeln!(
                    out,
                    "  - {name} [{mode}, {:?}] -> {}",
                    proxy.scope(),
                    proxy.referenced_node_path()
                );
            }
        }
        out
    }
}

impl Drop for TreeHost {
    fn drop(&mut self) {
        let started = std::mem::take(&mut *lock(&self.started));
        for (trigger, id) in started {
            trigger.stop(id);
        }
    }
}

/// One leaf evaluation as started by a trigger fire.
fn leaf_run(
    job: Arc<LeafJob>,
    log: Arc<EventLog>,
    trigger: Weak<dyn NodeTrigger>,
    source: Option<TreeEvent>,
) -> impl FnOnce() + Send + 'static {
    move || {
        if let Some(outcome) = job.run(source.as_ref()) {
            log.record(&job, &outcome);
        }
        if let Some(trigger) = trigger.upgrade() {
            publish_schedule(job.node(), trigger.as_ref());
        }
    }
}

fn publish_schedule(node: &TreeNode, trigger: &dyn NodeTrigger) {
    let info = trigger.info();
    node.set_next_run(info.next_run);
    node.set_next_run_info(Some(info.description));
}

fn artifact_path(base_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn lookup(
    leaves: &BTreeMap<String, LeafEntry>,
    connectors: &BTreeMap<String, Arc<NodeProxy>>,
    name: &str,
) -> Option<Arc<dyn LogicalNode>> {
    if let Some(entry) = leaves.get(name) {
        let node: Arc<dyn LogicalNode> = entry.job.node().clone();
        return Some(node);
    }
    connectors
        .get(name)
        .map(|proxy| Arc::clone(proxy) as Arc<dyn LogicalNode>)
}

/// Build `name` after whatever it targets. Validation guarantees the
/// connector graph is acyclic, so the recursion terminates.
fn build_connector(
    cfg: &ConfigFile,
    name: &str,
    root: &Arc<TreeNode>,
    leaves: &BTreeMap<String, LeafEntry>,
    tree: &TreeParameters,
    connectors: &mut BTreeMap<String, Arc<NodeProxy>>,
) -> Result<()> {
    if connectors.contains_key(name) {
        return Ok(());
    }
    let connector: &ConnectorConfig = cfg
        .connector
        .get(name)
        .ok_or_else(|| TreeError::UnknownNode(name.to_string()))?;

    let target = match &connector.target {
        Some(target) => {
            if cfg.connector.contains_key(target) {
                build_connector(cfg, target, root, leaves, tree, connectors)?;
            }
            Some(
                lookup(leaves, connectors, target)
                    .ok_or_else(|| TreeError::UnknownNode(target.clone()))?,
            )
        }
        None => None,
    };

    let settle = cfg.config.settle_timeout();
    let mut proxy = if connector.detached {
        let mother: Arc<dyn LogicalNode> = match target {
            Some(target) => target,
            None => root.clone(),
        };
        let proxy = NodeProxy::detached(name, name, mother.as_ref(), tree);
        if connector.expression.is_some() {
            proxy.set_logical_expression(connector.expression.clone());
        }
        proxy
    } else {
        let target = target.ok_or_else(|| {
            TreeError::Config(format!("connector '{name}' has no target"))
        })?;
        NodeProxy::bound(name, name, format!("{}/{name}", tree.tree_name), target)
    };

    if connector.job || connector.expression.is_some() {
        proxy = proxy.job_scoped();
    }

    debug!(connector = %name, detached = connector.detached, "connector built");
    connectors.insert(name.to_string(), Arc::new(proxy.with_settle_timeout(settle)));
    Ok(())
}
