// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::events::TreeEventName;
use crate::node::DEFAULT_SETTLE_TIMEOUT;
use crate::plugin::CheckerPolicy;
use crate::types::{Admission, ReloadFingerprint};

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [config]
/// tree_name = "plant"
/// admission = "coalesce"
///
/// [logger]
/// path = "tracing.logger"
///
/// [node.disk]
/// checker = "command.checker"
/// parameters = "test -d /var/data"
/// trigger = "every S:30"
/// events = ["Exception"]
///
/// [node.report]
/// checker = "command.checker"
/// parameters = "echo ok"
/// watch = "disk"
/// events = ["Finished"]
///
/// [connector.disk_view]
/// target = "disk"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Optional `[logger]` sink receiving every routed tree event.
    #[serde(default)]
    pub logger: Option<LoggerSection>,

    /// All leaves from `[node.<name>]`, keyed by node name.
    #[serde(default)]
    pub node: BTreeMap<String, NodeConfig>,

    /// Proxies from `[connector.<name>]`, keyed by connector name.
    #[serde(default)]
    pub connector: BTreeMap<String, ConnectorConfig>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub logger: Option<LoggerSection>,
    pub node: BTreeMap<String, NodeConfig>,
    pub connector: BTreeMap<String, ConnectorConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            logger: raw.logger,
            node: raw.node,
            connector: raw.connector,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    #[serde(default = "default_tree_name")]
    pub tree_name: String,

    /// What happens when an element for the same (event, node) pair is
    /// already pending in the dispatch queue.
    #[serde(default)]
    pub admission: Admission,

    /// Upper bound for bound-proxy reads waiting on a logical-result
    /// transition.
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,

    /// Directory relative artifact paths and commands resolve against.
    /// Defaults to the directory holding the config file.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Event names outside the built-in set that nodes may subscribe to.
    #[serde(default)]
    pub custom_events: Vec<String>,
}

fn default_tree_name() -> String {
    "checktree".to_string()
}

fn default_settle_timeout_ms() -> u64 {
    DEFAULT_SETTLE_TIMEOUT.as_millis() as u64
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            tree_name: default_tree_name(),
            admission: Admission::default(),
            settle_timeout_ms: default_settle_timeout_ms(),
            base_dir: None,
            custom_events: Vec::new(),
        }
    }
}

impl ConfigSection {
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

/// `[logger]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggerSection {
    pub path: String,

    #[serde(default)]
    pub parameters: String,

    /// Fingerprint the artifact by content hash instead of mtime.
    #[serde(default)]
    pub use_hash: bool,
}

impl LoggerSection {
    pub fn fingerprint(&self) -> ReloadFingerprint {
        if self.use_hash {
            ReloadFingerprint::Hash
        } else {
            ReloadFingerprint::Mtime
        }
    }
}

/// `[node.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeConfig {
    /// Checker artifact path.
    pub checker: String,

    #[serde(default)]
    pub parameters: String,

    /// Optional `CanRun` artifact consulted before each run.
    #[serde(default)]
    pub gate: Option<String>,

    /// Optional `ValueModifier` artifact applied to the checker payload.
    #[serde(default)]
    pub modifier: Option<String>,

    /// Trigger reference string, scanned for a `UNIT:INTEGER` period.
    #[serde(default)]
    pub trigger: Option<String>,

    /// Optional artifact exporting a `Trigger` capability; replaces the
    /// built-in trigger for this node.
    #[serde(default)]
    pub trigger_plugin: Option<String>,

    /// Event names of the watched node that fire this node's trigger.
    #[serde(default)]
    pub events: Vec<String>,

    /// Node whose events are watched. Defaults to the node itself.
    #[serde(default)]
    pub watch: Option<String>,

    #[serde(default)]
    pub thread_locked: bool,

    #[serde(default)]
    pub lock_name: Option<String>,

    #[serde(default)]
    pub global: bool,

    #[serde(default)]
    pub mirror: bool,

    #[serde(default)]
    pub init_nodes: bool,

    /// Delay before runs that were started by a tree event.
    #[serde(default)]
    pub run_delay_ms: u64,
}

impl NodeConfig {
    pub fn event_names(&self) -> Vec<TreeEventName> {
        self.events
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect()
    }

    /// Name of the node whose events fire this one.
    pub fn watched<'a>(&'a self, own_name: &'a str) -> &'a str {
        self.watch.as_deref().unwrap_or(own_name)
    }

    pub fn reference(&self) -> &str {
        self.trigger.as_deref().unwrap_or("")
    }

    pub fn policy(&self, own_name: &str) -> CheckerPolicy {
        CheckerPolicy {
            is_mirror: self.mirror,
            init_nodes: self.init_nodes,
            triggered_run_delay: Duration::from_millis(self.run_delay_ms),
            referenced_node_name: Some(self.watched(own_name).to_string()),
            is_global: self.global,
            thread_locked: self.thread_locked,
            lock_name: self.lock_name.clone(),
        }
    }
}

/// `[connector.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConnectorConfig {
    /// Node or connector this proxy forwards to. For a detached connector it
    /// names the mother node; without it the tree root is the mother.
    #[serde(default)]
    pub target: Option<String>,

    /// Keep state locally instead of forwarding to `target`.
    #[serde(default)]
    pub detached: bool,

    /// Job scope: the proxy exposes the logical expression of what it
    /// references.
    #[serde(default)]
    pub job: bool,

    /// Expression held by a detached job connector. Implies `job`.
    #[serde(default)]
    pub expression: Option<String>,
}
