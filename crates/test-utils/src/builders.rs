#![allow(dead_code)]

use std::collections::BTreeMap;

use checktree::config::{
    ConfigFile, ConfigSection, ConnectorConfig, LoggerSection, NodeConfig, RawConfigFile,
};
use checktree::types::Admission;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                logger: None,
                node: BTreeMap::new(),
                connector: BTreeMap::new(),
            },
        }
    }

    pub fn tree_name(mut self, name: &str) -> Self {
        self.config.config.tree_name = name.to_string();
        self
    }

    pub fn admission(mut self, admission: Admission) -> Self {
        self.config.config.admission = admission;
        self
    }

    pub fn settle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.config.settle_timeout_ms = ms;
        self
    }

    pub fn base_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.config.base_dir = Some(dir.into());
        self
    }

    pub fn with_logger(mut self, path: &str, use_hash: bool) -> Self {
        self.config.logger = Some(LoggerSection {
            path: path.to_string(),
            parameters: String::new(),
            use_hash,
        });
        self
    }

    pub fn with_node(mut self, name: &str, node: NodeConfig) -> Self {
        self.config.node.insert(name.to_string(), node);
        self
    }

    /// Bound connector forwarding to `target`.
    pub fn with_bound(mut self, name: &str, target: &str) -> Self {
        self.config.connector.insert(
            name.to_string(),
            ConnectorConfig {
                target: Some(target.to_string()),
                ..ConnectorConfig::default()
            },
        );
        self
    }

    /// Detached connector under `mother` (tree root when `None`).
    pub fn with_detached(mut self, name: &str, mother: Option<&str>) -> Self {
        self.config.connector.insert(
            name.to_string(),
            ConnectorConfig {
                target: mother.map(str::to_string),
                detached: true,
                ..ConnectorConfig::default()
            },
        );
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `NodeConfig`.
pub struct NodeConfigBuilder {
    node: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new(checker: &str) -> Self {
        Self {
            node: NodeConfig {
                checker: checker.to_string(),
                ..NodeConfig::default()
            },
        }
    }

    pub fn parameters(mut self, parameters: &str) -> Self {
        self.node.parameters = parameters.to_string();
        self
    }

    pub fn trigger(mut self, reference: &str) -> Self {
        self.node.trigger = Some(reference.to_string());
        self
    }

    pub fn on(mut self, event: &str) -> Self {
        self.node.events.push(event.to_string());
        self
    }

    pub fn watch(mut self, node: &str) -> Self {
        self.node.watch = Some(node.to_string());
        self
    }

    pub fn gate(mut self, path: &str) -> Self {
        self.node.gate = Some(path.to_string());
        self
    }

    pub fn modifier(mut self, path: &str) -> Self {
        self.node.modifier = Some(path.to_string());
        self
    }

    pub fn thread_locked(mut self, lock_name: Option<&str>) -> Self {
        self.node.thread_locked = true;
        self.node.lock_name = lock_name.map(str::to_string);
        self
    }

    pub fn run_delay_ms(mut self, ms: u64) -> Self {
        self.node.run_delay_ms = ms;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.node
    }
}
