// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, TreeError};
use crate::events::TreeEventName;
use crate::trigger::parse_interval;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TreeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_nodes(cfg)?;
    validate_logger(cfg)?;
    validate_nodes(cfg)?;
    validate_connectors(cfg)?;
    validate_reference_graph(cfg)?;
    Ok(())
}

fn ensure_has_nodes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.node.is_empty() {
        return Err(TreeError::Config(
            "config must contain at least one [node.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_logger(cfg: &RawConfigFile) -> Result<()> {
    if let Some(logger) = &cfg.logger {
        if logger.path.trim().is_empty() {
            return Err(TreeError::Config("[logger].path must not be empty".to_string()));
        }
    }
    Ok(())
}

fn validate_nodes(cfg: &RawConfigFile) -> Result<()> {
    for (name, node) in cfg.node.iter() {
        if node.checker.trim().is_empty() {
            return Err(TreeError::Config(format!(
                "node '{}' has an empty `checker` path",
                name
            )));
        }

        if let Some(blank) = node.events.iter().find(|e| e.trim().is_empty()) {
            return Err(TreeError::Config(format!(
                "node '{}' lists an empty event name {:?} in `events`",
                name, blank
            )));
        }

        for event in node.events.iter() {
            let declared = cfg.config.custom_events.iter().any(|c| c.trim() == event.trim());
            if TreeEventName::known(event).is_none() && !declared {
                let known: Vec<&str> = TreeEventName::known_tokens().collect();
                return Err(TreeError::Config(format!(
                    "node '{}' subscribes to unknown event '{}'; known events are {} \
                     (declare others in [config].custom_events)",
                    name,
                    event,
                    known.join(", ")
                )));
            }
        }

        parse_interval(node.reference())
            .map_err(|e| TreeError::Config(format!("node '{}': {}", name, e)))?;

        if let Some(watch) = &node.watch {
            if !cfg.node.contains_key(watch) {
                return Err(TreeError::Config(format!(
                    "node '{}' watches unknown node '{}'",
                    name, watch
                )));
            }
        }

        if node.lock_name.is_some() && !node.thread_locked {
            return Err(TreeError::Config(format!(
                "node '{}' sets `lock_name` without `thread_locked = true`",
                name
            )));
        }
    }
    Ok(())
}

fn validate_connectors(cfg: &RawConfigFile) -> Result<()> {
    for (name, connector) in cfg.connector.iter() {
        if cfg.node.contains_key(name) {
            return Err(TreeError::Config(format!(
                "connector '{}' has the same name as a node",
                name
            )));
        }

        if connector.expression.is_some() && !connector.detached {
            return Err(TreeError::Config(format!(
                "connector '{}' sets `expression` but is not detached; \
                 a bound connector reads it from its target",
                name
            )));
        }

        match &connector.target {
            None if !connector.detached => {
                return Err(TreeError::Config(format!(
                    "connector '{}' needs a `target` or `detached = true`",
                    name
                )));
            }
            Some(target)
                if !cfg.node.contains_key(target) && !cfg.connector.contains_key(target) =>
            {
                return Err(TreeError::UnknownNode(format!(
                    "connector '{}' targets unknown '{}'",
                    name, target
                )));
            }
            Some(target) if target == name => {
                return Err(TreeError::ReferenceCycle(format!(
                    "connector '{}' targets itself",
                    name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_reference_graph(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: target -> connector, so a toposort fails exactly when
    // a chain of bound proxies would never reach a real node.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.node.keys().chain(cfg.connector.keys()) {
        graph.add_node(name.as_str());
    }

    for (name, connector) in cfg.connector.iter() {
        if let Some(target) = &connector.target {
            graph.add_edge(target.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TreeError::ReferenceCycle(format!(
            "cycle detected between connectors involving '{}'",
            cycle.node_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_str;

    fn validate(toml: &str) -> Result<ConfigFile> {
        ConfigFile::try_from(load_from_str(toml)?)
    }

    #[test]
    fn minimal_config_is_valid() {
        let cfg = validate(
            r#"
            [node.a]
            checker = "command.checker"
            parameters = "true"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.config.tree_name, "checktree");
        assert_eq!(cfg.config.settle_timeout_ms, 100);
        assert!(cfg.logger.is_none());
    }

    #[test]
    fn empty_config_is_rejected() {
        assert!(matches!(validate(""), Err(TreeError::Config(_))));
    }

    #[test]
    fn bad_interval_unit_is_a_config_error() {
        let err = validate(
            r#"
            [node.a]
            checker = "command.checker"
            trigger = "every W:3"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, TreeError::Config(msg) if msg.contains("node 'a'")));
    }

    #[test]
    fn connector_cycle_is_rejected() {
        let err = validate(
            r#"
            [node.a]
            checker = "command.checker"

            [connector.x]
            target = "y"

            [connector.y]
            target = "x"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, TreeError::ReferenceCycle(_)));
    }

    #[test]
    fn unknown_watch_and_target_are_rejected() {
        assert!(validate(
            r#"
            [node.a]
            checker = "command.checker"
            watch = "ghost"
            "#,
        )
        .is_err());

        assert!(matches!(
            validate(
                r#"
                [node.a]
                checker = "command.checker"

                [connector.x]
                target = "ghost"
                "#,
            ),
            Err(TreeError::UnknownNode(_))
        ));
    }

    #[test]
    fn detached_connector_needs_no_target() {
        let cfg = validate(
            r#"
            [node.a]
            checker = "command.checker"

            [connector.frozen]
            detached = true
            "#,
        )
        .unwrap();
        assert!(cfg.connector["frozen"].detached);
    }

    #[test]
    fn event_names_match_known_names_ignoring_case() {
        let cfg = validate(
            r#"
            [node.a]
            checker = "command.checker"

            [node.b]
            checker = "command.checker"
            watch = "a"
            events = ["finished", "LOGICALCHANGED"]
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.node["b"].event_names(),
            vec![TreeEventName::Finished, TreeEventName::LogicalChanged]
        );
    }

    #[test]
    fn misspelled_event_name_is_rejected() {
        let err = validate(
            r#"
            [node.a]
            checker = "command.checker"

            [node.b]
            checker = "command.checker"
            watch = "a"
            events = ["finished", "Finshed"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, TreeError::Config(msg) if msg.contains("'Finshed'")));
    }

    #[test]
    fn declared_custom_event_is_accepted() {
        let cfg = validate(
            r#"
            [config]
            custom_events = ["DiskFull"]

            [node.a]
            checker = "command.checker"
            events = ["DiskFull"]
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.node["a"].event_names(),
            vec![TreeEventName::Custom("DiskFull".into())]
        );
    }
}
