mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use checktree::config::load_and_validate;
use checktree::engine::TreeHost;
use checktree::node::LogicalNode;
use checktree::plugin::{CheckOutcome, PluginExport, PluginRegistry};
use checktree::types::{Admission, Logical, LogicalResultState, ProcessingState};
use checktree_test_utils::builders::{ConfigFileBuilder, NodeConfigBuilder};
use checktree_test_utils::fakes::{
    LoggerJournal, ScriptedChecker, SwitchGate, journal_logger_export, registry_with,
};

use common::{TestResult, init_tracing, wait_until};

const CONFIG: &str = r#"
[config]
tree_name = "plant"

[logger]
path = "journal.logger"

[node.disk]
checker = "a.checker"
parameters = "df -h"

[node.gated]
checker = "a.checker"
gate = "switch.gate"

[connector.disk_view]
target = "disk"

[connector.frozen]
target = "disk"
detached = true
"#;

fn registry(
    checker: Arc<ScriptedChecker>,
    gate: Arc<SwitchGate>,
    journal: &Arc<LoggerJournal>,
) -> PluginRegistry {
    let mut registry = registry_with("a.checker", checker, "switch.gate", gate);
    registry.register("journal.logger", vec![journal_logger_export(Arc::clone(journal))]);
    registry
}

#[test]
fn run_once_from_a_config_file_evaluates_and_logs_every_leaf() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("Checktree.toml");
    fs::write(&config_path, CONFIG)?;
    let cfg = load_and_validate(&config_path)?;
    assert_eq!(cfg.config.base_dir.as_deref(), Some(dir.path()));

    let checker = ScriptedChecker::new(Logical::True);
    checker.push(Ok(CheckOutcome::new(false).with_payload("93%")));
    let gate = SwitchGate::new(false);
    let journal = LoggerJournal::new();

    let host = TreeHost::build(&cfg, Arc::new(registry(checker.clone(), gate.clone(), &journal)))?;
    let results = host.run_all_once();

    let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["disk", "gated"]);
    assert!(results[1].1.is_none(), "gated leaf should be vetoed");

    let disk = host.node("disk").ok_or("disk missing")?;
    assert_eq!(disk.logical(), Logical::False);
    assert_eq!(disk.logical_result_state(), LogicalResultState::Done);
    assert_eq!(disk.path(), "plant/disk");
    assert_eq!(checker.parameters_seen(), vec!["df -h"]);

    let gated = host.node("gated").ok_or("gated missing")?;
    assert_eq!(gated.processing_state(), ProcessingState::Waiting);
    assert_eq!(gate.asked(), 1);

    assert_eq!(journal.lines(), vec!["gen1 disk Finished false,93%"]);

    let view = host.connector("disk_view").ok_or("view missing")?;
    assert_eq!(view.logical(), Logical::False);
    assert_eq!(view.referenced_node_id(), "disk");

    let frozen = host.connector("frozen").ok_or("frozen missing")?;
    assert!(frozen.is_detached());
    assert_eq!(frozen.logical(), Logical::Indeterminate);
    assert_eq!(frozen.path(), "plant/disk/frozen");

    host.shutdown();
    assert_eq!(journal.disposed.load(std::sync::atomic::Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn finished_event_of_a_watched_node_runs_the_watcher() -> TestResult {
    init_tracing();

    let upstream = ScriptedChecker::new(Logical::True);
    let downstream = ScriptedChecker::new(Logical::True);
    let mut registry =
        registry_with("up.checker", upstream.clone(), "switch.gate", SwitchGate::new(true));
    {
        let downstream = downstream.clone();
        registry.register(
            "down.checker",
            vec![PluginExport::checker(move || Ok(downstream.clone()))],
        );
    }

    let cfg = ConfigFileBuilder::new()
        .with_node("a", NodeConfigBuilder::new("up.checker").build())
        .with_node(
            "b",
            NodeConfigBuilder::new("down.checker").watch("a").on("Finished").build(),
        )
        .build();

    let host = TreeHost::build(&cfg, Arc::new(registry))?;
    host.start()?;

    let b_info = host.node("b").ok_or("b missing")?.next_run_info();
    assert_eq!(b_info.as_deref(), Some("on finished"));

    host.leaf("a").ok_or("a missing")?.run(None);

    let ran = wait_until(Duration::from_secs(3), || downstream.calls() == 1).await;
    assert!(ran, "watcher never ran");
    assert_eq!(upstream.calls(), 1);

    let b = host.node("b").ok_or("b missing")?;
    assert!(
        wait_until(Duration::from_secs(1), || b.processing_state() == ProcessingState::Finished)
            .await
    );
    host.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_watcher_does_not_hold_up_a_fast_one() -> TestResult {
    init_tracing();

    let upstream = ScriptedChecker::new(Logical::True);
    let slow = ScriptedChecker::slow(Logical::True, Duration::from_millis(800));
    let fast = ScriptedChecker::new(Logical::True);
    let mut registry =
        registry_with("up.checker", upstream.clone(), "switch.gate", SwitchGate::new(true));
    for (path, checker) in [("slow.checker", slow.clone()), ("fast.checker", fast.clone())] {
        registry.register(path, vec![PluginExport::checker(move || Ok(checker.clone()))]);
    }

    // `slow` sorts first, so its fire is dispatched before `zfast`'s.
    let cfg = ConfigFileBuilder::new()
        .with_node("a", NodeConfigBuilder::new("up.checker").build())
        .with_node(
            "slow",
            NodeConfigBuilder::new("slow.checker").watch("a").on("Finished").build(),
        )
        .with_node(
            "zfast",
            NodeConfigBuilder::new("fast.checker").watch("a").on("Finished").build(),
        )
        .build();

    let host = TreeHost::build(&cfg, Arc::new(registry))?;
    host.start()?;
    host.leaf("a").ok_or("a missing")?.run(None);

    let fast_ran = wait_until(Duration::from_millis(500), || fast.calls() == 1).await;
    assert!(fast_ran, "fast watcher waited for the slow one");
    assert!(wait_until(Duration::from_millis(200), || slow.calls() == 1).await);

    let slow_node = host.node("slow").ok_or("slow missing")?;
    assert_ne!(slow_node.processing_state(), ProcessingState::Finished);
    assert!(
        wait_until(Duration::from_secs(3), || {
            slow_node.processing_state() == ProcessingState::Finished
        })
        .await
    );

    host.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn periodic_leaf_runs_on_its_own_and_publishes_its_next_run() -> TestResult {
    init_tracing();

    let checker = ScriptedChecker::new(Logical::True);
    let registry =
        registry_with("a.checker", checker.clone(), "switch.gate", SwitchGate::new(true));
    let cfg = ConfigFileBuilder::new()
        .with_node("tick", NodeConfigBuilder::new("a.checker").trigger("every MS:40").build())
        .build();

    let host = TreeHost::build(&cfg, Arc::new(registry))?;
    host.start()?;

    let tick = host.node("tick").ok_or("tick missing")?;
    assert!(tick.next_run().is_some());

    assert!(wait_until(Duration::from_secs(3), || checker.calls() >= 2).await);

    host.shutdown();
    assert!(host.trigger("tick").ok_or("trigger missing")?.info().next_run.is_none());
    Ok(())
}

#[test]
fn describe_lists_leaves_and_connectors() -> TestResult {
    let registry = registry_with(
        "a.checker",
        ScriptedChecker::new(Logical::True),
        "switch.gate",
        SwitchGate::new(true),
    );
    let cfg = ConfigFileBuilder::new()
        .tree_name("plant")
        .with_node(
            "disk",
            NodeConfigBuilder::new("a.checker").parameters("df").gate("switch.gate").build(),
        )
        .with_bound("disk_view", "disk")
        .build();

    let host = TreeHost::build(&cfg, Arc::new(registry))?;
    let text = host.describe();

    assert!(text.starts_with("tree plant"));
    assert!(text.contains("  - disk\n"));
    assert!(text.contains("parameters: df"));
    assert!(text.contains("gate: "));
    assert!(text.contains("  - disk_view [bound, Node] -> plant/disk"));
    Ok(())
}

#[test]
fn each_tree_owns_a_queue_with_its_configured_admission() -> TestResult {
    let build = |admission| -> Result<TreeHost, Box<dyn std::error::Error>> {
        let registry = registry_with(
            "a.checker",
            ScriptedChecker::new(Logical::True),
            "switch.gate",
            SwitchGate::new(true),
        );
        let cfg = ConfigFileBuilder::new()
            .admission(admission)
            .with_node("a", NodeConfigBuilder::new("a.checker").build())
            .build();
        Ok(TreeHost::build(&cfg, Arc::new(registry))?)
    };

    let first = build(Admission::Suffix)?;
    let second = build(Admission::Suffix)?;
    let coalescing = build(Admission::Coalesce)?;

    assert!(!Arc::ptr_eq(first.router().queue(), second.router().queue()));
    assert_eq!(first.router().queue().admission(), Admission::Suffix);
    assert_eq!(coalescing.router().queue().admission(), Admission::Coalesce);
    Ok(())
}

#[test]
fn unknown_checker_artifact_fails_the_build() {
    let cfg = ConfigFileBuilder::new()
        .with_node("a", NodeConfigBuilder::new("ghost.checker").build())
        .build();
    let err = TreeHost::build(&cfg, Arc::new(PluginRegistry::with_builtins())).unwrap_err();
    assert!(err.to_string().contains("ghost.checker"));
}

#[test]
fn demo_config_builds_against_the_builtins() -> TestResult {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/Checktree.toml");
    let cfg = load_and_validate(&path)?;
    let host = TreeHost::build(&cfg, Arc::new(PluginRegistry::with_builtins()))?;

    let leaves: Vec<&str> = host.leaf_names().collect();
    assert_eq!(leaves, vec!["always", "disk_usage", "tmp_writable"]);
    assert!(host.connector("usage_frozen").ok_or("missing connector")?.is_detached());
    assert!(host.describe().contains("on finished"));
    Ok(())
}
