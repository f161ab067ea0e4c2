// src/plugin/builtin.rs

//! Artifacts available without any external plugin.
//!
//! - `command.checker`: runs `parameters` through the platform shell.
//!   Exit code 0 is true, any other exit code false, spawn failure
//!   indeterminate. Trimmed stdout becomes the result payload.
//! - `always.gate`: allows every run.
//! - `tracing.logger`: writes tree events to the `tracing` subscriber.
//! - `trim.modifier`: trims surrounding whitespace off a value.
//! - `periodic.trigger`: a [`TriggerEngine`] that only fires on its interval.

use std::process::Command;
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::PluginError;
use crate::events::TreeEvent;
use crate::trigger::TriggerEngine;
use crate::types::{Logical, TreeParameters};

use super::capability::{CanRun, CheckOutcome, Checker, TreeLogger, ValueModifier};
use super::checker::ProgressReporter;
use super::loader::{PluginExport, PluginRegistry};

pub const COMMAND_CHECKER: &str = "command.checker";
pub const ALWAYS_GATE: &str = "always.gate";
pub const TRACING_LOGGER: &str = "tracing.logger";
pub const TRIM_MODIFIER: &str = "trim.modifier";
pub const PERIODIC_TRIGGER: &str = "periodic.trigger";

pub(super) fn register(registry: &mut PluginRegistry) {
    registry
        .register(
            COMMAND_CHECKER,
            vec![PluginExport::checker(|| Ok(Arc::new(CommandChecker)))],
        )
        .register(
            ALWAYS_GATE,
            vec![PluginExport::can_run(|| Ok(Arc::new(AlwaysGate)))],
        )
        .register(
            TRACING_LOGGER,
            vec![PluginExport::logger(|| Ok(Box::new(TracingLogger)))],
        )
        .register(
            TRIM_MODIFIER,
            vec![PluginExport::value_modifier(|| Ok(Arc::new(TrimModifier)))],
        )
        .register(
            PERIODIC_TRIGGER,
            vec![PluginExport::trigger(|owner, reference| {
                let engine = TriggerEngine::new(owner, owner, [], reference)
                    .map_err(|e| e.to_string())?;
                Ok(engine)
            })],
        );
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandChecker;

impl Checker for CommandChecker {
    fn run(
        &self,
        parameters: &str,
        tree: &TreeParameters,
        _source: Option<&TreeEvent>,
        progress: &ProgressReporter,
    ) -> Result<CheckOutcome, PluginError> {
        progress.report(0, 100);

        let mut command = shell(parameters);
        if !tree.base_dir.as_os_str().is_empty() {
            command.current_dir(&tree.base_dir);
        }

        let outcome = match command.output() {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let logical = Logical::from(output.status.success());
                let outcome = CheckOutcome::new(logical);
                if stdout.is_empty() {
                    outcome
                } else {
                    outcome.with_payload(stdout)
                }
            }
            Err(e) => {
                warn!(command = %parameters, error = %e, "failed to spawn checker command");
                CheckOutcome::new(Logical::Indeterminate).with_payload(e.to_string())
            }
        };

        progress.report(100, 100);
        Ok(outcome)
    }
}

#[cfg(windows)]
fn shell(script: &str) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", script]);
    command
}

#[cfg(not(windows))]
fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.args(["-c", script]);
    command
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGate;

impl CanRun for AlwaysGate {
    fn can_run(
        &self,
        _parameters: &mut String,
        _tree: &TreeParameters,
        _source: Option<&TreeEvent>,
    ) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TreeLogger for TracingLogger {
    fn log(
        &self,
        logger_parameters: &str,
        tree: &TreeParameters,
        event: &TreeEvent,
        extra: &[String],
    ) -> Result<(), PluginError> {
        info!(
            tree = %tree.tree_name,
            event = %event.name(),
            source = %event.source_id(),
            sender = %event.sender_id(),
            at = %event.emitted_at().format("%Y-%m-%d %H:%M:%S%.3f"),
            params = %logger_parameters,
            extra = ?extra,
            "tree event"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrimModifier;

impl ValueModifier for TrimModifier {
    fn modify_value(&self, input: &str) -> Result<String, PluginError> {
        Ok(input.trim().to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn run(script: &str) -> CheckOutcome {
        CommandChecker
            .run(script, &TreeParameters::default(), None, &ProgressReporter::new())
            .unwrap()
    }

    #[test]
    fn exit_status_maps_to_logical() {
        assert_eq!(run("true").logical, Logical::True);
        assert_eq!(run("exit 3").logical, Logical::False);
    }

    #[test]
    fn stdout_becomes_payload() {
        let outcome = run("echo ' 42 '");
        assert_eq!(outcome.payload.as_deref(), Some("42"));
    }

    #[test]
    fn missing_working_directory_is_indeterminate() {
        let tree = TreeParameters::new("t", "/definitely/not/here");
        let outcome = CommandChecker
            .run("true", &tree, None, &ProgressReporter::new())
            .unwrap();
        assert_eq!(outcome.logical, Logical::Indeterminate);
    }
}
