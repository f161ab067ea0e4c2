//! Fake plugins and sinks for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use checktree::errors::PluginError;
use checktree::events::{TreeEvent, TreeEventName, TreeEventSink};
use checktree::plugin::{
    CanRun, CheckOutcome, Checker, PluginExport, PluginRegistry, ProgressReporter, TreeLogger,
};
use checktree::types::{Logical, TreeParameters};

/// Records every published event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Arc<TreeEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn names(&self) -> Vec<TreeEventName> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.name().clone())
            .collect()
    }

    pub fn count(&self, name: &TreeEventName) -> usize {
        self.names().iter().filter(|n| *n == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl TreeEventSink for RecordingSink {
    fn publish(&self, event: Arc<TreeEvent>) {
        self.events.lock().unwrap().push(event);
    }
}

/// Checker returning queued outcomes (then a default) and counting calls.
pub struct ScriptedChecker {
    script: Mutex<VecDeque<Result<CheckOutcome, PluginError>>>,
    fallback: Logical,
    delay: Duration,
    calls: AtomicUsize,
    parameters_seen: Mutex<Vec<String>>,
}

impl ScriptedChecker {
    pub fn new(fallback: Logical) -> Arc<Self> {
        Self::slow(fallback, Duration::ZERO)
    }

    /// Checker that blocks for `delay` on every run before answering.
    pub fn slow(fallback: Logical, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay,
            calls: AtomicUsize::new(0),
            parameters_seen: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, outcome: Result<CheckOutcome, PluginError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn parameters_seen(&self) -> Vec<String> {
        self.parameters_seen.lock().unwrap().clone()
    }
}

impl Checker for ScriptedChecker {
    fn run(
        &self,
        parameters: &str,
        _tree: &TreeParameters,
        _source: Option<&TreeEvent>,
        progress: &ProgressReporter,
    ) -> Result<CheckOutcome, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.parameters_seen
            .lock()
            .unwrap()
            .push(parameters.to_string());
        progress.report(50, 100);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CheckOutcome::new(self.fallback)))
    }
}

/// Gate allowing or denying every run, counting consultations.
pub struct SwitchGate {
    allow: std::sync::atomic::AtomicBool,
    asked: AtomicUsize,
}

impl SwitchGate {
    pub fn new(allow: bool) -> Arc<Self> {
        Arc::new(Self {
            allow: std::sync::atomic::AtomicBool::new(allow),
            asked: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, allow: bool) {
        self.allow.store(allow, Ordering::SeqCst);
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl CanRun for SwitchGate {
    fn can_run(
        &self,
        _parameters: &mut String,
        _tree: &TreeParameters,
        _source: Option<&TreeEvent>,
    ) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.allow.load(Ordering::SeqCst)
    }
}

/// Shared journal of a logger artifact: which generation logged what, and
/// how many instances were created and disposed.
#[derive(Default)]
pub struct LoggerJournal {
    pub created: AtomicUsize,
    pub disposed: AtomicUsize,
    pub lines: Mutex<Vec<String>>,
}

impl LoggerJournal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

pub struct JournalLogger {
    generation: usize,
    journal: Arc<LoggerJournal>,
}

impl TreeLogger for JournalLogger {
    fn log(
        &self,
        _logger_parameters: &str,
        _tree: &TreeParameters,
        event: &TreeEvent,
        extra: &[String],
    ) -> Result<(), PluginError> {
        self.journal.lines.lock().unwrap().push(format!(
            "gen{} {} {} {}",
            self.generation,
            event.source_id(),
            event.name(),
            extra.join(",")
        ));
        Ok(())
    }

    fn dispose(&self) {
        self.journal.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Export creating a new `JournalLogger` generation per load.
pub fn journal_logger_export(journal: Arc<LoggerJournal>) -> PluginExport {
    PluginExport::logger(move || {
        let generation = journal.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(JournalLogger {
            generation,
            journal: Arc::clone(&journal),
        }))
    })
}

/// Registry with the built-ins plus a scripted checker and a switch gate.
pub fn registry_with(
    checker_path: &str,
    checker: Arc<ScriptedChecker>,
    gate_path: &str,
    gate: Arc<SwitchGate>,
) -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    registry
        .register(
            checker_path,
            vec![PluginExport::checker(move || Ok(checker.clone()))],
        )
        .register(
            gate_path,
            vec![PluginExport::can_run(move || Ok(gate.clone()))],
        );
    registry
}
