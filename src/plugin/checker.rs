// src/plugin/checker.rs

//! Host-side state around a [`Checker`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tracing::{debug, trace};

use crate::errors::PluginError;
use crate::events::TreeEvent;
use crate::sync::lock;
use crate::types::{Logical, Progress, TreeParameters};

use super::capability::{CheckOutcome, Checker};

/// Per-checker policy, taken from the node configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckerPolicy {
    pub is_mirror: bool,
    pub init_nodes: bool,
    /// Delay applied before runs started by a tree event.
    pub triggered_run_delay: Duration,
    pub referenced_node_name: Option<String>,
    /// Runs under a lock that is shared tree-wide.
    pub is_global: bool,
    pub thread_locked: bool,
    /// Name of the serialisation lock; defaults to the checker path.
    pub lock_name: Option<String>,
}

/// Named mutexes serialising `thread_locked` checkers.
#[derive(Debug, Default)]
pub struct NamedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NamedLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Process-wide lock table.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<NamedLocks>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(NamedLocks::new))
    }

    pub fn get(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = lock(&self.locks);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    pub fn len(&self) -> usize {
        lock(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type ProgressListener = Arc<dyn Fn(Progress) + Send + Sync>;

/// Fan-out for partial-completion reports.
#[derive(Default)]
pub struct ProgressReporter {
    listeners: Mutex<Vec<ProgressListener>>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("listeners", &lock(&self.listeners).len())
            .finish()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: ProgressListener) {
        lock(&self.listeners).push(listener);
    }

    pub fn report(&self, finished: u32, total: u32) {
        let progress = Progress { finished, total };
        let listeners = lock(&self.listeners).clone();
        trace!(finished, total, listeners = listeners.len(), "progress");
        for listener in listeners {
            listener(progress);
        }
    }
}

/// A loaded [`Checker`] together with the state the host keeps about it.
pub struct CheckerHost {
    path: String,
    checker: Arc<dyn Checker>,
    policy: CheckerPolicy,
    locks: Arc<NamedLocks>,
    progress: ProgressReporter,
    last_returned: Mutex<Option<Logical>>,
    is_invalid: AtomicBool,
    global_run_seen: AtomicBool,
}

impl fmt::Debug for CheckerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckerHost")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .field("last_returned", &*lock(&self.last_returned))
            .finish_non_exhaustive()
    }
}

impl CheckerHost {
    pub fn new(
        path: impl Into<String>,
        checker: Arc<dyn Checker>,
        policy: CheckerPolicy,
        locks: Arc<NamedLocks>,
    ) -> Self {
        Self {
            path: path.into(),
            checker,
            policy,
            locks,
            progress: ProgressReporter::new(),
            last_returned: Mutex::new(None),
            is_invalid: AtomicBool::new(false),
            global_run_seen: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn policy(&self) -> &CheckerPolicy {
        &self.policy
    }

    pub fn subscribe_progress(&self, listener: ProgressListener) {
        self.progress.subscribe(listener);
    }

    pub fn last_returned(&self) -> Option<Logical> {
        *lock(&self.last_returned)
    }

    pub fn is_invalid(&self) -> bool {
        self.is_invalid.load(Ordering::Acquire)
    }

    /// Read and clear the one-shot invalidation flag.
    pub fn take_invalid(&self) -> bool {
        self.is_invalid.swap(false, Ordering::AcqRel)
    }

    /// Run the checker under this host's policy.
    pub fn run(
        &self,
        parameters: &str,
        tree: &TreeParameters,
        source: Option<&TreeEvent>,
    ) -> Result<CheckOutcome, PluginError> {
        let delay = self.policy.triggered_run_delay;
        if source.is_some() && !delay.is_zero() {
            debug!(checker = %self.path, ?delay, "delaying event-triggered run");
            std::thread::sleep(delay);
        }

        let outcome = if self.policy.thread_locked {
            let name = self.policy.lock_name.as_deref().unwrap_or(&self.path);
            let mutex = self.locks.get(name);
            let _serialised = lock(&mutex);
            trace!(checker = %self.path, lock = %name, "running under named lock");
            let outcome = self.checker.run(parameters, tree, source, &self.progress);
            if outcome.is_ok()
                && self.policy.is_global
                && !self.global_run_seen.swap(true, Ordering::AcqRel)
            {
                self.is_invalid.store(true, Ordering::Release);
            }
            outcome
        } else {
            self.checker.run(parameters, tree, source, &self.progress)
        };

        if let Ok(outcome) = &outcome {
            *lock(&self.last_returned) = Some(outcome.logical);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct Counting {
        running: AtomicUsize,
        overlapped: AtomicBool,
    }

    impl Checker for Counting {
        fn run(
            &self,
            _parameters: &str,
            _tree: &TreeParameters,
            _source: Option<&TreeEvent>,
            progress: &ProgressReporter,
        ) -> Result<CheckOutcome, PluginError> {
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(10));
            progress.report(100, 100);
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(CheckOutcome::new(true))
        }
    }

    fn counting() -> Arc<Counting> {
        Arc::new(Counting {
            running: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
        })
    }

    #[test]
    fn thread_locked_runs_never_overlap() {
        let checker = counting();
        let policy = CheckerPolicy {
            thread_locked: true,
            lock_name: Some("db".into()),
            ..CheckerPolicy::default()
        };
        let host = Arc::new(CheckerHost::new("c", checker.clone(), policy, NamedLocks::new()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let host = Arc::clone(&host);
                std::thread::spawn(move || {
                    host.run("", &TreeParameters::default(), None).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(!checker.overlapped.load(Ordering::SeqCst));
        assert_eq!(host.last_returned(), Some(Logical::True));
    }

    #[test]
    fn global_lock_invalidates_once() {
        let policy = CheckerPolicy {
            thread_locked: true,
            is_global: true,
            ..CheckerPolicy::default()
        };
        let host = CheckerHost::new("g", counting(), policy, NamedLocks::new());

        host.run("", &TreeParameters::default(), None).unwrap();
        assert!(host.take_invalid());
        assert!(!host.take_invalid());

        host.run("", &TreeParameters::default(), None).unwrap();
        assert!(!host.is_invalid());
    }

    #[test]
    fn run_delay_only_applies_to_event_sourced_runs() {
        let policy = CheckerPolicy {
            triggered_run_delay: Duration::from_millis(40),
            ..CheckerPolicy::default()
        };
        let host = CheckerHost::new("d", counting(), policy, NamedLocks::new());
        let tree = TreeParameters::default();

        let started = Instant::now();
        host.run("", &tree, None).unwrap();
        assert!(started.elapsed() < Duration::from_millis(40));

        let event = TreeEvent::new(crate::events::TreeEventName::Finished, "a", "a");
        let started = Instant::now();
        host.run("", &tree, Some(&event)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn progress_reaches_every_listener() {
        let host = CheckerHost::new("p", counting(), CheckerPolicy::default(), NamedLocks::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            host.subscribe_progress(Arc::new(move |p: Progress| seen.lock().unwrap().push(p)));
        }

        host.run("", &TreeParameters::default(), None).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Progress::COMPLETE, Progress::COMPLETE]);
    }
}
