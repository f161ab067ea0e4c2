// src/plugin/sink.rs

//! Hot-reloading logger sink.
//!
//! Before every log call the artifact is fingerprinted (modification time,
//! or a `blake3` content hash). A changed fingerprint disposes the current
//! logger and loads a fresh one. Fingerprint check, reload and the log call
//! itself happen under one mutex, so concurrent log calls are serialised and
//! never observe a half-swapped logger.

use std::fmt;
use std::fs;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::errors::PluginError;
use crate::events::TreeEvent;
use crate::sync::lock;
use crate::types::{ReloadFingerprint, TreeParameters};

use super::capability::TreeLogger;
use super::loader::PluginLoader;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Fingerprint {
    /// Artifact has no file on disk (in-process registration).
    Absent,
    Modified(SystemTime),
    Hash(String),
}

#[derive(Default)]
struct SinkState {
    logger: Option<Box<dyn TreeLogger>>,
    fingerprint: Option<Fingerprint>,
    loads: u64,
}

pub struct PluginSink {
    path: PathBuf,
    mode: ReloadFingerprint,
    loader: Arc<dyn PluginLoader>,
    state: Mutex<SinkState>,
}

impl fmt::Debug for PluginSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("PluginSink")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("loaded", &state.logger.is_some())
            .field("loads", &state.loads)
            .finish()
    }
}

impl PluginSink {
    /// Create a sink. Nothing is loaded until the first log call.
    pub fn new(
        loader: Arc<dyn PluginLoader>,
        path: impl Into<PathBuf>,
        mode: ReloadFingerprint,
    ) -> Self {
        Self {
            path: path.into(),
            mode,
            loader,
            state: Mutex::new(SinkState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How many times a logger instance was loaded.
    pub fn load_count(&self) -> u64 {
        lock(&self.state).loads
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.state).logger.is_some()
    }

    /// Forward one event to the logger, reloading it first if the artifact
    /// changed.
    pub fn log(
        &self,
        logger_parameters: &str,
        tree: &TreeParameters,
        event: &TreeEvent,
        extra: &[String],
    ) -> Result<(), PluginError> {
        let mut state = lock(&self.state);
        let current = fingerprint(&self.path, self.mode)?;

        let stale = state.fingerprint.as_ref() != Some(&current);
        if state.logger.is_none() || stale {
            if let Some(old) = state.logger.take() {
                debug!(logger = ?self.path, "artifact changed; disposing logger");
                dispose_quietly(old.as_ref());
            }
            let logger = self.loader.load_logger(&self.path)?;
            state.logger = Some(logger);
            state.fingerprint = Some(current);
            state.loads += 1;
            info!(logger = ?self.path, loads = state.loads, "logger loaded");
        }

        match state.logger.as_ref() {
            Some(logger) => logger.log(logger_parameters, tree, event, extra),
            None => Ok(()),
        }
    }

    /// Dispose the current logger, if any. The next log call loads again.
    pub fn dispose(&self) {
        let mut state = lock(&self.state);
        if let Some(logger) = state.logger.take() {
            dispose_quietly(logger.as_ref());
        }
        state.fingerprint = None;
    }
}

impl Drop for PluginSink {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn dispose_quietly(logger: &dyn TreeLogger) {
    if catch_unwind(AssertUnwindSafe(|| logger.dispose())).is_err() {
        warn!("logger panicked while disposing; ignored");
    }
}

fn fingerprint(path: &Path, mode: ReloadFingerprint) -> Result<Fingerprint, PluginError> {
    let failed = |e: io::Error| PluginError::Fingerprint {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Fingerprint::Absent),
        Err(e) => return Err(failed(e)),
    };

    match mode {
        ReloadFingerprint::Mtime => Ok(Fingerprint::Modified(metadata.modified().map_err(failed)?)),
        ReloadFingerprint::Hash => {
            let bytes = fs::read(path).map_err(failed)?;
            let mut hasher = blake3::Hasher::new();
            hasher.update(&bytes);
            Ok(Fingerprint::Hash(hasher.finalize().to_hex().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TreeEventName;
    use crate::plugin::loader::{PluginExport, PluginRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noisy {
        disposed: Arc<AtomicUsize>,
    }

    impl TreeLogger for Noisy {
        fn log(
            &self,
            _logger_parameters: &str,
            _tree: &TreeParameters,
            _event: &TreeEvent,
            _extra: &[String],
        ) -> Result<(), PluginError> {
            Ok(())
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            panic!("dispose blew up");
        }
    }

    #[test]
    fn hash_mode_ignores_rewrite_with_same_content() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("hashed.logger");
        fs::write(&artifact, b"v1").unwrap();

        let disposed = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        {
            let disposed = Arc::clone(&disposed);
            registry.register(
                artifact.clone(),
                vec![PluginExport::logger(move || {
                    Ok(Box::new(Noisy {
                        disposed: Arc::clone(&disposed),
                    }))
                })],
            );
        }

        let sink = PluginSink::new(Arc::new(registry), &artifact, ReloadFingerprint::Hash);
        let event = TreeEvent::new(TreeEventName::Finished, "n", "n");
        let tree = TreeParameters::default();

        sink.log("", &tree, &event, &[]).unwrap();
        fs::write(&artifact, b"v1").unwrap();
        sink.log("", &tree, &event, &[]).unwrap();
        assert_eq!(sink.load_count(), 1);

        fs::write(&artifact, b"v2").unwrap();
        sink.log("", &tree, &event, &[]).unwrap();
        assert_eq!(sink.load_count(), 2);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);

        drop(sink);
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_artifact_surfaces_load_error() {
        let sink = PluginSink::new(
            Arc::new(PluginRegistry::new()),
            "nowhere.logger",
            ReloadFingerprint::Mtime,
        );
        let event = TreeEvent::new(TreeEventName::Exception, "n", "n");
        let err = sink
            .log("", &TreeParameters::default(), &event, &[])
            .unwrap_err();
        assert!(matches!(err, PluginError::ArtifactNotFound(_)));
        assert!(!sink.is_loaded());
    }
}
