// src/plugin/loader.rs

//! Resolving capabilities from plugin artifacts.
//!
//! An artifact is identified by its path. The [`PluginLoader`] returns the
//! first export of that artifact implementing the requested capability, or a
//! [`PluginError`]. [`PluginRegistry`] is the in-process implementation:
//! hosts register artifacts and their exports at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::errors::PluginError;
use crate::trigger::NodeTrigger;

use super::builtin;
use super::capability::{CanRun, Capability, Checker, TreeLogger, ValueModifier};

pub type CanRunFactory = Arc<dyn Fn() -> Result<Arc<dyn CanRun>, String> + Send + Sync>;
pub type CheckerFactory = Arc<dyn Fn() -> Result<Arc<dyn Checker>, String> + Send + Sync>;
pub type ModifierFactory = Arc<dyn Fn() -> Result<Arc<dyn ValueModifier>, String> + Send + Sync>;
pub type LoggerFactory = Arc<dyn Fn() -> Result<Box<dyn TreeLogger>, String> + Send + Sync>;
/// Receives `(owner node id, reference string)`.
pub type TriggerFactory =
    Arc<dyn Fn(&str, &str) -> Result<Arc<dyn NodeTrigger>, String> + Send + Sync>;

/// One implementation exported by an artifact.
#[derive(Clone)]
pub enum PluginExport {
    CanRun(CanRunFactory),
    Checker(CheckerFactory),
    ValueModifier(ModifierFactory),
    Logger(LoggerFactory),
    Trigger(TriggerFactory),
}

impl PluginExport {
    pub fn can_run<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn CanRun>, String> + Send + Sync + 'static,
    {
        PluginExport::CanRun(Arc::new(factory))
    }

    pub fn checker<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Checker>, String> + Send + Sync + 'static,
    {
        PluginExport::Checker(Arc::new(factory))
    }

    pub fn value_modifier<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ValueModifier>, String> + Send + Sync + 'static,
    {
        PluginExport::ValueModifier(Arc::new(factory))
    }

    pub fn logger<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn TreeLogger>, String> + Send + Sync + 'static,
    {
        PluginExport::Logger(Arc::new(factory))
    }

    pub fn trigger<F>(factory: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Arc<dyn NodeTrigger>, String> + Send + Sync + 'static,
    {
        PluginExport::Trigger(Arc::new(factory))
    }

    pub fn capability(&self) -> Capability {
        match self {
            PluginExport::CanRun(_) => Capability::CanRun,
            PluginExport::Checker(_) => Capability::Checker,
            PluginExport::ValueModifier(_) => Capability::ValueModifier,
            PluginExport::Logger(_) => Capability::Logger,
            PluginExport::Trigger(_) => Capability::Trigger,
        }
    }
}

impl fmt::Debug for PluginExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginExport({})", self.capability())
    }
}

/// Resolves capabilities from artifact paths.
pub trait PluginLoader: Send + Sync {
    /// First export of the artifact at `path` implementing `capability`.
    fn resolve(&self, path: &Path, capability: Capability) -> Result<PluginExport, PluginError>;

    fn load_can_run(&self, path: &Path) -> Result<Arc<dyn CanRun>, PluginError> {
        match self.resolve(path, Capability::CanRun)? {
            PluginExport::CanRun(factory) => factory().map_err(|r| factory_failed(path, r)),
            other => Err(mismatch(path, other)),
        }
    }

    fn load_checker(&self, path: &Path) -> Result<Arc<dyn Checker>, PluginError> {
        match self.resolve(path, Capability::Checker)? {
            PluginExport::Checker(factory) => factory().map_err(|r| factory_failed(path, r)),
            other => Err(mismatch(path, other)),
        }
    }

    fn load_value_modifier(&self, path: &Path) -> Result<Arc<dyn ValueModifier>, PluginError> {
        match self.resolve(path, Capability::ValueModifier)? {
            PluginExport::ValueModifier(factory) => factory().map_err(|r| factory_failed(path, r)),
            other => Err(mismatch(path, other)),
        }
    }

    fn load_logger(&self, path: &Path) -> Result<Box<dyn TreeLogger>, PluginError> {
        match self.resolve(path, Capability::Logger)? {
            PluginExport::Logger(factory) => factory().map_err(|r| factory_failed(path, r)),
            other => Err(mismatch(path, other)),
        }
    }

    fn load_trigger(
        &self,
        path: &Path,
        owner_id: &str,
        reference: &str,
    ) -> Result<Arc<dyn NodeTrigger>, PluginError> {
        match self.resolve(path, Capability::Trigger)? {
            PluginExport::Trigger(factory) => {
                factory(owner_id, reference).map_err(|r| factory_failed(path, r))
            }
            other => Err(mismatch(path, other)),
        }
    }
}

fn factory_failed(path: &Path, reason: String) -> PluginError {
    PluginError::FactoryFailed {
        path: path.to_path_buf(),
        reason,
    }
}

// Only reachable through a loader whose `resolve` ignores the capability.
fn mismatch(path: &Path, got: PluginExport) -> PluginError {
    PluginError::FactoryFailed {
        path: path.to_path_buf(),
        reason: format!("loader returned a {} export", got.capability()),
    }
}

/// In-process artifact registry.
///
/// Lookup tries the full path first, then the bare file name, so
/// `plugins/command.checker` resolves an artifact registered as
/// `command.checker`.
#[derive(Debug, Default, Clone)]
pub struct PluginRegistry {
    artifacts: BTreeMap<PathBuf, Vec<PluginExport>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in artifacts.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    /// Register (or replace) an artifact with its exports, in export order.
    pub fn register(&mut self, path: impl Into<PathBuf>, exports: Vec<PluginExport>) -> &mut Self {
        let path = path.into();
        debug!(artifact = ?path, exports = exports.len(), "registered plugin artifact");
        self.artifacts.insert(path, exports);
        self
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Path> {
        self.artifacts.keys().map(PathBuf::as_path)
    }

    fn exports_for(&self, path: &Path) -> Option<&Vec<PluginExport>> {
        self.artifacts.get(path).or_else(|| {
            let file_name = path.file_name()?;
            self.artifacts.get(Path::new(file_name))
        })
    }
}

impl PluginLoader for PluginRegistry {
    fn resolve(&self, path: &Path, capability: Capability) -> Result<PluginExport, PluginError> {
        let exports = self
            .exports_for(path)
            .ok_or_else(|| PluginError::ArtifactNotFound(path.to_path_buf()))?;

        exports
            .iter()
            .find(|export| export.capability() == capability)
            .cloned()
            .ok_or_else(|| PluginError::CapabilityMissing {
                path: path.to_path_buf(),
                capability,
            })
    }
}
