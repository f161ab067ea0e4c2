// src/plugin/gate.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::errors::PluginError;
use crate::events::TreeEvent;
use crate::sync::lock;
use crate::types::TreeParameters;

use super::capability::CanRun;
use super::loader::PluginLoader;

enum GateState {
    Unloaded,
    Loaded(Arc<dyn CanRun>),
    Failed(PluginError),
}

struct GateSlot {
    path: Option<PathBuf>,
    state: GateState,
}

/// Optional pre-run gate backed by a `CanRun` plugin.
///
/// With no plugin path configured every run is allowed and nothing is
/// loaded. Otherwise the plugin is loaded once, on first use, under the
/// gate's lock. A load failure is recorded (see [`load_error`]) and the gate
/// then allows every run.
///
/// [`load_error`]: Self::load_error
pub struct CapabilityGate {
    loader: Arc<dyn PluginLoader>,
    slot: Mutex<GateSlot>,
}

impl fmt::Debug for CapabilityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = lock(&self.slot);
        let state = match &slot.state {
            GateState::Unloaded => "unloaded",
            GateState::Loaded(_) => "loaded",
            GateState::Failed(_) => "failed",
        };
        f.debug_struct("CapabilityGate")
            .field("path", &slot.path)
            .field("state", &state)
            .finish()
    }
}

impl CapabilityGate {
    pub fn new(loader: Arc<dyn PluginLoader>, path: Option<PathBuf>) -> Self {
        Self {
            loader,
            slot: Mutex::new(GateSlot {
                path,
                state: GateState::Unloaded,
            }),
        }
    }

    /// A gate that never loads anything and allows every run.
    pub fn open(loader: Arc<dyn PluginLoader>) -> Self {
        Self::new(loader, None)
    }

    pub fn plugin_path(&self) -> Option<PathBuf> {
        lock(&self.slot).path.clone()
    }

    /// Replace the plugin path. The next use loads from the new path.
    pub fn set_plugin_path(&self, path: Option<PathBuf>) {
        let mut slot = lock(&self.slot);
        slot.path = path;
        slot.state = GateState::Unloaded;
    }

    pub fn is_loaded(&self) -> bool {
        matches!(lock(&self.slot).state, GateState::Loaded(_))
    }

    /// Load failure of the configured plugin, if any. Loads on first call.
    pub fn load_error(&self) -> Option<PluginError> {
        let mut slot = lock(&self.slot);
        match Self::ensure_loaded(self.loader.as_ref(), &mut slot) {
            Err(e) => Some(e),
            Ok(_) => None,
        }
    }

    /// Ask the plugin whether the run may proceed; it may rewrite `parameters`.
    pub fn can_run(
        &self,
        parameters: &mut String,
        tree: &TreeParameters,
        source: Option<&TreeEvent>,
    ) -> bool {
        let plugin = {
            let mut slot = lock(&self.slot);
            match Self::ensure_loaded(self.loader.as_ref(), &mut slot) {
                Ok(Some(plugin)) => plugin,
                Ok(None) => return true,
                Err(e) => {
                    debug!(error = %e, "gate plugin unavailable; allowing run");
                    return true;
                }
            }
        };
        plugin.can_run(parameters, tree, source)
    }

    fn ensure_loaded(
        loader: &dyn PluginLoader,
        slot: &mut GateSlot,
    ) -> Result<Option<Arc<dyn CanRun>>, PluginError> {
        let Some(path) = slot.path.as_deref() else {
            return Ok(None);
        };

        if let GateState::Unloaded = slot.state {
            slot.state = load(loader, path);
        }

        match &slot.state {
            GateState::Loaded(plugin) => Ok(Some(Arc::clone(plugin))),
            GateState::Failed(e) => Err(e.clone()),
            GateState::Unloaded => Ok(None),
        }
    }
}

fn load(loader: &dyn PluginLoader, path: &Path) -> GateState {
    match loader.load_can_run(path) {
        Ok(plugin) => {
            debug!(plugin = ?path, "gate plugin loaded");
            GateState::Loaded(plugin)
        }
        Err(e) => {
            warn!(plugin = ?path, error = %e, "failed to load gate plugin");
            GateState::Failed(e)
        }
    }
}
