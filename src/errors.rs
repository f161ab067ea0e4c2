// src/errors.rs

//! Crate-wide error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::plugin::Capability;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid interval in '{reference}': {reason}")]
    Interval { reference: String, reason: String },

    #[error("periodic trigger for node '{0}' started outside of a tokio runtime")]
    NoRuntime(String),

    #[error("Node not found: {0}")]
    UnknownNode(String),

    #[error("Reference cycle between connectors: {0}")]
    ReferenceCycle(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure to resolve or use an externally supplied capability.
///
/// Kept `Clone` so an optional gate can store the failure and hand copies to
/// whoever asks for it later.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin artifact not found: {0:?}")]
    ArtifactNotFound(PathBuf),

    #[error("artifact {path:?} exports no {capability} implementation")]
    CapabilityMissing { path: PathBuf, capability: Capability },

    #[error("plugin factory in {path:?} failed: {reason}")]
    FactoryFailed { path: PathBuf, reason: String },

    #[error("cannot fingerprint artifact {path:?}: {reason}")]
    Fingerprint { path: PathBuf, reason: String },

    #[error("plugin call failed: {0}")]
    Call(String),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TreeError>;
