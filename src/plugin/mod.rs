// src/plugin/mod.rs

//! Externally supplied capabilities and the host-side machinery around them.
//!
//! - [`capability`]: the traits plugins implement.
//! - [`loader`]: resolving a capability from an artifact path.
//! - [`gate`]: optional `CanRun` gate loaded on first use.
//! - [`checker`]: run policy, named locks and progress fan-out for checkers.
//! - [`sink`]: hot-reloading logger sink.
//! - [`builtin`]: artifacts shipped with the crate.

pub mod builtin;
pub mod capability;
pub mod checker;
pub mod gate;
pub mod loader;
pub mod sink;

pub use capability::{CanRun, Capability, CheckOutcome, Checker, TreeLogger, ValueModifier};
pub use checker::{CheckerHost, CheckerPolicy, NamedLocks, ProgressListener, ProgressReporter};
pub use gate::CapabilityGate;
pub use loader::{PluginExport, PluginLoader, PluginRegistry};
pub use sink::PluginSink;
