// src/engine/mod.rs

//! Runtime side of a configured tree.
//!
//! - [`leaf`]: evaluating one checker leaf and writing its node.
//! - [`host`]: building the whole tree from config and driving its triggers.

pub mod host;
pub mod leaf;

pub use host::TreeHost;
pub use leaf::LeafJob;
