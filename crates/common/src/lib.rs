//! GoExport Common Utilities
//!
//! Shared infrastructure for all GoExport crates:
//! - Error taxonomy and result aliases
//! - Host clock used to timestamp every cross-process event
//! - Configuration loading and the parameter accessor contract
//! - Session-scoped context and the signal-driven cleanup registry
//! - Tracing/logging initialization

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod params;
pub mod shutdown;

pub use clock::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use params::*;
pub use shutdown::{signal_exit_code, CleanupHook, CleanupRegistry, HookId};
