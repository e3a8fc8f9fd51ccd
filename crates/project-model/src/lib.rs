//! GoExport Project Model
//!
//! Defines the data contracts shared by the capture, render and export crates:
//! - **Services:** the catalog of playback targets and their URL templates
//! - **Resolutions:** supported aspect ratios and output sizes
//! - **Sessions:** what a capture backend measured and what the page reported
//! - **Jobs:** per-cycle export state and output naming
//!
//! Nothing here performs I/O beyond path existence checks.

pub mod job;
pub mod outro;
pub mod resolution;
pub mod service;
pub mod session;

pub use job::*;
pub use outro::*;
pub use resolution::*;
pub use service::*;
pub use session::*;

/// Errors raised while resolving model values.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown aspect ratio: {0}")]
    UnknownAspectRatio(String),

    #[error("Unknown resolution {resolution} for aspect ratio {aspect}")]
    UnknownResolution { aspect: String, resolution: String },

    #[error("{service} requires a {identifier}")]
    MissingIdentifier {
        service: String,
        identifier: &'static str,
    },

    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
}
