//! Error types shared across GoExport crates.

use std::fmt;
use std::path::PathBuf;

/// Which bounded wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The page never reported playback start.
    Load,
    /// Playback started but never reported completion.
    Video,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Load => f.write_str("load"),
            TimeoutKind::Video => f.write_str("video"),
        }
    }
}

/// Top-level error type for GoExport operations.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Invalid configuration: {message}")]
    Validation { message: String },

    #[error("{}", unreachable_message(.url, .local_component))]
    UnreachableService { url: String, local_component: bool },

    #[error("Could not start recording: {message}")]
    CaptureStart { message: String },

    #[error("Could not stop recording: {message}")]
    CaptureStop { message: String },

    #[error("Screen recorder is not supported on this system: {message}")]
    RecorderUnsupported { message: String },

    #[error("Timed out waiting for {kind}: {message}")]
    Timeout { kind: TimeoutKind, message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Clip {index} is out of range (clip count: {len})")]
    ClipOutOfRange { index: usize, len: usize },

    #[error("Browser driver error: {message}")]
    Driver { message: String },

    #[error("OBS error: {message}")]
    Obs { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn unreachable_message(url: &str, local_component: &bool) -> String {
    if *local_component {
        format!("Service at {url} is not running. Start the local component and try again")
    } else {
        format!("Service at {url} is not reachable. Check your network connection")
    }
}

/// Result type alias using ExportError.
pub type ExportResult<T> = Result<T, ExportError>;

impl ExportError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn capture_start(msg: impl Into<String>) -> Self {
        Self::CaptureStart {
            message: msg.into(),
        }
    }

    pub fn capture_stop(msg: impl Into<String>) -> Self {
        Self::CaptureStop {
            message: msg.into(),
        }
    }

    pub fn recorder_unsupported(msg: impl Into<String>) -> Self {
        Self::RecorderUnsupported {
            message: msg.into(),
        }
    }

    pub fn timeout(kind: TimeoutKind, msg: impl Into<String>) -> Self {
        Self::Timeout {
            kind,
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver {
            message: msg.into(),
        }
    }

    pub fn obs(msg: impl Into<String>) -> Self {
        Self::Obs {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error is a recoverable wait expiry (reported as "skipped").
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The timeout kind, when this error is a timeout.
    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            Self::Timeout { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_messages_are_actionable() {
        let local = ExportError::UnreachableService {
            url: "http://127.0.0.1:4343".to_string(),
            local_component: true,
        };
        assert!(local.to_string().contains("Start the local component"));

        let remote = ExportError::UnreachableService {
            url: "https://flashthemes.net".to_string(),
            local_component: false,
        };
        assert!(remote.to_string().contains("Check your network"));
    }

    #[test]
    fn timeouts_are_distinguishable() {
        let err = ExportError::timeout(TimeoutKind::Load, "no start after 30 minutes");
        assert!(err.is_timeout());
        assert_eq!(err.timeout_kind(), Some(TimeoutKind::Load));
        assert!(err.to_string().contains("load"));

        assert!(!ExportError::render("boom").is_timeout());
    }
}
