use std::path::PathBuf;
use std::sync::Arc;

use goexport_common::error::ExportResult;
use goexport_common::shutdown::CleanupHook;
use goexport_project_model::session::{CaptureBackendKind, CaptureSession};

/// What to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Deliverable path. OBS may change the extension.
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,

    /// Title of the browser window to capture (window-based recorders only).
    pub window_title: String,
}

/// A recorder that can produce one capture at a time.
///
/// `start` returns only once the recorder has confirmed it is writing, and
/// `stop` only once it has confirmed it stopped and the deliverable exists.
/// Both stamp the moment of confirmation on the host clock.
#[async_trait::async_trait]
pub trait CaptureBackend: Send {
    fn kind(&self) -> CaptureBackendKind;

    /// Begin recording.
    async fn start(&mut self, request: &CaptureRequest) -> ExportResult<CaptureSession>;

    /// Stop recording and finalize the deliverable.
    async fn stop(&mut self) -> ExportResult<CaptureSession>;

    /// Release a live recording whose footage will not be used. Defaults to
    /// `stop`.
    async fn abort(&mut self) -> ExportResult<()> {
        self.stop().await.map(|_| ())
    }

    /// The current or most recent session.
    fn session(&self) -> Option<&CaptureSession>;

    /// Failure the recorder reported after it started writing.
    fn fault(&self) -> Option<String> {
        None
    }

    /// Hook that releases the recorder if the process is interrupted while
    /// recording. `None` when nothing is live.
    fn cleanup_hook(&self) -> Option<Arc<dyn CleanupHook>>;
}

pub mod native;
pub mod obs;

pub use native::NativeBackend;
pub use obs::ObsBackend;
