//! The single capture entry point the export flow talks to.

use std::sync::Arc;

use goexport_common::clock::HostClock;
use goexport_common::config::AppConfig;
use goexport_common::error::{ExportError, ExportResult};
use goexport_common::shutdown::CleanupHook;
use goexport_project_model::session::{CaptureBackendKind, CaptureSession};

use crate::backend::{CaptureBackend, CaptureRequest, NativeBackend, ObsBackend};
use crate::obs_client::ObsClient;

/// Capture facade. The backend is chosen once and never changes.
pub struct Capture {
    backend: Box<dyn CaptureBackend>,
}

impl Capture {
    /// Prefer a reachable OBS instance; otherwise record natively.
    pub async fn select(config: &AppConfig, clock: HostClock) -> Self {
        match ObsClient::connect(&config.obs).await {
            Ok(client) => {
                tracing::info!(backend = %CaptureBackendKind::Obs, "Capture backend selected");
                Self::with_backend(Box::new(ObsBackend::new(client, config.obs.clone(), clock)))
            }
            Err(e) => {
                tracing::info!(
                    backend = %CaptureBackendKind::Native,
                    reason = %e,
                    "OBS unavailable, using native capture"
                );
                Self::with_backend(Box::new(NativeBackend::from_config(config, clock)))
            }
        }
    }

    pub fn with_backend(backend: Box<dyn CaptureBackend>) -> Self {
        Self { backend }
    }

    pub fn kind(&self) -> CaptureBackendKind {
        self.backend.kind()
    }

    pub fn is_obs(&self) -> bool {
        self.kind() == CaptureBackendKind::Obs
    }

    pub async fn start(&mut self, request: &CaptureRequest) -> ExportResult<CaptureSession> {
        tracing::info!(
            backend = %self.kind(),
            output = %request.output.display(),
            width = request.width,
            height = request.height,
            "Starting capture"
        );
        self.backend.start(request).await
    }

    pub async fn stop(&mut self) -> ExportResult<CaptureSession> {
        let session = self.backend.stop().await?;
        if !session.output_path.is_file() {
            return Err(ExportError::capture_stop(format!(
                "Recording missing at {}",
                session.output_path.display()
            )));
        }
        Ok(session)
    }

    /// Stop a recording that is being thrown away.
    pub async fn abort(&mut self) -> ExportResult<()> {
        tracing::info!(backend = %self.kind(), "Discarding capture");
        self.backend.abort().await
    }

    pub fn fault(&self) -> Option<String> {
        self.backend.fault()
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.backend.session()
    }

    pub fn cleanup_hook(&self) -> Option<Arc<dyn CleanupHook>> {
        self.backend.cleanup_hook()
    }
}
