//! Recording through a running OBS instance.
//!
//! Start prepares a dedicated profile, scene and window source, mutes every
//! other audio input and starts recording; stop ends the recording, moves
//! the file to the requested location and undoes the preparation. The start
//! and stop instants are the moments OBS confirms the state change.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use goexport_common::clock::HostClock;
use goexport_common::config::ObsConfig;
use goexport_common::error::{ExportError, ExportResult};
use goexport_common::shutdown::CleanupHook;
use goexport_project_model::session::{CaptureBackendKind, CaptureSession};

use crate::obs_client::ObsClient;
use crate::steps::StepReport;

use super::{CaptureBackend, CaptureRequest};

pub const PROFILE_NAME: &str = "GoExport - Profile";
pub const SCENE_NAME: &str = "GoExport - Scene";
pub const INPUT_NAME: &str = "GoExport - Capture";

/// Time OBS gets to bring a freshly created source up.
const SOURCE_SETTLE: Duration = Duration::from_secs(4);

/// Window source description for the current platform.
pub fn window_source(window_title: &str) -> (&'static str, Value) {
    if cfg!(target_os = "windows") {
        (
            "window_capture",
            json!({
                "window": format!("{window_title}:Chrome_WidgetWin_1:chrome.exe"),
                "cursor": false,
                "capture_audio": true,
                "client_area": true,
            }),
        )
    } else {
        (
            "xcomposite_input",
            json!({
                "capture_window": format!("0\r\n{window_title}\r\nchromium"),
                "show_cursor": false,
            }),
        )
    }
}

/// What setup changed, so teardown can put it back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Teardown {
    pub previous_scene: Option<String>,
    pub previous_profile: Option<String>,
    pub muted_inputs: Vec<String>,
}

struct LiveRecording {
    requested: PathBuf,
    start_offset: i64,
}

/// OBS-driven recorder.
pub struct ObsBackend {
    client: Arc<ObsClient>,
    config: ObsConfig,
    clock: HostClock,
    settle: Duration,
    teardown: Arc<Mutex<Option<Teardown>>>,
    live: Option<LiveRecording>,
    session: Option<CaptureSession>,
}

impl ObsBackend {
    pub fn new(client: ObsClient, config: ObsConfig, clock: HostClock) -> Self {
        Self {
            client: Arc::new(client),
            config,
            clock,
            settle: SOURCE_SETTLE,
            teardown: Arc::new(Mutex::new(None)),
            live: None,
            session: None,
        }
    }

    /// Override the pause after creating the source.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.config.state_timeout_ms)
    }

    /// Put OBS into recording shape. Idempotent: reruns reuse what exists.
    async fn prepare(&self, request: &CaptureRequest) -> ExportResult<StepReport> {
        let client = &self.client;
        let mut report = StepReport::new();
        let mut teardown = Teardown::default();

        teardown.previous_scene = report
            .best_effort("remember scene", client.request("GetCurrentProgramScene", json!({})).await)
            .and_then(|d| scene_name(&d));
        teardown.previous_profile = report
            .best_effort("remember profile", client.request("GetProfileList", json!({})).await)
            .and_then(|d| d["currentProfileName"].as_str().map(str::to_string));

        report.best_effort(
            "create profile",
            client.ensure("CreateProfile", json!({ "profileName": PROFILE_NAME })).await,
        );
        report.best_effort(
            "select profile",
            client
                .request("SetCurrentProfile", json!({ "profileName": PROFILE_NAME }))
                .await,
        );
        report.required(
            "create scene",
            client.ensure("CreateScene", json!({ "sceneName": SCENE_NAME })).await,
        );
        report.best_effort(
            "preview scene",
            client
                .request("SetCurrentPreviewScene", json!({ "sceneName": SCENE_NAME }))
                .await,
        );
        report.required(
            "program scene",
            client
                .request("SetCurrentProgramScene", json!({ "sceneName": SCENE_NAME }))
                .await,
        );
        report.required(
            "video settings",
            client
                .request(
                    "SetVideoSettings",
                    json!({
                        "baseWidth": request.width,
                        "baseHeight": request.height,
                        "outputWidth": request.width,
                        "outputHeight": request.height,
                        "fpsNumerator": self.config.fps,
                        "fpsDenominator": 1,
                    }),
                )
                .await,
        );
        if let Some(muted) = report.best_effort("mute audio", self.mute_other_inputs().await) {
            teardown.muted_inputs = muted;
        }

        let (kind, settings) = window_source(&request.window_title);
        let created = client
            .call(
                "CreateInput",
                json!({
                    "sceneName": SCENE_NAME,
                    "inputName": INPUT_NAME,
                    "inputKind": kind,
                    "inputSettings": settings.clone(),
                    "sceneItemEnabled": true,
                }),
            )
            .await;
        let source = match created {
            Ok(r) if r.result => Ok(()),
            Ok(r) if r.code == crate::obs_client::CODE_ALREADY_EXISTS => client
                .request(
                    "SetInputSettings",
                    json!({ "inputName": INPUT_NAME, "inputSettings": settings }),
                )
                .await
                .map(|_| ()),
            Ok(r) => Err(ExportError::obs(format!(
                "CreateInput failed (code {}): {}",
                r.code,
                r.comment.unwrap_or_default()
            ))),
            Err(e) => Err(e),
        };
        report.required("capture source", source);

        // Teardown must run even when setup only got halfway.
        *lock(&self.teardown) = Some(teardown);
        report.into_result(ExportError::capture_start)
    }

    /// Mute every unmuted audio input except ours; returns what was muted.
    async fn mute_other_inputs(&self) -> ExportResult<Vec<String>> {
        let list = self.client.request("GetInputList", json!({})).await?;
        let names: Vec<String> = list["inputs"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(|i| i["inputName"].as_str().map(str::to_string))
                    .filter(|n| n != INPUT_NAME)
                    .collect()
            })
            .unwrap_or_default();

        let mut muted = Vec::new();
        for name in names {
            // Inputs without audio reject the query; skip them.
            let Ok(state) = self
                .client
                .request("GetInputMute", json!({ "inputName": name }))
                .await
            else {
                continue;
            };
            if state["inputMuted"].as_bool() == Some(false) {
                self.client
                    .request("SetInputMute", json!({ "inputName": name, "inputMuted": true }))
                    .await?;
                muted.push(name);
            }
        }
        tracing::debug!(muted = ?muted, "Muted OBS audio inputs");
        Ok(muted)
    }
}

#[async_trait::async_trait]
impl CaptureBackend for ObsBackend {
    fn kind(&self) -> CaptureBackendKind {
        CaptureBackendKind::Obs
    }

    async fn start(&mut self, request: &CaptureRequest) -> ExportResult<CaptureSession> {
        if self.live.is_some() {
            return Err(ExportError::capture_start("An OBS recording is already running"));
        }
        if let Err(e) = self.prepare(request).await {
            restore(&self.client, &self.teardown).await;
            return Err(e);
        }
        tokio::time::sleep(self.settle).await;

        let offset = self.clock.stamp("OBS recording starting");
        let confirmed = match self.client.request("StartRecord", json!({})).await {
            Ok(_) => self.client.wait_for_record_state(true, self.state_timeout()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = confirmed {
            restore(&self.client, &self.teardown).await;
            return Err(ExportError::capture_start(e.to_string()));
        }
        let start_time = self.clock.stamp("OBS recording started");
        let startup_delay = start_time - offset;
        tracing::info!(startup_delay_ms = startup_delay, "OBS recording started");

        self.live = Some(LiveRecording {
            requested: request.output.clone(),
            start_offset: offset,
        });
        let session = CaptureSession::started(
            CaptureBackendKind::Obs,
            start_time,
            startup_delay,
            request.output.clone(),
        );
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn stop(&mut self) -> ExportResult<CaptureSession> {
        let live = self
            .live
            .take()
            .ok_or_else(|| ExportError::capture_stop("No OBS recording is running"))?;
        tracing::debug!(since_start_request_ms = self.clock.now_ms() - live.start_offset, "Stopping OBS recording");

        let offset = self.clock.stamp("OBS recording stopping");
        let stopped = self.client.request("StopRecord", json!({})).await;
        let confirmed = match &stopped {
            Ok(_) => self.client.wait_for_record_state(false, self.state_timeout()).await,
            Err(e) => Err(ExportError::capture_stop(e.to_string())),
        };
        let end_time = self.clock.stamp("OBS recording ended");
        let ended_delay = end_time - offset;
        restore(&self.client, &self.teardown).await;

        let state = confirmed.map_err(|e| ExportError::capture_stop(e.to_string()))?;
        let recorded = stopped
            .ok()
            .and_then(|d| d["outputPath"].as_str().map(PathBuf::from))
            .or_else(|| state.output_path.map(PathBuf::from))
            .ok_or_else(|| ExportError::capture_stop("OBS did not report where it saved the recording"))?;
        let output = relocate(&recorded, &live.requested)?;
        tracing::info!(
            output = %output.display(),
            ended_delay_ms = ended_delay,
            "OBS recording stopped"
        );

        let mut session = self
            .session
            .take()
            .ok_or_else(|| ExportError::capture_stop("Capture session missing"))?;
        session.finish(end_time, ended_delay);
        session.output_path = output;
        self.session = Some(session.clone());
        Ok(session)
    }

    fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    fn cleanup_hook(&self) -> Option<Arc<dyn CleanupHook>> {
        self.live.as_ref()?;
        Some(Arc::new(ObsCleanup {
            client: Arc::clone(&self.client),
            teardown: Arc::clone(&self.teardown),
        }))
    }
}

/// Stops a recording left running at interruption and restores OBS.
struct ObsCleanup {
    client: Arc<ObsClient>,
    teardown: Arc<Mutex<Option<Teardown>>>,
}

#[async_trait::async_trait]
impl CleanupHook for ObsCleanup {
    fn name(&self) -> &str {
        "obs-recording"
    }

    async fn run(&self) {
        if let Err(e) = self.client.request("StopRecord", json!({})).await {
            tracing::warn!(error = %e, "Could not stop OBS recording on exit");
        }
        restore(&self.client, &self.teardown).await;
    }
}

/// Undo setup. Runs at most once per setup; every step is best effort.
async fn restore(client: &ObsClient, teardown: &Mutex<Option<Teardown>>) -> StepReport {
    let mut report = StepReport::new();
    let Some(plan) = lock(teardown).take() else {
        return report;
    };

    if let Some(scene) = &plan.previous_scene {
        report.best_effort(
            "restore scene",
            client
                .request("SetCurrentProgramScene", json!({ "sceneName": scene }))
                .await,
        );
    }
    if let Some(profile) = &plan.previous_profile {
        report.best_effort(
            "restore profile",
            client
                .request("SetCurrentProfile", json!({ "profileName": profile }))
                .await,
        );
    }
    report.best_effort(
        "remove source",
        client.request("RemoveInput", json!({ "inputName": INPUT_NAME })).await,
    );
    report.best_effort(
        "remove scene",
        client.request("RemoveScene", json!({ "sceneName": SCENE_NAME })).await,
    );
    report.best_effort(
        "remove profile",
        client.request("RemoveProfile", json!({ "profileName": PROFILE_NAME })).await,
    );
    for name in &plan.muted_inputs {
        report.best_effort(
            "unmute audio",
            client
                .request("SetInputMute", json!({ "inputName": name, "inputMuted": false }))
                .await,
        );
    }
    tracing::info!(
        warnings = report.warnings().count(),
        "OBS configuration restored"
    );
    report
}

/// Move OBS's file next to `requested`, keeping OBS's container extension.
pub fn relocate(recorded: &Path, requested: &Path) -> ExportResult<PathBuf> {
    if !recorded.is_file() {
        return Err(ExportError::FileNotFound {
            path: recorded.to_path_buf(),
        });
    }
    let target = match recorded.extension() {
        Some(ext) => requested.with_extension(ext),
        None => requested.to_path_buf(),
    };
    if target == recorded {
        return Ok(target);
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(recorded, &target).is_err() {
        // Different filesystem.
        std::fs::copy(recorded, &target)?;
        std::fs::remove_file(recorded)?;
    }
    Ok(target)
}

fn scene_name(data: &Value) -> Option<String> {
    data["currentProgramSceneName"]
        .as_str()
        .or_else(|| data["sceneName"].as_str())
        .map(str::to_string)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relocate_keeps_obs_extension() {
        let dir = tempfile::tempdir().unwrap();
        let recorded = dir.path().join("obs").join("2024-01-01 10-00-00.mkv");
        std::fs::create_dir_all(recorded.parent().unwrap()).unwrap();
        std::fs::write(&recorded, b"video").unwrap();

        let requested = dir.path().join("out").join("take.mp4");
        let moved = relocate(&recorded, &requested).unwrap();
        assert_eq!(moved, dir.path().join("out").join("take.mkv"));
        assert!(moved.is_file());
        assert!(!recorded.exists());
    }

    #[test]
    fn test_relocate_missing_recording() {
        let dir = tempfile::tempdir().unwrap();
        let err = relocate(&dir.path().join("gone.mkv"), &dir.path().join("take.mp4")).unwrap_err();
        assert!(matches!(err, ExportError::FileNotFound { .. }));
    }

    #[test]
    fn test_window_source_names_window() {
        let (kind, settings) = window_source("GoExport Viewer");
        let text = settings.to_string();
        assert!(text.contains("GoExport Viewer"));
        if cfg!(target_os = "windows") {
            assert_eq!(kind, "window_capture");
            assert_eq!(settings["cursor"], false);
        } else {
            assert_eq!(kind, "xcomposite_input");
            assert_eq!(settings["show_cursor"], false);
        }
    }

    #[test]
    fn test_scene_name_fallback() {
        assert_eq!(
            scene_name(&json!({"currentProgramSceneName": "Main"})),
            Some("Main".to_string())
        );
        assert_eq!(scene_name(&json!({"sceneName": "Old"})), Some("Old".to_string()));
        assert_eq!(scene_name(&json!({})), None);
    }
}
