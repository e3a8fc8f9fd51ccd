//! Export cycles against an in-memory browser and recorder.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use url::Url;

use goexport_capture_engine::{Capture, CaptureBackend, CaptureRequest};
use goexport_common::clock::HostClock;
use goexport_common::config::AppConfig;
use goexport_common::error::{ExportError, ExportResult, TimeoutKind};
use goexport_common::params::{LayeredParams, ParamKey};
use goexport_common::shutdown::CleanupHook;
use goexport_export_flow::{
    reconcile, DriverLauncher, ExportFlow, FlowState, FlowTimings, Key, PlaybackDriver, Reachability,
};
use goexport_platform::display::{DisplayFit, MonitorInfo};
use goexport_project_model::service::TimingMode;
use goexport_project_model::session::{CaptureBackendKind, CaptureSession};

/// What the fake browser and recorder did, in order.
#[derive(Default)]
struct World {
    log: Vec<String>,
    launches: u32,
    player_open: bool,
    stop_polls: u32,
    /// Whether the player ever reports playback.
    plays: bool,
    /// Failure the recorder reports once it is live.
    recorder_fault: Option<String>,
}

type Shared = Arc<Mutex<World>>;

fn note(world: &Shared, entry: impl Into<String>) {
    world.lock().unwrap().log.push(entry.into());
}

struct FakeDriver {
    world: Shared,
    history: Vec<String>,
}

impl FakeDriver {
    fn show(&mut self, url: String) {
        let mut world = self.world.lock().unwrap();
        world.player_open = url.starts_with("http");
        world.log.push(format!("navigate {url}"));
        self.history.push(url);
    }
}

#[async_trait::async_trait]
impl PlaybackDriver for FakeDriver {
    async fn navigate(&mut self, url: &str) -> ExportResult<()> {
        self.show(url.to_string());
        Ok(())
    }

    async fn current_url(&mut self) -> ExportResult<String> {
        Ok(self.history.last().cloned().unwrap_or_default())
    }

    async fn inject_script_now(&mut self, script: &str) -> ExportResult<()> {
        note(&self.world, format!("script {script}"));
        Ok(())
    }

    async fn inject_script_on_future_loads(&mut self, script: &str) -> ExportResult<()> {
        note(&self.world, format!("future-script {script}"));
        Ok(())
    }

    async fn read_global(&mut self, name: &str) -> ExportResult<Option<Value>> {
        let mut world = self.world.lock().unwrap();
        if !(world.plays && world.player_open) {
            return Ok(None);
        }
        match name {
            "startRecord" => Ok(Some(json!(1_000))),
            "stopRecord" => {
                world.stop_polls += 1;
                Ok((world.stop_polls >= 3).then(|| json!(4_000)))
            }
            _ => Ok(None),
        }
    }

    async fn press_key(&mut self, key: Key) -> ExportResult<()> {
        note(&self.world, format!("key {key:?}"));
        Ok(())
    }

    async fn back(&mut self) -> ExportResult<()> {
        note(&self.world, "back");
        self.history.pop();
        let url = self.history.last().cloned().unwrap_or_default();
        self.world.lock().unwrap().player_open = url.starts_with("http");
        Ok(())
    }

    async fn refresh(&mut self) -> ExportResult<()> {
        note(&self.world, "refresh");
        Ok(())
    }

    async fn close(&mut self) -> ExportResult<()> {
        note(&self.world, "close");
        Ok(())
    }
}

struct FakeLauncher(Shared);

#[async_trait::async_trait]
impl DriverLauncher for FakeLauncher {
    async fn launch(&self) -> ExportResult<Box<dyn PlaybackDriver>> {
        self.0.lock().unwrap().launches += 1;
        Ok(Box::new(FakeDriver {
            world: Arc::clone(&self.0),
            history: Vec::new(),
        }))
    }
}

struct FakeRecorder {
    world: Shared,
    clock: HostClock,
    session: Option<CaptureSession>,
}

#[async_trait::async_trait]
impl CaptureBackend for FakeRecorder {
    fn kind(&self) -> CaptureBackendKind {
        CaptureBackendKind::Native
    }

    async fn start(&mut self, request: &CaptureRequest) -> ExportResult<CaptureSession> {
        note(&self.world, "capture-start");
        let session = CaptureSession::started(self.kind(), self.clock.now_ms(), 40, request.output.clone());
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn stop(&mut self) -> ExportResult<CaptureSession> {
        note(&self.world, "capture-stop");
        let mut session = self
            .session
            .clone()
            .ok_or_else(|| ExportError::capture_stop("not recording"))?;
        std::fs::write(&session.output_path, b"recording")?;
        session.finish(self.clock.now_ms(), 25);
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn abort(&mut self) -> ExportResult<()> {
        note(&self.world, "capture-abort");
        if let Some(session) = self.session.as_mut() {
            session.finish(self.clock.now_ms(), 0);
        }
        Ok(())
    }

    fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    fn fault(&self) -> Option<String> {
        self.session.as_ref().filter(|s| !s.is_finished())?;
        self.world.lock().unwrap().recorder_fault.clone()
    }

    fn cleanup_hook(&self) -> Option<Arc<dyn CleanupHook>> {
        None
    }
}

struct FixedProbe(bool);

#[async_trait::async_trait]
impl Reachability for FixedProbe {
    async fn reachable(&self, _url: &Url) -> bool {
        self.0
    }
}

fn fits(_width: u32, _height: u32) -> DisplayFit {
    DisplayFit::Fits
}

fn tiny_display(_width: u32, _height: u32) -> DisplayFit {
    DisplayFit::Exceeds {
        monitor: MonitorInfo {
            name: "eDP-1".to_string(),
            width: 800,
            height: 600,
            x: 0,
            y: 0,
            refresh_rate_hz: 60,
            primary: true,
        },
    }
}

struct Harness {
    dir: tempfile::TempDir,
    world: Shared,
    flow: ExportFlow,
}

fn harness(plays: bool, reachable: bool) -> Harness {
    harness_with(plays, reachable, |_| {})
}

fn harness_with(plays: bool, reachable: bool, tweak: impl FnOnce(&mut AppConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let mut config = AppConfig::default();
    config.paths.data_dir = root.join("data");
    config.paths.output_dir = root.join("videos");
    config.paths.assets_dir = root.join("assets");
    config.paths.server_root = root.join("server");
    config.hosting.host = "127.0.0.1".to_string();
    config.hosting.port = 0;
    config.plugin.base_tab_count = 2;
    config.plugin.key_delay_ms = 0;
    std::fs::create_dir_all(&config.paths.server_root).unwrap();
    tweak(&mut config);

    let world: Shared = Arc::new(Mutex::new(World {
        plays,
        ..World::default()
    }));
    let clock = HostClock::start();
    let capture = Capture::with_backend(Box::new(FakeRecorder {
        world: Arc::clone(&world),
        clock: clock.clone(),
        session: None,
    }));
    let flow = ExportFlow::new(
        config,
        clock,
        capture,
        Arc::new(FakeLauncher(Arc::clone(&world))),
        Arc::new(FixedProbe(reachable)),
    )
    .with_display_check(fits)
    .with_timings(FlowTimings {
        bootstrap: Duration::ZERO,
        warning: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
        minute: Duration::from_millis(50),
    });

    Harness { dir, world, flow }
}

fn params(service: &str) -> LayeredParams {
    let mut params = LayeredParams::new(AppConfig::default());
    params
        .set(ParamKey::Service, service)
        .set(ParamKey::AspectRatio, "16:9")
        .set(ParamKey::Resolution, "360p")
        .set(ParamKey::MovieId, "m-1")
        .set(ParamKey::AutoEdit, "false")
        .set(ParamKey::LoadTimeoutMinutes, "1");
    params
}

fn position(log: &[String], prefix: &str) -> usize {
    log.iter()
        .position(|entry| entry.starts_with(prefix))
        .unwrap_or_else(|| panic!("{prefix} missing from {log:?}"))
}

#[tokio::test]
async fn missing_movie_id_fails_before_any_launch() {
    let mut h = harness(true, true);
    let mut params = params("local_beta");
    params.clear(ParamKey::MovieId);

    let err = h.flow.run_cycle(&params).await.unwrap_err();
    assert!(matches!(err, ExportError::Validation { .. }), "{err}");
    assert_eq!(h.flow.state(), FlowState::Failed);
    assert!(h.flow.job().is_none());

    let world = h.world.lock().unwrap();
    assert_eq!(world.launches, 0);
    assert!(world.log.is_empty());
}

#[tokio::test]
async fn oversized_resolution_is_rejected_before_capture() {
    let mut h = harness(true, true);
    h.flow = h.flow.with_display_check(tiny_display);
    let mut params = params("local_beta");
    params.set(ParamKey::Resolution, "1080p");

    let err = h.flow.run_cycle(&params).await.unwrap_err();
    assert!(err.to_string().contains("1920x1080"), "{err}");
    assert_eq!(h.world.lock().unwrap().launches, 0);
}

#[tokio::test]
async fn unreachable_service_stops_before_exporting() {
    let mut h = harness(true, false);
    let params = params("local_beta");

    let err = h.flow.run_cycle(&params).await.unwrap_err();
    assert!(
        matches!(err, ExportError::UnreachableService { local_component: true, .. }),
        "{err}"
    );
    assert_eq!(h.flow.state(), FlowState::Failed);
    assert_eq!(h.world.lock().unwrap().launches, 0);
}

#[tokio::test]
async fn load_timeout_is_distinguishable_and_releases_everything() {
    let mut h = harness(false, true);
    let params = params("local_beta");

    let err = h.flow.run_cycle(&params).await.unwrap_err();
    assert_eq!(err.timeout_kind(), Some(TimeoutKind::Load), "{err}");
    assert!(err.is_timeout());
    assert_eq!(h.flow.state(), FlowState::Failed);
    assert!(h.flow.cleanup().is_empty());

    let world = h.world.lock().unwrap();
    assert_eq!(world.log.last().map(String::as_str), Some("close"));
    // Default timing records only once playback has started.
    assert!(!world.log.iter().any(|e| e == "capture-start"));
}

#[tokio::test]
async fn cycle_without_auto_edit_moves_recording_into_project_folder() {
    let mut h = harness(true, true);
    let params = params("local");

    let first = h.flow.run_cycle(&params).await.unwrap();
    assert_eq!(h.flow.state(), FlowState::Done);
    let folder = h.flow.context().project_folder().unwrap().to_path_buf();
    assert!(folder.starts_with(h.dir.path().join("videos")));
    assert_eq!(first.parent(), Some(folder.as_path()));
    assert_eq!(std::fs::read(&first).unwrap(), b"recording");

    let job = h.flow.job().unwrap();
    assert!(!job.paths.recording.exists());
    let playback = job.playback.unwrap();
    assert_eq!((playback.started_at, playback.ended_at), (1_000, 4_000));
    assert!(job.session.as_ref().unwrap().is_finished());

    {
        let world = h.world.lock().unwrap();
        let log = &world.log;
        let start_page = position(log, "navigate file://");
        let player = position(log, "navigate http://localhost:26519/index.html");
        let settings = position(log, "navigate chrome://settings/content/siteDetails?site=");
        let capture = position(log, "capture-start");
        let resume = position(log, "script (function(){var o=document.getElementById('obj')");
        let stop = position(log, "capture-stop");
        assert!(log[start_page].contains("start.html?obs=false"));
        assert!(log.iter().any(|e| e.contains("warning.html?w=640&h=360")));
        assert!(start_page < player && player < settings && settings < capture);
        assert!(capture < resume && resume < stop);
        assert_eq!(log.iter().filter(|e| *e == "key Tab").count(), 2);
        assert_eq!(log.last().map(String::as_str), Some("close"));
    }

    // A chained cycle reuses the same project folder.
    h.flow.next_cycle();
    let second = h.flow.run_cycle(&params).await.unwrap();
    assert_eq!(second.parent(), Some(folder.as_path()));
    assert_ne!(first, second);

    let finished = h.flow.finalize(true, None).unwrap();
    assert_eq!(finished, folder);
    assert!(h.flow.context().project_folder().is_none());
}

#[tokio::test]
async fn template_wrapper_is_installed_before_the_player_loads() {
    let mut h = harness(true, true);
    let params = params("local_beta");

    h.flow.run_cycle(&params).await.unwrap();

    let world = h.world.lock().unwrap();
    let hook = position(&world.log, "future-script");
    let player = position(&world.log, "navigate http://127.0.0.1:4343/player");
    assert!(hook < player);
    assert!(world.log[hook].contains("_DoFSCommand"));
    assert!(!world.log.iter().any(|e| e.starts_with("navigate http://localhost:26519")));
}

#[tokio::test]
async fn legacy_timing_records_before_navigation() {
    let mut h = harness_with(true, true, |config| {
        config.plugin.legacy_timing = vec!["local_beta".to_string()];
    });

    h.flow.run_cycle(&params("local_beta")).await.unwrap();

    let world = h.world.lock().unwrap();
    let capture = position(&world.log, "capture-start");
    let player = position(&world.log, "navigate http://127.0.0.1:4343/player");
    assert!(capture < player);
    assert!(!world.log.iter().any(|e| e.contains("getElementById('obj')")));
}

#[tokio::test]
async fn export_requires_reachability_check() {
    let mut h = harness(true, true);
    let params = params("local_beta");
    h.flow.configure(&params).unwrap();

    let err = h.flow.export().await.unwrap_err();
    assert!(matches!(err, ExportError::Validation { .. }));
    assert_eq!(h.world.lock().unwrap().launches, 0);
    assert_eq!(h.flow.state(), FlowState::Configuring);
}

/// Shell stand-ins for ffmpeg and ffprobe. ffmpeg logs its arguments to
/// `<root>/bin/calls` and creates its output file; ffprobe reports 10s.
#[cfg(unix)]
fn fake_tools(config: &mut AppConfig) {
    use std::os::unix::fs::PermissionsExt;

    let bin = config.paths.data_dir.parent().unwrap().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let calls = bin.join("calls");
    let scripts = [
        (
            "ffmpeg",
            format!("echo \"$@\" >> '{}'\nfor last; do :; done\n: > \"$last\"", calls.display()),
        ),
        ("ffprobe", "echo 10.0".to_string()),
    ];
    for (name, body) in scripts {
        let path = bin.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    config.tools.ffmpeg = bin.join("ffmpeg");
    config.tools.ffprobe = bin.join("ffprobe");
}

#[cfg(unix)]
fn tool_calls(h: &Harness) -> Vec<String> {
    std::fs::read_to_string(h.dir.path().join("bin").join("calls"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[cfg(unix)]
fn flag_value<'a>(call: &'a str, flag: &str) -> Option<&'a str> {
    let mut words = call.split_whitespace();
    words.find(|w| *w == flag)?;
    words.next()
}

fn write_outro(h: &Harness) {
    let outro = h.dir.path().join("assets/outro/wide/640x360.mp4");
    std::fs::create_dir_all(outro.parent().unwrap()).unwrap();
    std::fs::write(outro, b"outro").unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn auto_edit_trims_to_the_reconciled_window_and_copies_one_clip() {
    let mut h = harness_with(true, true, fake_tools);
    let mut params = params("local");
    params.set(ParamKey::AutoEdit, "true");

    let clip = h.flow.run_cycle(&params).await.unwrap();
    assert_eq!(h.flow.editor().len(), 1);
    assert_eq!(h.flow.editor().clips()[0].path, clip);

    let calls = tool_calls(&h);
    assert_eq!(calls.len(), 1, "{calls:?}");
    // Recording began after playback, so only the stop latency is cut.
    assert_eq!(flag_value(&calls[0], "-ss"), Some("0"));
    assert_eq!(flag_value(&calls[0], "-t"), Some("9.975"));
    assert!(calls[0].ends_with(&clip.display().to_string()));

    let rendered = h.flow.finalize(false, None).unwrap();
    assert!(rendered.starts_with(h.dir.path().join("videos")));
    assert!(rendered.is_file());
    assert!(h.flow.editor().is_empty());

    let calls = tool_calls(&h);
    assert_eq!(calls.len(), 2, "{calls:?}");
    assert_eq!(flag_value(&calls[1], "-f"), Some("concat"));
    assert_eq!(flag_value(&calls[1], "-c"), Some("copy"));
    assert!(!calls[1].contains("libx264"));
}

#[cfg(unix)]
#[tokio::test]
async fn legacy_auto_edit_cuts_the_lead_in() {
    let mut h = harness_with(true, true, |config| {
        fake_tools(config);
        config.plugin.legacy_timing = vec!["local".to_string()];
    });
    let mut params = params("local");
    params.set(ParamKey::AutoEdit, "true");

    h.flow.run_cycle(&params).await.unwrap();

    let job = h.flow.job().unwrap();
    let window = reconcile(
        TimingMode::Legacy,
        job.session.as_ref().unwrap(),
        job.playback.as_ref().unwrap(),
        10_000,
    );
    assert!(window.trim_in_ms > 0, "{window:?}");

    let calls = tool_calls(&h);
    let seek: f64 = flag_value(&calls[0], "-ss").unwrap().parse().unwrap();
    let length: f64 = flag_value(&calls[0], "-t").unwrap().parse().unwrap();
    assert!((seek * 1000.0 - window.trim_in_ms as f64).abs() < 1.0, "{seek} vs {window:?}");
    assert!((length * 1000.0 - window.length_ms() as f64).abs() < 1.0, "{length} vs {window:?}");
}

#[cfg(unix)]
#[tokio::test]
async fn skipped_cycle_leaves_nothing_to_finalize() {
    let mut h = harness_with(false, true, fake_tools);
    write_outro(&h);
    let mut params = params("local");
    params.set(ParamKey::AutoEdit, "true");

    let err = h.flow.run_cycle(&params).await.unwrap_err();
    assert_eq!(err.timeout_kind(), Some(TimeoutKind::Load));

    let err = h.flow.finalize(true, None).unwrap_err();
    assert!(matches!(err, ExportError::Validation { .. }), "{err}");
    assert!(h.flow.editor().is_empty());
    assert!(tool_calls(&h).is_empty());
}

#[tokio::test]
async fn skipped_cycle_without_auto_edit_has_no_project_folder() {
    let mut h = harness(false, true);
    write_outro(&h);

    h.flow.run_cycle(&params("local")).await.unwrap_err();

    let err = h.flow.finalize(true, None).unwrap_err();
    assert!(matches!(err, ExportError::Validation { .. }), "{err}");
    assert!(h.flow.context().project_folder().is_none());
}

#[tokio::test]
async fn recorder_failure_aborts_the_cycle() {
    let mut h = harness(true, true);
    h.world.lock().unwrap().recorder_fault = Some("No space left on device".to_string());

    let err = h.flow.run_cycle(&params("local")).await.unwrap_err();
    assert!(matches!(err, ExportError::CaptureStop { .. }), "{err}");
    assert!(err.to_string().contains("No space left on device"));
    assert_eq!(h.flow.state(), FlowState::Failed);

    let world = h.world.lock().unwrap();
    assert!(world.log.iter().any(|e| e == "capture-abort"));
    assert!(!world.log.iter().any(|e| e == "capture-stop"));
}

#[tokio::test]
async fn timed_out_recording_is_discarded_not_encoded() {
    let mut h = harness_with(false, true, |config| {
        config.plugin.legacy_timing = vec!["local_beta".to_string()];
    });

    let err = h.flow.run_cycle(&params("local_beta")).await.unwrap_err();
    assert_eq!(err.timeout_kind(), Some(TimeoutKind::Load));
    assert!(h.flow.capture().session().unwrap().is_finished());

    let world = h.world.lock().unwrap();
    let start = position(&world.log, "capture-start");
    let abort = position(&world.log, "capture-abort");
    assert!(start < abort);
    assert!(!world.log.iter().any(|e| e == "capture-stop"));
}
