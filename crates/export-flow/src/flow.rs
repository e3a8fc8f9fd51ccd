//! Export cycle orchestration.
//!
//! One [`ExportFlow`] owns the capture facade, the clip editor and the
//! session context for the lifetime of the process. Each cycle walks
//! `configure -> check_reachability -> export -> edit`; cycles can be chained
//! before a single [`ExportFlow::finalize`] renders everything collected.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use goexport_capture_engine::{Capture, CaptureRequest};
use goexport_common::clock::HostClock;
use goexport_common::config::AppConfig;
use goexport_common::context::SessionContext;
use goexport_common::error::{ExportError, ExportResult, TimeoutKind};
use goexport_common::params::{parse_bool, ParamKey, ParamSource};
use goexport_common::shutdown::{CleanupRegistry, HookId};
use goexport_platform::display::{check_display_fits, DisplayFit};
use goexport_project_model::job::{readable_name, unique_output_path, ExportJob, JobPaths, OUTPUT_EXTENSION};
use goexport_project_model::outro::outro_path;
use goexport_project_model::resolution::{AspectRatio, Resolution};
use goexport_project_model::service::{service, ServiceDescriptor, TimingMode};
use goexport_project_model::session::{CaptureSession, PlaybackEvent};
use goexport_render_engine::{Editor, Ffmpeg, ProgressCallback, RenderOptions};

use crate::driver::{DriverLauncher, PlaybackDriver};
use crate::hosting::StaticServer;
use crate::plugin::enable_plugin;
use crate::reachability::{check_service, Reachability};
use crate::reconcile::reconcile;
use crate::scripts;
use crate::state::{ExportPhase, FlowState};
use crate::wait::{minutes_of, wait_until, WaitOutcome};

type SharedDriver = Arc<Mutex<Box<dyn PlaybackDriver>>>;

/// Checks a capture size against the display.
pub type DisplayCheck = fn(u32, u32) -> DisplayFit;

/// Pauses and poll rates of a cycle.
#[derive(Debug, Clone)]
pub struct FlowTimings {
    /// How long the bootstrap page stays up.
    pub bootstrap: Duration,
    /// How long the "hands off" page stays up before native capture.
    pub warning: Duration,
    /// Page-global poll interval.
    pub poll_interval: Duration,
    /// Length of one configured timeout minute.
    pub minute: Duration,
}

impl Default for FlowTimings {
    fn default() -> Self {
        Self {
            bootstrap: Duration::from_secs(2),
            warning: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
            minute: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Limits {
    load: Option<Duration>,
    completion: Option<Duration>,
}

/// Resources that live for the exporting phase only.
#[derive(Default)]
struct Cycle {
    server: Option<StaticServer>,
    driver: Option<SharedDriver>,
    hooks: Vec<HookId>,
}

/// The export state machine.
pub struct ExportFlow {
    config: AppConfig,
    clock: HostClock,
    capture: Capture,
    launcher: Arc<dyn DriverLauncher>,
    probe: Arc<dyn Reachability>,
    editor: Editor,
    context: SessionContext,
    cleanup: CleanupRegistry,
    state: FlowState,
    job: Option<ExportJob>,
    limits: Limits,
    timings: FlowTimings,
    display_check: DisplayCheck,
}

impl ExportFlow {
    pub fn new(
        config: AppConfig,
        clock: HostClock,
        capture: Capture,
        launcher: Arc<dyn DriverLauncher>,
        probe: Arc<dyn Reachability>,
    ) -> Self {
        let editor = Editor::new(Ffmpeg::from_tools(&config.tools), config.paths.data_dir.clone());
        Self {
            config,
            clock,
            capture,
            launcher,
            probe,
            editor,
            context: SessionContext::new(),
            cleanup: CleanupRegistry::new(),
            state: FlowState::Idle,
            job: None,
            limits: Limits::default(),
            timings: FlowTimings::default(),
            display_check: check_display_fits,
        }
    }

    pub fn with_timings(mut self, timings: FlowTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_display_check(mut self, check: DisplayCheck) -> Self {
        self.display_check = check;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupRegistry) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn job(&self) -> Option<&ExportJob> {
        self.job.as_ref()
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn capture(&self) -> &Capture {
        &self.capture
    }

    /// Registry the signal handler drains on interruption.
    pub fn cleanup(&self) -> CleanupRegistry {
        self.cleanup.clone()
    }

    /// Run one full cycle and return the clip it produced.
    pub async fn run_cycle(&mut self, params: &dyn ParamSource) -> ExportResult<PathBuf> {
        self.configure(params)?;
        self.check_reachability().await?;
        self.export().await?;
        self.edit()
    }

    /// Resolve and validate the next job. On failure the previous job is
    /// left untouched.
    pub fn configure(&mut self, params: &dyn ParamSource) -> ExportResult<&ExportJob> {
        if !self.state.can_configure() {
            return Err(ExportError::validation(format!(
                "Cannot start a new export while {}",
                self.state
            )));
        }
        self.state = FlowState::Configuring;

        match self.build_job(params) {
            Ok((job, limits)) => {
                tracing::info!(
                    service = job.service.key,
                    aspect = %job.aspect,
                    resolution = %job.resolution,
                    auto_edit = job.auto_edit,
                    timing = ?self.timing_mode(job.service),
                    "Export configured"
                );
                self.limits = limits;
                Ok(self.job.insert(job))
            }
            Err(e) => {
                self.state = FlowState::Failed;
                Err(e)
            }
        }
    }

    /// Probe the configured service before anything is launched.
    pub async fn check_reachability(&mut self) -> ExportResult<()> {
        let service = self.configured()?.service;
        self.state = FlowState::ReachabilityCheck;
        if let Err(e) = check_service(self.probe.as_ref(), service).await {
            tracing::error!(service = service.key, error = %e, "Service unreachable");
            self.state = FlowState::Failed;
            return Err(e);
        }
        Ok(())
    }

    /// Drive playback while recording. Every resource started here is
    /// released before this returns, whether it succeeds or not.
    pub async fn export(&mut self) -> ExportResult<()> {
        if self.state != FlowState::ReachabilityCheck {
            return Err(ExportError::validation(
                "The service must pass the reachability check before exporting",
            ));
        }
        let mut job = self.configured()?.clone();
        job.clear_measurements();

        if self.context.recorder_unsupported() {
            self.state = FlowState::Failed;
            return Err(ExportError::recorder_unsupported(
                "The screen recorder already failed to start in this session",
            ));
        }

        let mut cycle = Cycle::default();
        let result = self.drive(&job, &mut cycle).await;
        self.teardown(&mut cycle).await;

        match result {
            Ok((session, playback)) => {
                tracing::info!(
                    recording = %session.output_path.display(),
                    playback_ms = playback.length_ms(),
                    startup_delay = session.startup_delay,
                    "Capture complete"
                );
                job.session = Some(session);
                job.playback = Some(playback);
                self.job = Some(job);
                Ok(())
            }
            Err(e) => {
                if e.is_timeout() {
                    tracing::warn!(error = %e, "Export skipped");
                } else {
                    tracing::error!(error = %e, "Export aborted");
                }
                self.state = FlowState::Failed;
                Err(e)
            }
        }
    }

    /// Turn the recording into a clip: trimmed into the editor with
    /// auto-edit, otherwise moved untouched into the project folder.
    pub fn edit(&mut self) -> ExportResult<PathBuf> {
        if !self.state.is_exporting() {
            return Err(ExportError::validation("Nothing has been exported in this cycle"));
        }
        let job = self.configured()?;
        let (Some(session), Some(playback)) = (job.session.clone(), job.playback) else {
            return Err(ExportError::validation("Nothing has been recorded yet"));
        };
        let mode = self.timing_mode(job.service);
        let auto_edit = job.auto_edit;
        let project_folder = job.paths.project_folder.clone();

        self.state = FlowState::Editing;
        let result = if auto_edit {
            self.add_trimmed(mode, &session, &playback)
        } else {
            self.move_to_project(&session.output_path, project_folder)
        };
        match result {
            Ok(path) => {
                self.state = FlowState::Done;
                Ok(path)
            }
            Err(e) => {
                tracing::error!(error = %e, "Editing failed");
                self.state = FlowState::Failed;
                Err(e)
            }
        }
    }

    /// Produce the deliverable. With auto-edit, every collected clip (plus
    /// the outro) is rendered to a fresh file; otherwise the outro is copied
    /// into the project folder and the folder is returned.
    ///
    /// Fails with a validation error when no cycle produced a recording, so
    /// an outro is never rendered on its own.
    pub fn finalize(&mut self, include_outro: bool, progress: Option<ProgressCallback>) -> ExportResult<PathBuf> {
        if matches!(self.state, FlowState::Exporting(_) | FlowState::Editing) {
            return Err(ExportError::validation(format!("Cannot finalize while {}", self.state)));
        }
        let job = self.configured()?.clone();

        if !job.auto_edit {
            let folder = self
                .context
                .project_folder()
                .map(Path::to_path_buf)
                .ok_or_else(|| ExportError::validation("No recording was moved into a project folder"))?;
            let outro = if include_outro { self.outro_for(&job) } else { None };
            if let Some(outro) = outro {
                std::fs::create_dir_all(&folder)?;
                let name = outro.file_name().map(PathBuf::from).unwrap_or_else(|| "outro.mp4".into());
                let target = unique_output_path(&folder.join(name));
                std::fs::copy(&outro, &target)?;
                tracing::info!(path = %target.display(), "Outro copied into project folder");
            }
            self.context.clear_project_folder();
            tracing::info!(folder = %folder.display(), "Project folder ready");
            return Ok(folder);
        }

        if self.editor.is_empty() {
            return Err(ExportError::validation("No clip was captured, nothing to render"));
        }
        let outro = if include_outro { self.outro_for(&job) } else { None };
        let outro_added = match outro {
            Some(outro) => {
                self.editor.add(outro, None)?;
                true
            }
            None => false,
        };
        let options = RenderOptions {
            width: job.resolution.width,
            height: job.resolution.height,
            fps: self.config.encode.framerate,
            reencode: outro_added || self.editor.len() > 1,
        };
        let output = unique_output_path(&job.paths.rendered);
        let rendered = self.editor.render(&output, &options, progress)?;
        self.editor.reset();
        tracing::info!(path = %rendered.display(), "Video rendered");
        Ok(rendered)
    }

    /// Prepare another cycle, keeping the clips collected so far.
    pub fn next_cycle(&mut self) {
        self.job = None;
        self.state = FlowState::Idle;
    }

    /// Forget everything collected so far.
    pub fn reset(&mut self) {
        self.editor.reset();
        self.context.clear_project_folder();
        self.next_cycle();
    }

    fn configured(&self) -> ExportResult<&ExportJob> {
        self.job
            .as_ref()
            .ok_or_else(|| ExportError::validation("No export has been configured"))
    }

    fn timing_mode(&self, service: &ServiceDescriptor) -> TimingMode {
        if service.timing == TimingMode::Legacy || self.config.plugin.uses_legacy_timing(service.key) {
            TimingMode::Legacy
        } else {
            TimingMode::Default
        }
    }

    fn build_job(&self, params: &dyn ParamSource) -> ExportResult<(ExportJob, Limits)> {
        let key = params
            .resolve(ParamKey::Service)
            .ok_or_else(|| ExportError::validation("No service selected"))?;
        let service = service(&key).map_err(invalid)?;

        let aspect = match params.resolve(ParamKey::AspectRatio) {
            Some(value) => value.parse::<AspectRatio>().map_err(invalid)?,
            None => AspectRatio::DEFAULT,
        };
        let resolution = resolve_resolution(params, aspect)?;

        let auto_edit = match params.resolve(ParamKey::AutoEdit) {
            Some(value) => parse_bool(&value)
                .ok_or_else(|| ExportError::validation(format!("Invalid auto-edit value: {value}")))?,
            None => true,
        };

        let name = readable_name();
        let mut paths = JobPaths::new(&self.config.paths.data_dir, &self.config.paths.output_dir, &name);
        if let Some(output) = params.resolve(ParamKey::OutputPath) {
            let output = PathBuf::from(output);
            paths.rendered = if output.is_dir() {
                output.join(format!("{name}.{OUTPUT_EXTENSION}"))
            } else {
                output
            };
        }

        let mut job = ExportJob::new(service, aspect, resolution, auto_edit, paths);
        job.movie_id = params.resolve(ParamKey::MovieId).map(|v| v.trim().to_string());
        job.owner_id = params.resolve(ParamKey::OwnerId).map(|v| v.trim().to_string());

        let vars = job.template_vars();
        service.validate(&vars).map_err(invalid)?;
        service.player_url(&vars).map_err(invalid)?;

        if resolution.exceeds_recommended() {
            tracing::warn!(
                resolution = %resolution,
                "Resolutions above 1280x720 may record unreliably"
            );
        }
        if let DisplayFit::Exceeds { monitor } = (self.display_check)(resolution.width, resolution.height) {
            return Err(ExportError::validation(format!(
                "{} does not fit on display {} ({}x{})",
                resolution.size_label(),
                monitor.name,
                monitor.width,
                monitor.height
            )));
        }

        let limits = Limits {
            load: minutes_of(
                minutes_param(params, ParamKey::LoadTimeoutMinutes, self.config.timeouts.load_minutes)?,
                self.timings.minute,
            ),
            completion: minutes_of(
                minutes_param(
                    params,
                    ParamKey::CompletionTimeoutMinutes,
                    self.config.timeouts.completion_minutes,
                )?,
                self.timings.minute,
            ),
        };
        Ok((job, limits))
    }

    async fn drive(&mut self, job: &ExportJob, cycle: &mut Cycle) -> ExportResult<(CaptureSession, PlaybackEvent)> {
        let service = job.service;
        let vars = job.template_vars();
        let mode = self.timing_mode(service);
        let obs = self.capture.is_obs();
        self.state = FlowState::Exporting(ExportPhase::DrivingPlayback);

        if service.needs_hosting {
            let server = StaticServer::start(self.config.paths.server_root.clone(), &self.config.hosting).await?;
            tracing::info!(addr = %server.addr(), "Hosting player files");
            cycle.server = Some(server);
        }

        let driver = self.launcher.launch().await?;
        if let Some(hook) = driver.cleanup_hook() {
            cycle.hooks.push(self.cleanup.register(hook));
        }
        let driver: SharedDriver = Arc::new(Mutex::new(driver));
        cycle.driver = Some(Arc::clone(&driver));

        let assets = self.config.paths.assets_dir.clone();
        driver.lock().await.navigate(&scripts::start_page(&assets, obs)).await?;
        tokio::time::sleep(self.timings.bootstrap).await;
        if !obs {
            let page = scripts::warning_page(&assets, job.resolution.width, job.resolution.height);
            driver.lock().await.navigate(&page).await?;
            tokio::time::sleep(self.timings.warning).await;
        }

        let request = CaptureRequest {
            output: job.paths.recording.clone(),
            width: job.resolution.width,
            height: job.resolution.height,
            window_title: service.window_title.to_string(),
        };
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if mode == TimingMode::Legacy {
            self.start_capture(&request, cycle).await?;
        }

        {
            let mut page = driver.lock().await;
            if service.template_wrapper {
                page.inject_script_on_future_loads(scripts::FSCOMMAND_HOOK).await?;
            }
            let url = service.player_url(&vars).map_err(invalid)?;
            tracing::info!(url = %url, "Opening player");
            page.navigate(url.as_str()).await?;
            enable_plugin(
                &mut **page,
                self.config.plugin.tab_count_for(service.key),
                Duration::from_millis(self.config.plugin.key_delay_ms),
            )
            .await?;
            for script in service.post_load_scripts(&vars) {
                page.inject_script_now(&script).await?;
            }
        }

        let (started_at, observed_started) = self
            .await_global(&driver, scripts::STARTED_GLOBAL, self.limits.load)
            .await?
            .or_timeout(TimeoutKind::Load, "The movie never started playing")?;
        self.clock.stamp("playback-started");

        if mode == TimingMode::Default {
            self.start_capture(&request, cycle).await?;
            driver.lock().await.inject_script_now(scripts::RESUME_PLAYBACK).await?;
        }

        let (ended_at, observed_ended) = self
            .await_global(&driver, scripts::STOPPED_GLOBAL, self.limits.completion)
            .await?
            .or_timeout(TimeoutKind::Video, "The movie never finished playing")?;
        self.clock.stamp("playback-ended");

        let session = self.capture.stop().await?;
        Ok((
            session,
            PlaybackEvent {
                started_at,
                ended_at,
                observed_started,
                observed_ended,
            },
        ))
    }

    async fn start_capture(&mut self, request: &CaptureRequest, cycle: &mut Cycle) -> ExportResult<()> {
        match self.capture.start(request).await {
            Ok(_) => {
                if let Some(hook) = self.capture.cleanup_hook() {
                    cycle.hooks.push(self.cleanup.register(hook));
                }
                self.state = FlowState::Exporting(ExportPhase::Capturing);
                Ok(())
            }
            Err(e) => {
                if matches!(e, ExportError::RecorderUnsupported { .. }) {
                    self.context.mark_recorder_unsupported();
                }
                Err(e)
            }
        }
    }

    async fn await_global(
        &self,
        driver: &SharedDriver,
        name: &'static str,
        timeout: Option<Duration>,
    ) -> ExportResult<WaitOutcome<i64>> {
        tracing::debug!(global = name, ?timeout, "Waiting for page");
        let capture = &self.capture;
        wait_until(&self.clock, timeout, self.timings.poll_interval, || {
            let driver = Arc::clone(driver);
            let fault = capture.fault();
            async move {
                if let Some(fault) = fault {
                    return Err(ExportError::capture_stop(format!("The recorder failed: {fault}")));
                }
                let value = driver.lock().await.read_global(name).await?;
                value.map(|v| page_timestamp(name, &v)).transpose()
            }
        })
        .await
    }

    /// Release everything the cycle opened. A capture still live here
    /// belongs to a failed cycle, so it is discarded rather than encoded.
    async fn teardown(&mut self, cycle: &mut Cycle) {
        if self.capture.session().is_some_and(|s| !s.is_finished()) {
            if let Err(e) = self.capture.abort().await {
                tracing::warn!(error = %e, "Could not discard capture during teardown");
            }
        }
        if let Some(driver) = cycle.driver.take() {
            if let Err(e) = driver.lock().await.close().await {
                tracing::warn!(error = %e, "Could not close browser cleanly");
            }
        }
        if let Some(mut server) = cycle.server.take() {
            server.stop().await;
        }
        for id in cycle.hooks.drain(..) {
            self.cleanup.unregister(id);
        }
    }

    fn add_trimmed(&mut self, mode: TimingMode, session: &CaptureSession, playback: &PlaybackEvent) -> ExportResult<PathBuf> {
        let index = self.editor.add(session.output_path.clone(), None)?;
        let clip_length_ms = HostClock::secs_to_ms(self.editor.length(index)?);
        let window = reconcile(mode, session, playback, clip_length_ms);
        if window.is_whole_clip() {
            tracing::info!(clip_length_ms, "Keeping whole clip");
            return Ok(session.output_path.clone());
        }
        self.editor.trim(
            index,
            HostClock::ms_to_secs(window.trim_in_ms),
            HostClock::ms_to_secs(window.trim_out_ms),
        )
    }

    fn move_to_project(&mut self, recording: &Path, default_folder: PathBuf) -> ExportResult<PathBuf> {
        let folder = match self.context.project_folder() {
            Some(folder) => folder.to_path_buf(),
            None => {
                self.context.set_project_folder(&default_folder);
                default_folder
            }
        };
        std::fs::create_dir_all(&folder)?;
        let name = recording
            .file_name()
            .ok_or_else(|| ExportError::FileNotFound {
                path: recording.to_path_buf(),
            })?;
        let target = unique_output_path(&folder.join(name));
        move_file(recording, &target)?;
        tracing::info!(path = %target.display(), "Recording moved into project folder");
        Ok(target)
    }

    fn outro_for(&self, job: &ExportJob) -> Option<PathBuf> {
        let path = outro_path(&self.config.paths.assets_dir, job.aspect, &job.resolution);
        if path.is_file() {
            Some(path)
        } else {
            tracing::warn!(path = %path.display(), "No outro for this resolution, continuing without it");
            None
        }
    }
}

fn invalid(e: impl std::fmt::Display) -> ExportError {
    ExportError::validation(e.to_string())
}

/// An explicitly supplied resolution must exist for the aspect ratio; a
/// remembered one that does not falls back to the default.
fn resolve_resolution(params: &dyn ParamSource, aspect: AspectRatio) -> ExportResult<Resolution> {
    if let Some(label) = params.get_param(ParamKey::Resolution).filter(|v| !v.trim().is_empty()) {
        return aspect.resolution(&label).map_err(invalid);
    }
    Ok(params
        .get_config(ParamKey::Resolution)
        .and_then(|label| aspect.resolution(&label).ok())
        .unwrap_or_else(|| aspect.default_resolution()))
}

fn minutes_param(params: &dyn ParamSource, key: ParamKey, default: u64) -> ExportResult<u64> {
    match params.resolve(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ExportError::validation(format!("Invalid {key}: {value}"))),
        None => Ok(default),
    }
}

fn page_timestamp(name: &str, value: &Value) -> ExportResult<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
        .ok_or_else(|| ExportError::driver(format!("{name} is not a timestamp: {value}")))
}

fn move_file(from: &Path, to: &Path) -> ExportResult<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)?;
    Ok(())
}
