//! Native capture through ffmpeg.
//!
//! Recording is a two-pass affair. The live pass grabs the screen and the
//! default audio monitor into a lossless `<stem>_raw.mkv` with the cheapest
//! possible encoder settings so frames are never dropped. After stop, the
//! encode pass turns that into the deliverable and removes the raw file.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use goexport_common::clock::HostClock;
use goexport_common::config::{AppConfig, EncodeConfig};
use goexport_common::error::{ExportError, ExportResult};
use goexport_common::shutdown::CleanupHook;
use goexport_project_model::session::{CaptureBackendKind, CaptureSession};
use goexport_render_engine::encode::{encode_capture, raw_capture_path, EncodeSettings};
use goexport_render_engine::ffmpeg::Ffmpeg;

use super::{CaptureBackend, CaptureRequest};

/// ffmpeg prints this once the muxer is open and frames are being written.
const STARTED_MARKER: &str = "Output #0";

/// Log lines meaning this machine cannot record at all, as opposed to a
/// one-off failure.
const UNSUPPORTED_MARKERS: &[&str] = &[
    "Unknown input format",
    "Cannot open display",
    "Could not find video device",
    "Could not enumerate video devices",
    "No such device",
    "Protocol not found",
    "Unknown encoder",
];

/// Log lines meaning a running recording is broken even if ffmpeg carries on.
const FAILURE_MARKERS: &[&str] = &[
    "Conversion failed!",
    "No space left on device",
    "Error writing trailer",
    "Input/output error",
    "Broken pipe",
];

const START_TIMEOUT: Duration = Duration::from_secs(20);
const GRACEFUL_STOP: Duration = Duration::from_secs(10);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const HOOK_GRACE: Duration = Duration::from_secs(2);
const LOG_LINES_KEPT: usize = 200;

type SharedChild = Arc<tokio::sync::Mutex<Option<Child>>>;
type SharedWatch = Arc<Mutex<WatchState>>;

/// What the stderr watcher has seen of the live recorder.
#[derive(Debug, Default)]
struct WatchState {
    lines: VecDeque<String>,
    /// First failure reported after the start marker.
    fault: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineFault {
    Unsupported,
    Failed,
}

fn classify_line(line: &str) -> Option<LineFault> {
    if UNSUPPORTED_MARKERS.iter().any(|m| line.contains(m)) {
        Some(LineFault::Unsupported)
    } else if FAILURE_MARKERS.iter().any(|m| line.contains(m)) {
        Some(LineFault::Failed)
    } else {
        None
    }
}

/// Screen grabbing flavours the live pass knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePlatform {
    /// `x11grab` plus a PulseAudio monitor source.
    Linux,
    /// DirectShow screen-capture-recorder plus virtual-audio-capturer.
    Windows,
}

impl CapturePlatform {
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "linux") {
            Some(Self::Linux)
        } else if cfg!(target_os = "windows") {
            Some(Self::Windows)
        } else {
            None
        }
    }
}

/// Arguments of the live pass.
pub fn capture_args(
    platform: CapturePlatform,
    raw: &Path,
    width: u32,
    height: u32,
    audio_source: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into()];
    match platform {
        CapturePlatform::Linux => {
            args.extend(
                [
                    "-f",
                    "x11grab",
                    "-s",
                    &format!("{width}x{height}"),
                    "-i",
                    ":0.0",
                    "-f",
                    "pulse",
                    "-i",
                    audio_source,
                    "-ac",
                    "2",
                ]
                .iter()
                .map(|s| s.to_string()),
            );
        }
        CapturePlatform::Windows => {
            args.extend(
                [
                    "-f",
                    "dshow",
                    "-rtbufsize",
                    "1500M",
                    "-i",
                    "video=screen-capture-recorder:audio=virtual-audio-capturer",
                    "-vf",
                    &format!("crop={width}:{height}:0:0"),
                ]
                .iter()
                .map(|s| s.to_string()),
            );
        }
    }
    args.extend(
        [
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-crf",
            "0",
            "-tune",
            "zerolatency",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "pcm_s16le",
            "-ar",
            "44100",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(raw.display().to_string());
    args
}

struct LiveCapture {
    raw: PathBuf,
    output: PathBuf,
    width: u32,
    height: u32,
    start_offset: i64,
}

/// ffmpeg-driven recorder.
pub struct NativeBackend {
    ffmpeg: Ffmpeg,
    audio_source: String,
    encode: EncodeConfig,
    clock: HostClock,
    platform: Option<CapturePlatform>,
    child: SharedChild,
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
    watch: SharedWatch,
    watcher: Option<JoinHandle<()>>,
    live: Option<LiveCapture>,
    session: Option<CaptureSession>,
}

impl NativeBackend {
    pub fn new(ffmpeg: Ffmpeg, audio_source: impl Into<String>, encode: EncodeConfig, clock: HostClock) -> Self {
        Self {
            ffmpeg,
            audio_source: audio_source.into(),
            encode,
            clock,
            platform: CapturePlatform::current(),
            child: Arc::new(tokio::sync::Mutex::new(None)),
            stdin: None,
            pid: None,
            watch: Arc::default(),
            watcher: None,
            live: None,
            session: None,
        }
    }

    pub fn from_config(config: &AppConfig, clock: HostClock) -> Self {
        Self::new(
            Ffmpeg::from_tools(&config.tools),
            config.tools.audio_source.clone(),
            config.encode.clone(),
            clock,
        )
    }

    /// Override the detected platform. `None` means unsupported.
    pub fn with_platform(mut self, platform: Option<CapturePlatform>) -> Self {
        self.platform = platform;
        self
    }

    /// Process id of the live recorder.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn log_tail(&self) -> String {
        let watch = lock_watch(&self.watch);
        watch.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    /// End the recorder process and close the session, without encoding.
    async fn halt(&mut self) -> ExportResult<(LiveCapture, CaptureSession)> {
        let live = self
            .live
            .take()
            .ok_or_else(|| ExportError::capture_stop("No native capture is running"))?;
        tracing::debug!(since_start_request_ms = self.clock.now_ms() - live.start_offset, "Stopping native capture");

        let offset = self.clock.stamp("Native capture stopping");
        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return Err(ExportError::capture_stop("The recorder process was already released"));
        };

        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                tracing::warn!(error = %e, "Could not ask ffmpeg to stop");
            }
            let _ = stdin.flush().await;
        }

        let status = match tokio::time::timeout(GRACEFUL_STOP, child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                tracing::warn!("ffmpeg did not stop gracefully, terminating");
                terminate_then_kill(&mut child, TERMINATE_GRACE).await
            }
        };
        let end_time = self.clock.stamp("Native capture ended");
        let ended_delay = end_time - offset;
        self.pid = None;
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.await;
        }
        tracing::info!(status = ?status, ended_delay_ms = ended_delay, "Native capture stopped");

        let mut session = self
            .session
            .take()
            .ok_or_else(|| ExportError::capture_stop("Capture session missing"))?;
        session.finish(end_time, ended_delay);
        Ok((live, session))
    }
}

#[async_trait::async_trait]
impl CaptureBackend for NativeBackend {
    fn kind(&self) -> CaptureBackendKind {
        CaptureBackendKind::Native
    }

    async fn start(&mut self, request: &CaptureRequest) -> ExportResult<CaptureSession> {
        if self.live.is_some() {
            return Err(ExportError::capture_start("A native capture is already running"));
        }
        let platform = self.platform.ok_or_else(|| {
            ExportError::recorder_unsupported(format!(
                "Native capture is not available on {}",
                std::env::consts::OS
            ))
        })?;

        let raw = raw_capture_path(&request.output);
        if let Some(parent) = raw.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let args = capture_args(platform, &raw, request.width, request.height, &self.audio_source);
        tracing::debug!(args = ?args, "Native capture command");

        let mut cmd = Command::new(self.ffmpeg.ffmpeg_path());
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let offset = self.clock.stamp("Native capture starting");
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExportError::recorder_unsupported(format!(
                    "ffmpeg not found at {}: {e}",
                    self.ffmpeg.ffmpeg_path().display()
                ))
            } else {
                ExportError::capture_start(format!("Failed to start ffmpeg: {e}"))
            }
        })?;
        let pid = child.id();
        let stdin = child.stdin.take();
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExportError::capture_start("Failed to capture ffmpeg stderr"))?;

        *lock_watch(&self.watch) = WatchState::default();
        let (started_tx, started_rx) = oneshot::channel();
        let mut watcher = tokio::spawn(watch_stderr(
            stderr,
            self.clock.clone(),
            started_tx,
            Arc::clone(&self.watch),
        ));

        let start_time = match tokio::time::timeout(START_TIMEOUT, started_rx).await {
            Ok(Ok(start_time)) => start_time,
            Ok(Err(_)) => {
                // Stderr closed before the marker: ffmpeg gave up.
                let status = child.wait().await.ok();
                let _ = (&mut watcher).await;
                tracing::error!(status = ?status, "Native capture exited during startup");
                return Err(classify_start_failure(&lock_watch(&self.watch).lines));
            }
            Err(_) => {
                let _ = child.kill().await;
                watcher.abort();
                return Err(ExportError::capture_start(format!(
                    "ffmpeg did not begin writing within {}s:\n{}",
                    START_TIMEOUT.as_secs(),
                    self.log_tail()
                )));
            }
        };

        let startup_delay = start_time - offset;
        tracing::info!(
            pid = ?pid,
            raw = %raw.display(),
            startup_delay_ms = startup_delay,
            "Native capture started"
        );

        *self.child.lock().await = Some(child);
        self.stdin = stdin;
        self.pid = pid;
        self.watcher = Some(watcher);
        self.live = Some(LiveCapture {
            raw,
            output: request.output.clone(),
            width: request.width,
            height: request.height,
            start_offset: offset,
        });
        let session = CaptureSession::started(
            CaptureBackendKind::Native,
            start_time,
            startup_delay,
            request.output.clone(),
        );
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn stop(&mut self) -> ExportResult<CaptureSession> {
        let (live, mut session) = self.halt().await?;
        let fault = lock_watch(&self.watch).fault.clone();
        if let Some(fault) = fault {
            self.session = Some(session);
            return Err(ExportError::capture_stop(format!(
                "The recorder failed while recording ({fault}); raw footage kept at {}",
                live.raw.display()
            )));
        }

        let ffmpeg = self.ffmpeg.clone();
        let settings = EncodeSettings::from_config(&self.encode, live.width, live.height);
        let raw = live.raw.clone();
        let output = live.output.clone();
        tokio::task::spawn_blocking(move || encode_capture(&ffmpeg, &raw, &output, &settings))
            .await
            .map_err(|e| ExportError::capture_stop(format!("Encode task failed: {e}")))?
            .map_err(|e| ExportError::capture_stop(format!("Encoding the capture failed: {e}")))?;

        session.output_path = live.output;
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn abort(&mut self) -> ExportResult<()> {
        let (live, session) = self.halt().await?;
        self.session = Some(session);
        if let Err(e) = std::fs::remove_file(&live.raw) {
            tracing::debug!(raw = %live.raw.display(), error = %e, "Raw capture not removed");
        }
        Ok(())
    }

    fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    fn fault(&self) -> Option<String> {
        self.live.as_ref()?;
        lock_watch(&self.watch).fault.clone()
    }

    fn cleanup_hook(&self) -> Option<Arc<dyn CleanupHook>> {
        self.live.as_ref()?;
        Some(Arc::new(NativeCleanup {
            child: Arc::clone(&self.child),
        }))
    }
}

/// Terminates a recorder left running at interruption.
struct NativeCleanup {
    child: SharedChild,
}

#[async_trait::async_trait]
impl CleanupHook for NativeCleanup {
    fn name(&self) -> &str {
        "native-capture"
    }

    async fn run(&self) {
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            tracing::info!(pid = ?child.id(), "Terminating recorder on exit");
            terminate_then_kill(&mut child, HOOK_GRACE).await;
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate_then_kill(child: &mut Child, grace: Duration) -> Option<std::process::ExitStatus> {
    send_terminate(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            tracing::error!(pid = ?child.id(), "Recorder ignored SIGTERM, killing");
            let _ = child.kill().await;
            child.wait().await.ok()
        }
    }
}

fn send_terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain signal delivery to a child we spawned.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

async fn watch_stderr(
    stderr: ChildStderr,
    clock: HostClock,
    started: oneshot::Sender<i64>,
    watch: SharedWatch,
) {
    let mut started = Some(started);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::trace!(target: "ffmpeg", "{line}");
        let mut state = lock_watch(&watch);
        if started.is_some() {
            if line.contains(STARTED_MARKER) {
                let ts = clock.stamp("Native capture started");
                if let Some(tx) = started.take() {
                    let _ = tx.send(ts);
                }
            }
        } else if state.fault.is_none() && classify_line(&line).is_some() {
            tracing::error!(line = %line, "Recorder reported a failure while recording");
            state.fault = Some(line.clone());
        }
        if state.lines.len() >= LOG_LINES_KEPT {
            state.lines.pop_front();
        }
        state.lines.push_back(line);
    }
}

fn classify_start_failure(lines: &VecDeque<String>) -> ExportError {
    let tail = lines
        .iter()
        .skip(lines.len().saturating_sub(20))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    let unsupported = lines
        .iter()
        .any(|line| classify_line(line) == Some(LineFault::Unsupported));
    if unsupported {
        ExportError::recorder_unsupported(format!("This system cannot record the screen:\n{tail}"))
    } else {
        ExportError::capture_start(format!("ffmpeg exited before recording:\n{tail}"))
    }
}

fn lock_watch(watch: &SharedWatch) -> std::sync::MutexGuard<'_, WatchState> {
    watch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
