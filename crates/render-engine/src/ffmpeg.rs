//! ffmpeg/ffprobe process runner.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use goexport_common::config::ToolPaths;
use goexport_common::error::{ExportError, ExportResult};

/// Progress callback for long ffmpeg runs.
pub type ProgressCallback = Box<dyn Fn(RenderProgress) + Send>;

/// Render progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Seconds of output written so far.
    pub out_time_secs: f64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    pub stage: RenderStage,
}

/// Stages of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Rendering,
    Finalizing,
    Complete,
}

/// Locations of the ffmpeg binaries.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_tools(tools: &ToolPaths) -> Self {
        Self::new(&tools.ffmpeg, &tools.ffprobe)
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    /// Whether both binaries can be found.
    pub fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg) && command_exists(&self.ffprobe)
    }

    /// Run ffmpeg to completion. Returns its stderr log.
    pub fn run<I, S>(&self, args: I) -> ExportResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.run_with_progress(args, 0.0, None)
    }

    /// Run ffmpeg with `-progress pipe:1`, reporting against `expected_secs`.
    pub fn run_with_progress<I, S>(
        &self,
        args: I,
        expected_secs: f64,
        progress: Option<ProgressCallback>,
    ) -> ExportResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        tracing::debug!(args = ?args, "Running ffmpeg");

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-nostdin", "-progress", "pipe:1", "-nostats"])
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let start = std::time::Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| ExportError::render(format!("Failed to start ffmpeg: {e}")))?;

        tracing::debug!(pid = child.id(), args_len = args.len(), "ffmpeg process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExportError::render("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExportError::render("Failed to capture ffmpeg stderr"))?;

        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        let mut state = ProgressState::default();
        loop {
            line.clear();
            let bytes = reader
                .read_line(&mut line)
                .map_err(|e| ExportError::render(format!("Failed reading ffmpeg progress: {e}")))?;
            if bytes == 0 {
                break;
            }
            if let Some((key, value)) = line.trim().split_once('=') {
                state.update(key, value);
                if key == "progress" {
                    if let Some(cb) = &progress {
                        cb(progress_report(
                            &state,
                            expected_secs,
                            start.elapsed().as_secs_f64(),
                        ));
                    }
                }
            }
        }

        let status = child
            .wait()
            .map_err(|e| ExportError::render(format!("Failed to wait on ffmpeg: {e}")))?;

        let stderr_output = stderr_task
            .join()
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(ExportError::render(format!(
                "ffmpeg failed (status {}): {}",
                status,
                tail(&stderr_output, 20)
            )));
        }

        if let Some(cb) = &progress {
            cb(RenderProgress {
                progress: 1.0,
                out_time_secs: state.out_time_secs,
                eta_secs: 0.0,
                stage: RenderStage::Complete,
            });
        }

        Ok(stderr_output)
    }

    /// Container duration in seconds.
    pub fn probe_duration(&self, path: &Path) -> ExportResult<f64> {
        let raw = self.probe(
            path,
            &[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
        )?;
        parse_duration(&raw).ok_or_else(|| {
            ExportError::render(format!(
                "Could not read duration of {}: {:?}",
                path.display(),
                raw.trim()
            ))
        })
    }

    /// Duration of the first video stream in seconds.
    pub fn probe_video_duration(&self, path: &Path) -> ExportResult<f64> {
        let raw = self.probe(
            path,
            &[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
        )?;
        match parse_duration(&raw) {
            Some(secs) => Ok(secs),
            // Matroska leaves stream duration unset.
            None => self.probe_duration(path),
        }
    }

    /// Width and height of the first video stream.
    pub fn probe_dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        let raw = self
            .probe(
                path,
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=width,height",
                    "-of",
                    "csv=p=0:s=x",
                ],
            )
            .ok()?;
        let line = raw.lines().next()?.trim();
        let (w, h) = line.split_once('x')?;
        let width = w.parse::<u32>().ok()?;
        let height = h.parse::<u32>().ok()?;
        if width == 0 || height == 0 {
            return None;
        }
        Some((width, height))
    }

    fn probe(&self, path: &Path, args: &[&str]) -> ExportResult<String> {
        let output = Command::new(&self.ffprobe)
            .args(args)
            .arg(path)
            .output()
            .map_err(|e| ExportError::render(format!("Failed to start ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(ExportError::render(format!(
                "ffprobe failed on {} (status {}): {}",
                path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Whether `binary` resolves to an executable.
pub fn command_exists(binary: &Path) -> bool {
    if binary.components().count() > 1 {
        return binary.is_file();
    }
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {} >/dev/null 2>&1", binary.display()))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && *l != "N/A")
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // Despite the name, ffmpeg reports out_time_ms in microseconds.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }
}

fn progress_report(state: &ProgressState, expected_secs: f64, elapsed_secs: f64) -> RenderProgress {
    let progress = if expected_secs <= 0.0 {
        0.0
    } else {
        (state.out_time_secs / expected_secs).clamp(0.0, 1.0)
    };
    let eta_secs = if progress > 0.0 {
        (elapsed_secs / progress) - elapsed_secs
    } else {
        0.0
    }
    .max(0.0);

    RenderProgress {
        progress: if state.complete { 1.0 } else { progress },
        out_time_secs: state.out_time_secs,
        eta_secs,
        stage: if state.complete {
            RenderStage::Finalizing
        } else {
            RenderStage::Rendering
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12.345000\n"), Some(12.345));
        assert_eq!(parse_duration("N/A\n3.5\n"), Some(3.5));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("garbage"), None);
    }

    #[test]
    fn test_progress_state_reads_microseconds() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "2500000");
        assert!((state.out_time_secs - 2.5).abs() < 1e-9);
        state.update("progress", "continue");
        assert!(!state.complete);
        state.update("progress", "end");
        assert!(state.complete);
    }

    #[test]
    fn test_progress_report_clamps_and_estimates() {
        let state = ProgressState {
            out_time_secs: 5.0,
            complete: false,
        };
        let report = progress_report(&state, 10.0, 2.0);
        assert!((report.progress - 0.5).abs() < 1e-9);
        assert!((report.eta_secs - 2.0).abs() < 1e-9);
        assert_eq!(report.stage, RenderStage::Rendering);

        let unknown = progress_report(&state, 0.0, 2.0);
        assert_eq!(unknown.progress, 0.0);
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }

    #[test]
    fn test_command_exists_for_missing_binary() {
        assert!(!command_exists(Path::new("goexport-definitely-missing-binary")));
        assert!(!command_exists(Path::new("/nonexistent/dir/ffmpeg")));
    }
}
