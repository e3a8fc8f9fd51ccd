//! What the export command tells its caller.
//!
//! Interactive runs get plain lines. With `--no-input`, stdout carries one
//! JSON object per line instead, so a supervising process can tell a skipped
//! movie from a failed one:
//!
//! ```text
//! {"event":"started","timestamp":1760630470.2,"message":"Recording with native"}
//! {"event":"skipped","timestamp":1760630531.9,"reason":"Timed out waiting ..."}
//! ```

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use goexport_render_engine::{ProgressCallback, RenderProgress, RenderStage};

/// One line of structured output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutputEvent {
    Started {
        message: String,
    },
    Progress {
        message: String,
        stage: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
    },
    Completed {
        output_path: String,
    },
    Skipped {
        reason: String,
    },
    Error {
        message: String,
    },
}

#[derive(Serialize)]
struct Line<'a> {
    #[serde(flatten)]
    event: &'a OutputEvent,
    timestamp: f64,
}

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writes either human text or JSON lines to one sink.
#[derive(Clone)]
pub struct Reporter {
    structured: bool,
    out: Sink,
}

impl Reporter {
    pub fn stdout(structured: bool) -> Self {
        Self::with_writer(structured, Box::new(std::io::stdout()))
    }

    pub fn with_writer(structured: bool, out: Box<dyn Write + Send>) -> Self {
        Self {
            structured,
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn is_structured(&self) -> bool {
        self.structured
    }

    /// Human-only text; dropped in structured mode.
    pub fn note(&self, text: impl AsRef<str>) {
        if !self.structured {
            self.write_line(text.as_ref());
        }
    }

    pub fn started(&self, message: impl Into<String>) {
        let message = message.into();
        self.report(&message, OutputEvent::Started { message: message.clone() });
    }

    pub fn stage(&self, stage: &str, message: impl Into<String>) {
        let message = message.into();
        self.report(
            &message,
            OutputEvent::Progress {
                message: message.clone(),
                stage: stage.to_string(),
                progress: None,
            },
        );
    }

    pub fn captured(&self, clip: &Path) {
        self.stage("captured", format!("Captured: {}", clip.display()));
    }

    pub fn completed(&self, output: &Path) {
        self.report(
            &format!("Saved to: {}", output.display()),
            OutputEvent::Completed {
                output_path: output.display().to_string(),
            },
        );
    }

    pub fn skipped(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.report(&format!("Skipped: {reason}"), OutputEvent::Skipped { reason: reason.clone() });
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        if self.structured {
            self.emit(&OutputEvent::Error { message });
        } else {
            tracing::debug!(%message, "Export failed");
        }
    }

    /// Render progress. Human output redraws one line until the render
    /// completes.
    pub fn render_progress(&self, progress: &RenderProgress) {
        let percent = (progress.progress * 100.0).round() as u32;
        let label = stage_label(progress.stage);
        if self.structured {
            self.emit(&OutputEvent::Progress {
                message: format!("Rendering {percent}%"),
                stage: label.to_string(),
                progress: Some(progress.progress),
            });
            return;
        }
        let mut out = lock(&self.out);
        let _ = match progress.stage {
            RenderStage::Complete => writeln!(out, "\r{label}: 100%   "),
            _ => write!(out, "\r{label}: {percent:>3}% (eta {:.0}s)", progress.eta_secs),
        };
        let _ = out.flush();
    }

    /// Callback handing render progress to this reporter.
    pub fn progress_callback(&self) -> ProgressCallback {
        let reporter = self.clone();
        Box::new(move |progress: RenderProgress| reporter.render_progress(&progress))
    }

    fn report(&self, human: &str, event: OutputEvent) {
        if self.structured {
            self.emit(&event);
        } else {
            self.write_line(human);
        }
    }

    fn emit(&self, event: &OutputEvent) {
        let line = Line {
            event,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        match serde_json::to_string(&line) {
            Ok(json) => self.write_line(&json),
            Err(e) => tracing::warn!(error = %e, "Could not encode output event"),
        }
    }

    fn write_line(&self, text: &str) {
        let mut out = lock(&self.out);
        if let Err(e) = writeln!(out, "{text}").and_then(|_| out.flush()) {
            tracing::debug!(error = %e, "Output closed");
        }
    }
}

fn stage_label(stage: RenderStage) -> &'static str {
    match stage {
        RenderStage::Rendering => "rendering",
        RenderStage::Finalizing => "finalizing",
        RenderStage::Complete => "complete",
    }
}

fn lock(out: &Sink) -> std::sync::MutexGuard<'_, Box<dyn Write + Send>> {
    out.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::Value;

    /// Writer whose bytes stay readable after the reporter takes it.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }

        fn events(&self) -> Vec<Value> {
            self.text()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    fn reporter(structured: bool) -> (Reporter, Captured) {
        let sink = Captured::default();
        (Reporter::with_writer(structured, Box::new(sink.clone())), sink)
    }

    #[test]
    fn test_structured_lines_carry_event_and_timestamp() {
        let (out, sink) = reporter(true);
        out.started("Recording with native");
        out.note("only for people");
        out.skipped("Timed out waiting for the movie to load");
        out.error("Could not start recording: ffmpeg missing");
        out.completed(Path::new("/videos/movie.mp4"));

        let events = sink.events();
        let kinds: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
        assert_eq!(kinds, ["started", "skipped", "error", "completed"]);
        assert!(events.iter().all(|e| e["timestamp"].as_f64().unwrap() > 1.0e9));
        assert_eq!(events[0]["message"], "Recording with native");
        assert_eq!(events[1]["reason"], "Timed out waiting for the movie to load");
        assert_eq!(events[3]["output_path"], "/videos/movie.mp4");
    }

    #[test]
    fn test_progress_callback_emits_stages() {
        let (out, sink) = reporter(true);
        let callback = out.progress_callback();
        callback(RenderProgress {
            progress: 0.25,
            out_time_secs: 1.0,
            eta_secs: 3.0,
            stage: RenderStage::Rendering,
        });
        callback(RenderProgress {
            progress: 1.0,
            out_time_secs: 4.0,
            eta_secs: 0.0,
            stage: RenderStage::Complete,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "progress");
        assert_eq!(events[0]["stage"], "rendering");
        assert_eq!(events[0]["progress"], 0.25);
        assert_eq!(events[0]["message"], "Rendering 25%");
        assert_eq!(events[1]["stage"], "complete");
    }

    #[test]
    fn test_human_mode_writes_plain_text() {
        let (out, sink) = reporter(false);
        out.started("Recording with obs");
        out.captured(Path::new("/tmp/clip.mp4"));
        out.skipped("Timed out");
        out.error("hidden from stdout");
        out.completed(Path::new("/videos/movie.mp4"));

        assert_eq!(
            sink.text(),
            "Recording with obs\nCaptured: /tmp/clip.mp4\nSkipped: Timed out\nSaved to: /videos/movie.mp4\n"
        );
    }

    #[test]
    fn test_stage_without_fraction_omits_progress() {
        let (out, sink) = reporter(true);
        out.stage("exporting", "Exporting m-1");
        let events = sink.events();
        assert_eq!(events[0]["stage"], "exporting");
        assert!(events[0].get("progress").is_none());
    }
}
