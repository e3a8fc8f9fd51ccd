//! Capture sessions and playback events.
//!
//! Two clock domains meet here. [`CaptureSession`] fields are host-clock
//! milliseconds measured by a capture backend. [`PlaybackEvent`] carries the
//! page's own timestamps alongside the host time at which each was observed;
//! the page values are only ever moved into host terms through the offsets
//! exposed by this type.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which recorder produced a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackendKind {
    Native,
    Obs,
}

impl fmt::Display for CaptureBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureBackendKind::Native => f.write_str("native"),
            CaptureBackendKind::Obs => f.write_str("obs"),
        }
    }
}

/// What a backend measured for one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSession {
    pub backend: CaptureBackendKind,

    /// Host ms at which the recorder confirmed it was writing.
    pub start_time: i64,

    /// Host ms at which the recorder confirmed it had stopped.
    pub end_time: Option<i64>,

    /// Gap between the start request and `start_time`.
    pub startup_delay: i64,

    /// Gap between the stop request and `end_time`.
    pub ended_delay: Option<i64>,

    /// Deliverable file, once stop has completed.
    pub output_path: PathBuf,
}

impl CaptureSession {
    pub fn started(
        backend: CaptureBackendKind,
        start_time: i64,
        startup_delay: i64,
        output_path: PathBuf,
    ) -> Self {
        Self {
            backend,
            start_time,
            end_time: None,
            startup_delay,
            ended_delay: None,
            output_path,
        }
    }

    /// Record the stop measurement. `end_time` never precedes `start_time`.
    pub fn finish(&mut self, end_time: i64, ended_delay: i64) {
        self.end_time = Some(end_time.max(self.start_time));
        self.ended_delay = Some(ended_delay.max(0));
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Host-clock length of the recording.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Playback start/stop as reported by the page and observed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackEvent {
    /// Page-clock value of the "started" variable.
    pub started_at: i64,

    /// Page-clock value of the "stopped" variable.
    pub ended_at: i64,

    /// Host ms when the "started" variable was first seen.
    pub observed_started: i64,

    /// Host ms when the "stopped" variable was first seen.
    pub observed_ended: i64,
}

impl PlaybackEvent {
    /// `observed_started - started_at`.
    pub fn start_offset(&self) -> i64 {
        self.observed_started - self.started_at
    }

    /// `observed_ended - ended_at`.
    pub fn end_offset(&self) -> i64 {
        self.observed_ended - self.ended_at
    }

    /// Playback length in page-clock ms.
    pub fn length_ms(&self) -> i64 {
        self.ended_at - self.started_at
    }

    /// Page start expressed in host-clock ms.
    pub fn host_started(&self) -> i64 {
        self.started_at + self.start_offset()
    }

    /// Page end expressed in host-clock ms.
    pub fn host_ended(&self) -> i64 {
        self.ended_at + self.end_offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_never_precedes_start() {
        let mut session =
            CaptureSession::started(CaptureBackendKind::Native, 5_000, 120, "a.mp4".into());
        assert!(!session.is_finished());
        session.finish(4_000, -3);
        assert_eq!(session.end_time, Some(5_000));
        assert_eq!(session.ended_delay, Some(0));
        assert_eq!(session.duration_ms(), Some(0));
    }

    #[test]
    fn test_playback_offsets() {
        let event = PlaybackEvent {
            started_at: 200,
            ended_at: 10_200,
            observed_started: 240,
            observed_ended: 10_260,
        };
        assert_eq!(event.start_offset(), 40);
        assert_eq!(event.end_offset(), 60);
        assert_eq!(event.length_ms(), 10_000);
        assert_eq!(event.host_started(), 240);
        assert_eq!(event.host_ended(), 10_260);
    }

    #[test]
    fn test_backend_kind_serializes_lowercase() {
        let json = serde_json::to_string(&CaptureBackendKind::Obs).unwrap();
        assert_eq!(json, "\"obs\"");
    }
}
