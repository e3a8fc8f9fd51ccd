//! Timestamp reconciliation.
//!
//! The recorder's timings are host-clock values; the page's "started" and
//! "stopped" values are page-clock values. The page values only enter host
//! terms through the offsets measured when the host first observed them, so
//! every subtraction below has both operands in the same domain.

use goexport_common::clock::ClockOffset;
use goexport_project_model::service::TimingMode;
use goexport_project_model::session::{CaptureSession, PlaybackEvent};

/// Section of a raw capture to keep, in milliseconds from the file start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimWindow {
    /// Trim-in actually applied (never negative).
    pub trim_in_ms: i64,

    /// Trim-in before clamping.
    pub raw_trim_in_ms: i64,

    /// The raw trim-in was negative and has been clamped to zero.
    pub clamped: bool,

    /// Trim-out actually applied.
    pub trim_out_ms: i64,

    /// Natural length of the clip.
    pub clip_length_ms: i64,
}

impl TrimWindow {
    /// The window covers the whole clip, so no cut is needed.
    pub fn is_whole_clip(&self) -> bool {
        self.trim_in_ms == 0 && self.trim_out_ms >= self.clip_length_ms
    }

    pub fn length_ms(&self) -> i64 {
        self.trim_out_ms - self.trim_in_ms
    }
}

/// `prestart_delay + (video_started + start_offset) - prestart`.
pub fn raw_trim_in(session: &CaptureSession, playback: &PlaybackEvent) -> i64 {
    let prestart = session.start_time;
    let prestart_delay = session.startup_delay;
    let offset = start_offset(playback);
    if offset.exceeds_threshold_ms(SKEW_WARNING_MS) {
        tracing::warn!(offset_ms = offset.offset_ms(), "Page and host clocks disagree");
    }
    prestart_delay + offset.page_to_host(playback.started_at) - prestart
}

/// Page and host clocks may drift this far before it is worth a warning.
const SKEW_WARNING_MS: i64 = 5_000;

fn start_offset(playback: &PlaybackEvent) -> ClockOffset {
    ClockOffset {
        host_ms: playback.observed_started,
        page_ms: playback.started_at,
    }
}

/// Work out what to keep of a clip `clip_length_ms` long.
pub fn reconcile(
    mode: TimingMode,
    session: &CaptureSession,
    playback: &PlaybackEvent,
    clip_length_ms: i64,
) -> TrimWindow {
    let raw_trim_in_ms = match mode {
        TimingMode::Legacy => raw_trim_in(session, playback),
        // Recording began after playback did.
        TimingMode::Default => 0,
    };
    let clamped = raw_trim_in_ms < 0;
    let trim_in_ms = raw_trim_in_ms.clamp(0, clip_length_ms.max(0));
    if clamped {
        tracing::warn!(
            raw_trim_in_ms,
            "Recording started after playback; keeping the clip from its start"
        );
    }

    let trim_out_ms = match session.ended_delay {
        Some(delay) if clip_length_ms - delay > trim_in_ms => clip_length_ms - delay,
        _ => clip_length_ms,
    };

    tracing::debug!(
        ?mode,
        raw_trim_in_ms,
        trim_in_ms,
        trim_out_ms,
        clip_length_ms,
        "Trim window"
    );
    TrimWindow {
        trim_in_ms,
        raw_trim_in_ms,
        clamped,
        trim_out_ms,
        clip_length_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goexport_project_model::session::CaptureBackendKind;
    use std::path::PathBuf;

    fn session(start_time: i64, startup_delay: i64, ended_delay: Option<i64>) -> CaptureSession {
        let mut session =
            CaptureSession::started(CaptureBackendKind::Native, start_time, startup_delay, PathBuf::from("take.mp4"));
        if let Some(delay) = ended_delay {
            session.finish(start_time + 60_000, delay);
        }
        session
    }

    fn playback(started_at: i64, start_offset: i64) -> PlaybackEvent {
        PlaybackEvent {
            started_at,
            ended_at: started_at + 30_000,
            observed_started: started_at + start_offset,
            observed_ended: started_at + 30_000 + start_offset,
        }
    }

    #[test]
    fn test_negative_trim_in_is_flagged() {
        let s = session(1000, 50, None);
        let p = playback(200, 40);
        assert_eq!(raw_trim_in(&s, &p), -710);

        let window = reconcile(TimingMode::Legacy, &s, &p, 10_000);
        assert_eq!(window.raw_trim_in_ms, -710);
        assert_eq!(window.trim_in_ms, 0);
        assert!(window.clamped);
    }

    #[test]
    fn test_legacy_trim_in() {
        // Recorder confirmed at host 10_000 after a 300 ms startup; playback
        // reported page time 5_000, first seen at host 12_500.
        let s = session(10_000, 300, Some(200));
        let p = playback(5_000, 7_500);
        let window = reconcile(TimingMode::Legacy, &s, &p, 40_000);
        assert_eq!(window.trim_in_ms, 2_800);
        assert!(!window.clamped);
        assert_eq!(window.trim_out_ms, 39_800);
        assert_eq!(window.length_ms(), 37_000);
    }

    #[test]
    fn test_default_mode_keeps_start() {
        let s = session(10_000, 300, None);
        let p = playback(5_000, 7_500);
        let window = reconcile(TimingMode::Default, &s, &p, 40_000);
        assert_eq!(window.trim_in_ms, 0);
        assert!(window.is_whole_clip());
    }

    #[test]
    fn test_trailing_delay_never_inverts_window() {
        let s = session(0, 0, Some(5_000));
        let p = playback(0, 3_500);
        let window = reconcile(TimingMode::Legacy, &s, &p, 4_000);
        assert_eq!(window.trim_in_ms, 3_500);
        assert_eq!(window.trim_out_ms, 4_000);
    }

    proptest::proptest! {
        #[test]
        fn prop_window_stays_inside_clip(
            start_time in 0i64..1_000_000,
            startup_delay in 0i64..5_000,
            ended_delay in 0i64..5_000,
            started_at in -1_000_000i64..1_000_000,
            start_offset in -10_000i64..1_000_000,
            clip_length_ms in 0i64..600_000,
        ) {
            let s = session(start_time, startup_delay, Some(ended_delay));
            let p = playback(started_at, start_offset);
            let window = reconcile(TimingMode::Legacy, &s, &p, clip_length_ms);
            proptest::prop_assert!(window.trim_in_ms >= 0);
            proptest::prop_assert!(window.trim_in_ms <= window.trim_out_ms);
            proptest::prop_assert!(window.trim_out_ms <= clip_length_ms);
            proptest::prop_assert_eq!(window.clamped, window.raw_trim_in_ms < 0);
        }
    }
}
