//! Host clock and cross-domain timing utilities.
//!
//! Every timestamp GoExport records on the host side (recorder start/stop,
//! the moment a page variable is first observed) comes from a [`HostClock`].
//! The clock is monotonic but anchored to the Unix epoch at creation, so its
//! readings look like `Date.now()` values while never moving backwards.
//!
//! Page-side timestamps live in a different clock domain. A [`ClockOffset`]
//! pairs one reading from each domain and is the only sanctioned way to move
//! a page timestamp into host terms.

use std::time::Instant;

/// A monotonic millisecond clock anchored to wall time at creation.
#[derive(Debug, Clone)]
pub struct HostClock {
    /// The instant the clock was anchored.
    epoch: Instant,

    /// Unix milliseconds at `epoch`.
    epoch_unix_ms: i64,
}

impl HostClock {
    /// Create a clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_unix_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Current host time in milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.epoch_unix_ms + self.epoch.elapsed().as_millis() as i64
    }

    /// Current host time, logged with a label at debug level.
    pub fn stamp(&self, label: &str) -> i64 {
        let ts = self.now_ms();
        tracing::debug!(timestamp_ms = ts, label, "Host timestamp");
        ts
    }

    /// Milliseconds elapsed since the clock was anchored.
    pub fn elapsed_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    /// Convert milliseconds to seconds.
    pub fn ms_to_secs(ms: i64) -> f64 {
        ms as f64 / 1000.0
    }

    /// Convert seconds to milliseconds, rounding to the nearest millisecond.
    pub fn secs_to_ms(secs: f64) -> i64 {
        (secs * 1000.0).round() as i64
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::start()
    }
}

/// One observation of the same event in both clock domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockOffset {
    /// Host time when the event was observed (ms).
    pub host_ms: i64,
    /// The page's own timestamp for the event (ms).
    pub page_ms: i64,
}

impl ClockOffset {
    /// Offset that maps page time onto host time (`host - page`).
    pub fn offset_ms(&self) -> i64 {
        self.host_ms - self.page_ms
    }

    /// Fold a page-clock timestamp into host-clock terms.
    pub fn page_to_host(&self, page_ms: i64) -> i64 {
        page_ms + self.offset_ms()
    }

    /// Whether the two domains disagree by more than the threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: i64) -> bool {
        self.offset_ms().abs() > threshold_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_clock_is_monotonic() {
        let clock = HostClock::start();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(clock.elapsed_ms() < 1_000);
    }

    #[test]
    fn test_host_clock_tracks_wall_time() {
        let clock = HostClock::start();
        let wall = chrono::Utc::now().timestamp_millis();
        assert!((clock.now_ms() - wall).abs() < 1_000);
    }

    #[test]
    fn test_ms_secs_conversion() {
        assert!((HostClock::ms_to_secs(1_500) - 1.5).abs() < 1e-9);
        assert_eq!(HostClock::secs_to_ms(2.0004), 2_000);
        assert_eq!(HostClock::ms_to_secs(-710), -0.71);
    }

    #[test]
    fn test_clock_offset() {
        let offset = ClockOffset {
            host_ms: 1_040,
            page_ms: 1_000,
        };
        assert_eq!(offset.offset_ms(), 40);
        assert_eq!(offset.page_to_host(200), 240);
        assert!(offset.exceeds_threshold_ms(10));
        assert!(!offset.exceeds_threshold_ms(100));
    }
}
