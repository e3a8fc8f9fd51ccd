//! Bounded poll-until-ready waits.
//!
//! A wait either sees its condition or runs out of time; running out of time
//! is an ordinary outcome, not an error. Callers decide whether a
//! [`WaitOutcome::TimedOut`] becomes an [`ExportError::Timeout`].

use std::future::Future;
use std::time::Duration;

use goexport_common::clock::HostClock;
use goexport_common::error::{ExportError, ExportResult, TimeoutKind};

/// Result of [`wait_until`].
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    /// The probe produced a value. `observed_at` is the host time of the
    /// successful poll.
    Ready { value: T, observed_at: i64 },
    TimedOut,
}

impl<T> WaitOutcome<T> {
    /// Map a timeout to [`ExportError::Timeout`].
    pub fn or_timeout(self, kind: TimeoutKind, message: impl Into<String>) -> ExportResult<(T, i64)> {
        match self {
            WaitOutcome::Ready { value, observed_at } => Ok((value, observed_at)),
            WaitOutcome::TimedOut => Err(ExportError::timeout(kind, message)),
        }
    }
}

const MINUTE: Duration = Duration::from_secs(60);

/// `0` minutes means wait forever.
pub fn minutes(value: u64) -> Option<Duration> {
    minutes_of(value, MINUTE)
}

/// [`minutes`] with a custom minute length.
pub fn minutes_of(value: u64, minute: Duration) -> Option<Duration> {
    (value > 0).then(|| minute.saturating_mul(u32::try_from(value).unwrap_or(u32::MAX)))
}

/// Poll `probe` every `interval` until it yields a value or `timeout`
/// elapses. `None` waits forever. Probe errors end the wait immediately.
pub async fn wait_until<T, F, Fut>(
    clock: &HostClock,
    timeout: Option<Duration>,
    interval: Duration,
    mut probe: F,
) -> ExportResult<WaitOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExportResult<Option<T>>>,
{
    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
    loop {
        if let Some(value) = probe().await? {
            return Ok(WaitOutcome::Ready {
                value,
                observed_at: clock.now_ms(),
            });
        }
        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_ready_after_some_polls() {
        let clock = HostClock::start();
        let polls = AtomicU32::new(0);
        let before = clock.now_ms();
        let outcome = wait_until(&clock, Some(Duration::from_secs(5)), Duration::from_millis(1), || {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            async move { Ok((n >= 3).then_some(n)) }
        })
        .await
        .unwrap();

        match outcome {
            WaitOutcome::Ready { value, observed_at } => {
                assert_eq!(value, 3);
                assert!(observed_at >= before);
            }
            WaitOutcome::TimedOut => panic!("should be ready"),
        }
    }

    #[tokio::test]
    async fn test_times_out() {
        let clock = HostClock::start();
        let outcome: WaitOutcome<()> =
            wait_until(&clock, Some(Duration::from_millis(30)), Duration::from_millis(5), || async {
                Ok(None)
            })
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);

        let err = outcome.or_timeout(TimeoutKind::Load, "never loaded").unwrap_err();
        assert_eq!(err.timeout_kind(), Some(TimeoutKind::Load));
    }

    #[tokio::test]
    async fn test_probe_error_ends_wait() {
        let clock = HostClock::start();
        let result: ExportResult<WaitOutcome<()>> = wait_until(&clock, None, Duration::from_millis(1), || async {
            Err(ExportError::driver("browser went away"))
        })
        .await;
        assert!(matches!(result, Err(ExportError::Driver { .. })));
    }

    #[test]
    fn test_minutes() {
        assert_eq!(minutes(0), None);
        assert_eq!(minutes(30), Some(Duration::from_secs(1800)));
        assert_eq!(minutes_of(2, Duration::from_millis(10)), Some(Duration::from_millis(20)));
    }
}
