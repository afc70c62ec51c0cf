//! Retry policy for transient busy conditions.
//!
//! The USB interface can be transiently held by another process. That class
//! of error is retried with bounded, attempt-indexed linear backoff; every
//! other failure propagates immediately.

use crate::error::{Error, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum attempts for busy-retried operations.
pub const BUSY_MAX_ATTEMPTS: u32 = 3;

/// Backoff base: attempt N (1-based) sleeps N * base before retrying.
pub const BUSY_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Classification of communication errors for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Interface held elsewhere; may succeed on retry.
    Busy,
    /// Everything else: propagate immediately.
    Fatal,
}

impl ErrorClass {
    pub fn classify(err: &Error) -> Self {
        if err.is_busy() {
            Self::Busy
        } else {
            Self::Fatal
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Injectable sleep so tests can run the backoff schedule on mocked time.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeper.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Run `op` up to [`BUSY_MAX_ATTEMPTS`] times, sleeping `attempt * base`
/// between attempts while the failure classifies as busy.
///
/// Non-busy errors and the final busy error propagate unchanged.
pub fn retry_busy<T>(
    sleeper: &dyn Sleeper,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    for attempt in 1..=BUSY_MAX_ATTEMPTS {
        match op() {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after busy retries");
                }
                return Ok(value);
            }
            Err(err) => {
                let class = ErrorClass::classify(&err);
                if !class.is_retryable() || attempt == BUSY_MAX_ATTEMPTS {
                    if class.is_retryable() {
                        warn!(attempt, "busy retries exhausted: {err}");
                    }
                    return Err(err);
                }
                let delay = BUSY_BACKOFF_BASE * attempt;
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "interface busy, backing off: {err}"
                );
                sleeper.sleep(delay);
            }
        }
    }
    unreachable!("retry loop returns on final attempt")
}

#[cfg(test)]
pub mod mock {
    use super::Sleeper;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Records requested sleeps instead of blocking. Clones share the record
    /// so a test can keep a handle after moving the sleeper into a channel.
    #[derive(Clone)]
    pub struct RecordingSleeper {
        slept: Arc<Mutex<Vec<Duration>>>,
    }

    impl RecordingSleeper {
        pub fn new() -> Self {
            Self {
                slept: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn slept(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::RecordingSleeper;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn busy() -> Error {
        Error::Busy("USB interface is busy".into())
    }

    #[test]
    fn classify_busy_vs_fatal() {
        assert_eq!(ErrorClass::classify(&busy()), ErrorClass::Busy);
        assert_eq!(
            ErrorClass::classify(&Error::Hid("claim failed: Resource busy".into())),
            ErrorClass::Busy
        );
        assert_eq!(
            ErrorClass::classify(&Error::Decode("short".into())),
            ErrorClass::Fatal
        );
        assert!(!ErrorClass::Fatal.is_retryable());
        assert!(ErrorClass::Busy.is_retryable());
    }

    #[test]
    fn succeeds_third_attempt_with_linear_backoff() {
        let sleeper = RecordingSleeper::new();
        let attempts = AtomicU32::new(0);

        let result = retry_busy(&sleeper, || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(busy())
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Attempt-indexed linear backoff: 0.5s then 1.0s.
        assert_eq!(
            sleeper.slept(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[test]
    fn exhaustion_propagates_busy_after_three_attempts() {
        let sleeper = RecordingSleeper::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = retry_busy(&sleeper, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(busy())
        });

        assert!(result.unwrap_err().is_busy());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.slept().len(), 2);
    }

    #[test]
    fn fatal_error_is_not_retried() {
        let sleeper = RecordingSleeper::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = retry_busy(&sleeper, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Decode("truncated response".into()))
        });

        assert!(matches!(result, Err(Error::Decode(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(sleeper.slept().is_empty());
    }

    #[test]
    fn immediate_success_never_sleeps() {
        let sleeper = RecordingSleeper::new();
        let result = retry_busy(&sleeper, || Ok("ok"));
        assert_eq!(result.unwrap(), "ok");
        assert!(sleeper.slept().is_empty());
    }
}
