//! Bounded retry for backing-service connections at startup.
//!
//! The live-state store, pub/sub channel and durable store are required;
//! the server retries each a fixed number of times with exponential backoff
//! plus jitter, then gives up.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

use crate::error::StartupError;

/// Largest backoff multiplier (2^6 = 64x the base delay).
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Delay before retry number `attempt` (1-based), without jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(2_u32.saturating_pow(exponent))
}

fn jitter(base: Duration) -> Duration {
    let max_ms = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Run `connect` up to `attempts` times.
///
/// # Errors
///
/// Returns [`StartupError::Unavailable`] with the last error if every
/// attempt fails.
pub async fn connect_with_retry<T, E, F, Fut>(
    service: &'static str,
    attempts: u32,
    base: Duration,
    mut connect: F,
) -> Result<T, StartupError>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt: u32 = 1;
    loop {
        match connect().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(service, attempt, "Connected after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= attempts => {
                tracing::error!(service, attempts, error = %e, "Giving up");
                return Err(StartupError::Unavailable {
                    service,
                    attempts,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                let delay = backoff_delay(base, attempt).saturating_add(jitter(base));
                tracing::warn!(
                    service,
                    attempt,
                    attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 40), Duration::from_millis(6_400));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_a_later_attempt() {
        let calls = AtomicU32::new(0);
        let value = connect_with_retry("test", 5, Duration::from_millis(10), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("refused") } else { Ok(n) } }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = connect_with_retry("test", 3, Duration::from_millis(10), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("refused") }
        })
        .await;
        assert!(matches!(
            result,
            Err(StartupError::Unavailable { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
