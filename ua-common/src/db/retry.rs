//! Lock-contention retry
//!
//! Many readers can post scans at the same moment. SQLite serializes
//! writers, and `busy_timeout` covers most waits, but a deferred
//! transaction that loses the upgrade race fails straight away with
//! `database is locked`. Those failures are retried here with a doubling
//! pause until a deadline.

use crate::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// First pause after a lock failure
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Pauses never grow beyond this
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Successful retries slower than this are worth a warning
const SLOW_RETRY: Duration = Duration::from_secs(2);

/// Run `operation`, re-running it on lock contention until `max_wait_ms`
/// has elapsed since the first attempt
///
/// Any other error is returned as-is after one attempt. Because the
/// closure may run several times, it must build its whole transaction
/// afresh on every call.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let deadline = Duration::from_millis(max_wait_ms);
    let mut backoff = INITIAL_BACKOFF;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    let waited = started.elapsed();
                    if waited > SLOW_RETRY {
                        warn!(operation = operation_name, attempts, waited_ms = waited.as_millis(), "Slow lock recovery");
                    } else {
                        debug!(operation = operation_name, attempts, waited_ms = waited.as_millis(), "Recovered from lock");
                    }
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        if waited >= deadline {
            error!(
                operation = operation_name,
                attempts,
                waited_ms = waited.as_millis(),
                max_wait_ms,
                "Giving up on locked database: {}",
                err
            );
            return Err(Error::Internal(format!(
                "{}: database still locked after {} attempts in {} ms",
                operation_name,
                attempts,
                waited.as_millis()
            )));
        }

        // Never sleep past the deadline by more than one short pause
        let pause = backoff.min(deadline.saturating_sub(waited).max(INITIAL_BACKOFF));
        debug!(operation = operation_name, attempts, pause_ms = pause.as_millis(), "Database locked; retrying");
        tokio::time::sleep(pause).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
