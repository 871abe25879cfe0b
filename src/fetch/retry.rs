// src/fetch/retry.rs

//! Bounded retry with exponential backoff for transient fetch failures.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::CancelSignal;
use crate::storage::remove_path;
use crate::types::RepositoryReference;

use super::{FetchError, RepositoryFetcher, Snapshot};

/// Retry parameters for `NetworkFailure`.
///
/// `max_retries` counts attempts *after* the first one, so a reference is
/// fetched at most `max_retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Terminal fetch error plus how many attempts were spent on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub error: FetchError,
    pub attempts: u32,
}

/// Fetch `reference` into `destination`, retrying network failures.
///
/// On success returns the snapshot and the number of attempts used. On
/// failure the destination has been removed. Cancellation stops further
/// retries; to abandon the attempt in flight, drop this future.
pub async fn fetch_with_retry<F>(
    fetcher: &F,
    policy: &RetryPolicy,
    reference: &RepositoryReference,
    destination: &Path,
    cancel: &CancelSignal,
) -> Result<(Snapshot, u32), FetchFailure>
where
    F: RepositoryFetcher + ?Sized,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        debug!(student = %reference.student_id, attempt = attempts, "fetch attempt");

        let error = match fetcher.fetch(reference, destination).await {
            Ok(snapshot) => return Ok((snapshot, attempts)),
            Err(e) => e,
        };

        if let Err(e) = remove_path(destination).await {
            warn!(
                path = %destination.display(),
                error = %e,
                "failed to clear destination after fetch error"
            );
        }

        let retries_used = attempts - 1;
        if !error.is_retryable() || retries_used >= policy.max_retries {
            info!(
                student = %reference.student_id,
                attempts,
                error = %error,
                "fetch failed terminally"
            );
            return Err(FetchFailure { error, attempts });
        }

        if cancel.is_cancelled() {
            info!(student = %reference.student_id, attempts, "run cancelled; not retrying fetch");
            return Err(FetchFailure { error, attempts });
        }

        let delay = policy.delay_for(retries_used);
        warn!(
            student = %reference.student_id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient fetch failure; backing off"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                info!(student = %reference.student_id, attempts, "run cancelled during backoff");
                return Err(FetchFailure { error, attempts });
            }
        }
    }
}
