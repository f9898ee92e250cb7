// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic for optimistic-lock conflicts.
//!
//! Read-modify-write updates fail with HTTP 409 when another writer changed the
//! object between our read and our write. This module retries such updates a
//! bounded number of times with a short exponential backoff, while failing fast
//! on every other error.

use crate::errors::ProvisionError;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Initial retry interval (50ms)
const CONFLICT_INITIAL_INTERVAL_MILLIS: u64 = 50;

/// Maximum interval between retries (1 second)
const CONFLICT_MAX_INTERVAL_MILLIS: u64 = 1000;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to spread out competing writers (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) so that writers
/// racing on the same object do not retry in lockstep.
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
        }
    }

    /// Get the next backoff interval and advance the schedule.
    pub fn next_backoff(&mut self) -> Duration {
        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        jittered
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Create the backoff used between conflicting updates.
///
/// # Configuration
///
/// - **Initial interval**: 50ms
/// - **Max interval**: 1 second
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10%
///
/// With five attempts the waits are roughly 50ms, 100ms, 200ms and 400ms.
#[must_use]
pub fn conflict_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(CONFLICT_INITIAL_INTERVAL_MILLIS),
        Duration::from_millis(CONFLICT_MAX_INTERVAL_MILLIS),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Retry a read-modify-write operation while it reports a version conflict.
///
/// `operation` must perform the whole read-modify-write so that every attempt
/// starts from a fresh read. Only [`ProvisionError::UpdateConflict`] is
/// retried; any other error is returned immediately.
///
/// # Errors
///
/// Returns the first non-conflict error, or [`ProvisionError::UpdateConflict`]
/// carrying the total attempt count once `max_attempts` is exhausted.
pub async fn retry_on_conflict<T, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    operation_name: &str,
) -> Result<T, ProvisionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProvisionError>>,
{
    let mut backoff = conflict_backoff();
    let start_time = Instant::now();
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Update succeeded after conflict retries"
                    );
                }
                return Ok(value);
            }
            Err(ProvisionError::UpdateConflict {
                kind,
                namespace,
                name,
                ..
            }) => {
                if attempt >= max_attempts {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Conflict retries exhausted, giving up"
                    );
                    return Err(ProvisionError::UpdateConflict {
                        kind,
                        namespace,
                        name,
                        attempts: attempt,
                    });
                }

                let duration = backoff.next_backoff();
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    retry_after = ?duration,
                    "Update conflicted with a concurrent writer, will retry"
                );
                tokio::time::sleep(duration).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
