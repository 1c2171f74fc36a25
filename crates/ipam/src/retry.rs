/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */
use std::time::Duration;

use rand::Rng;
use tracing::debug;
use tryhard::{RetryFutureConfig, RetryPolicy};

use crate::errors::{IpamError, Result};

/// Attempts for one retry-wrapped unit of work, the first one included.
const MAX_ATTEMPTS: u32 = 10;

/// Mean pause between attempts. The actual pause is jittered uniformly
/// into `[mean/2, 3*mean/2)`.
const BACKOFF_MEAN: Duration = Duration::from_millis(100);

/// Re-invoke `op` while it fails with an optimistic lock conflict, with a
/// jittered pause in between attempts. Every other error breaks out
/// immediately, and an operation still conflicting on the last attempt
/// surfaces that final conflict error.
pub(crate) async fn retry_on_conflict<T, F, Fut>(op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let config = RetryFutureConfig::new(MAX_ATTEMPTS - 1).custom_backoff(
        |attempt: u32, error: &IpamError| {
            if matches!(error, IpamError::OptimisticLock(_)) {
                debug!("attempt {attempt} hit an optimistic lock conflict, retrying: {error}");
                RetryPolicy::Delay(jittered(BACKOFF_MEAN))
            } else {
                RetryPolicy::Break
            }
        },
    );

    tryhard::retry_fn(op).with_config(config).await
}

fn jittered(mean: Duration) -> Duration {
    let uniform: f64 = rand::rng().random();
    mean.mul_f64(1.0 + 0.5 * (2.0 * uniform - 1.0))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_jitter_stays_within_half_mean() {
        let mean = Duration::from_millis(100);
        for _ in 0..1000 {
            let delay = jittered(mean);
            assert!(delay >= Duration::from_millis(50), "delay {delay:?} too short");
            assert!(delay < Duration::from_millis(150), "delay {delay:?} too long");
        }
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_until_the_budget_is_spent() {
        let attempts = AtomicU32::new(0);
        let cidr = "10.0.0.0/24".parse().unwrap();

        let result: Result<()> = retry_on_conflict(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(IpamError::OptimisticLock(cidr)) }
        })
        .await;

        assert!(matches!(result, Err(IpamError::OptimisticLock(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_other_errors_break_out_immediately() {
        let attempts = AtomicU32::new(0);

        let result: Result<()> = retry_on_conflict(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(IpamError::NotFound("10.0.0.0/24".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(IpamError::NotFound(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovery_mid_budget_returns_the_value() {
        let attempts = AtomicU32::new(0);
        let cidr = "10.0.0.0/24".parse().unwrap();

        let result = retry_on_conflict(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(IpamError::OptimisticLock(cidr))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
