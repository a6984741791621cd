// swarm-autoscaler: Retry logic for transient orchestrator conflicts

use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::error::{is_update_conflict, AutoscalerError, Result};

/// Retry configuration for replica-update conflicts
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay after the n-th failed attempt is `n * backoff_step`
    pub backoff_step: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
        }
    }
}

/// Runs `f` until it succeeds, retrying only on swarm update conflicts
/// ("update out of sequence" / "update in progress") with a linearly
/// growing delay. Any other error surfaces immediately.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    service: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(AutoscalerError::Swarm(err)) if is_update_conflict(&err) => {
                if attempt >= config.max_attempts {
                    return Err(AutoscalerError::UpdateConflict {
                        service: service.to_string(),
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                warn!(
                    service,
                    attempt,
                    error = %err,
                    "Retrying service update due to transient error"
                );
                sleep(config.backoff_step * attempt).await;
            }
            Err(err) => return Err(err),
        }
    }
}
