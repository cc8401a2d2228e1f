//! Retry loops: capped exponential backoff, optionally rotating providers
//! through the fallback manager between attempts.

use crate::error::{AiError, ErrorKind, RelayError};
use crate::fallback::FallbackManager;
use crate::types::{Mode, ProviderDescriptor};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
        }
    }
}

/// Delay before the attempt following attempt `attempt` (0-based):
/// `min(base * 2^attempt, max)`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let ms = config
        .base_backoff_ms
        .saturating_mul(factor)
        .min(config.max_backoff_ms);
    Duration::from_millis(ms)
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), RelayError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn exhausted(attempts: u32, last: Option<AiError>) -> RelayError {
    RelayError::Exhausted {
        attempts,
        last: last.unwrap_or_else(|| AiError::new("relay", ErrorKind::Unknown, "no attempt was made")),
    }
}

/// Retry one operation against the same backend. Stops early on a
/// non-retryable error; never consults the fallback manager.
pub async fn retry_same<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RelayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AiError>>,
{
    let mut last = None;
    let mut attempts = 0;
    for attempt in 0..=config.max_retries {
        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        attempts += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err(RelayError::Cancelled),
            Err(e) => {
                let give_up = !e.retryable || attempt == config.max_retries;
                warn!(
                    provider = %e.provider,
                    kind = %e.kind,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    error = %e.message,
                    "attempt failed"
                );
                last = Some(e);
                if give_up {
                    break;
                }
                let delay = backoff_delay(config, attempt);
                debug!(backoff_ms = delay.as_millis() as u64, "backing off");
                sleep_or_cancel(delay, cancel).await?;
            }
        }
    }
    Err(exhausted(attempts, last))
}

/// Retry loop that asks the fallback manager which provider to use.
///
/// Retryable failures stay on the same provider until the manager puts it
/// into cooldown; non-retryable failures rotate immediately.
pub struct RetryDriver {
    fallback: Arc<FallbackManager>,
    config: RetryConfig,
}

impl RetryDriver {
    pub fn new(fallback: Arc<FallbackManager>, config: RetryConfig) -> Self {
        Self { fallback, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn fallback(&self) -> &Arc<FallbackManager> {
        &self.fallback
    }

    pub async fn run<T, F, Fut>(
        &self,
        mode: Mode,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RelayError>
    where
        F: FnMut(ProviderDescriptor) -> Fut,
        Fut: Future<Output = Result<T, AiError>>,
    {
        let max_retries = self.config.max_retries;
        let mut provider = self.fallback.get_next_provider(mode, None)?;
        let mut last = None;

        for attempt in 0..=max_retries {
            if cancel.is_cancelled() {
                return Err(RelayError::Cancelled);
            }
            info!(provider = %provider.name, mode = %mode, attempt = attempt + 1, "calling provider");

            let err = match op(provider.clone()).await {
                Ok(value) => {
                    self.fallback.record_success(&provider.name);
                    return Ok(value);
                }
                Err(e) if e.is_cancelled() => return Err(RelayError::Cancelled),
                Err(e) => e,
            };
            warn!(
                provider = %err.provider,
                kind = %err.kind,
                retryable = err.retryable,
                attempt = attempt + 1,
                max_attempts = max_retries + 1,
                error = %err.message,
                "provider call failed"
            );

            if attempt == max_retries {
                self.fallback.record_failure(&err);
                last = Some(err);
                break;
            }

            let next = if err.retryable {
                self.fallback.record_failure(&err);
                if self.fallback.is_cooling_down(&provider.name) {
                    self.fallback.select_provider(mode, Some(&provider.name))?
                } else {
                    provider.clone()
                }
            } else {
                self.fallback.get_next_provider(mode, Some(&err))?
            };
            if next.name != provider.name {
                info!(from = %provider.name, to = %next.name, mode = %mode, "rotating provider");
            }

            let delay = backoff_delay(&self.config, attempt);
            debug!(backoff_ms = delay.as_millis() as u64, "backing off");
            sleep_or_cancel(delay, cancel).await?;

            provider = next;
            last = Some(err);
        }

        Err(exhausted(max_retries + 1, last))
    }
}
