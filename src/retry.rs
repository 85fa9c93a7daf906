use std::{future::Future, time::Duration};

use thiserror::Error;

use crate::LLMError;

/// Shared retry discipline for every reasoning-service call. Constructed once
/// per evaluation request and handed down immutably; components differ only in
/// their failure predicate (applied inside the attempt) and in what they do
/// after exhaustion.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

#[derive(Debug, Error)]
#[error("{stage} failed after {attempts} attempts: {last}")]
pub struct RetryError {
    pub stage: &'static str,
    pub attempts: u32,
    pub last: LLMError,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after the given 0-based failed attempt: `base * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Runs `attempt_fn` up to `max_attempts` times with exponential backoff
    /// between attempts. No sleep follows the final failure.
    pub async fn run<T, F, Fut>(&self, stage: &'static str, mut attempt_fn: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LLMError>>,
    {
        let mut last: Option<LLMError> = None;

        for attempt in 0..self.max_attempts {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    tracing::warn!(
                        stage,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "attempt failed"
                    );
                    last = Some(error);
                }
            }

            if attempt + 1 < self.max_attempts {
                let delay = self.backoff_delay(attempt);
                tracing::debug!(stage, delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(delay).await;
            }
        }

        Err(RetryError {
            stage,
            attempts: self.max_attempts,
            last: last.unwrap_or_else(|| LLMError::Provider("no attempts were made".to_string())),
        })
    }
}
