//! Bounded exponential-backoff retry around judge-model calls.
//!
//! A judge stage succeeds only when the model answers *and* the answer parses;
//! both transport failures and unparsable answers consume an attempt.

use std::time::Duration;

use tracing::{debug, warn};

use super::client::{GenerationRequest, LlmProvider};
use crate::error::{ConfigError, JudgeError, LlmError};

/// Maximum number of attempts per judge stage.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Upper bound on a single backoff delay in milliseconds.
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Retry budget for one judge stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each later attempt.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait before `attempt` (1-based). The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Sends `request` until `parse` accepts the answer or the budget runs out.
///
/// Transient transport errors and parse failures are retried; any other
/// transport error fails the stage immediately.
pub async fn call_with_retry<T, F>(
    provider: &dyn LlmProvider,
    request: &GenerationRequest,
    policy: &RetryPolicy,
    stage: &str,
    parse: F,
) -> Result<T, JudgeError>
where
    F: Fn(&str) -> Result<T, String>,
{
    let mut last_error: Option<LlmError> = None;

    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            debug!(
                stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying judge call after failure"
            );
            tokio::time::sleep(delay).await;
        }

        let outcome = provider.generate(request.clone()).await.and_then(|response| {
            response
                .first_content()
                .ok_or_else(|| LlmError::ParseError("No content in LLM response".to_string()))
        });

        let err = match outcome {
            Ok(content) => match parse(&content) {
                Ok(value) => return Ok(value),
                Err(reason) => LlmError::ParseError(reason),
            },
            Err(err) => err,
        };

        if !err.is_transient() {
            return Err(JudgeError::NonRetryable {
                stage: stage.to_string(),
                source: err,
            });
        }

        warn!(
            stage,
            attempt,
            max_attempts = policy.max_attempts,
            error = %err,
            "Judge call failed, will retry if budget remains"
        );
        last_error = Some(err);
    }

    Err(JudgeError::RetriesExhausted {
        stage: stage.to_string(),
        attempts: policy.max_attempts,
        last_error: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts were made".to_string()),
    })
}
