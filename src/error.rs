//! Error types for webjudge operations.
//!
//! Defines the error taxonomy shared by every subsystem:
//! - Trajectory ingestion and validation
//! - Judge-model transport calls
//! - Judge stages that exhausted their retry budget
//! - Credential pool protocol violations
//! - Configuration validation

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while turning a raw recording into a [`Trajectory`].
///
/// Any of these causes the task to be skipped with a warning; none of them
/// aborts a batch run.
///
/// [`Trajectory`]: crate::trajectory::Trajectory
#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error("Trajectory for task '{task_id}' is missing required field '{field}'")]
    MissingField { task_id: String, field: String },

    #[error("Screenshot '{path}' for task '{task_id}' is unreadable: {reason}")]
    UnreadableScreenshot {
        task_id: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Step ordering for task '{task_id}' is not monotonic: index {index} follows {previous}")]
    NonMonotonic {
        task_id: String,
        previous: u32,
        index: u32,
    },

    #[error("Action {index} of task '{task_id}' is agent narration, not a factual action: {preview}")]
    NarrationInActions {
        task_id: String,
        index: usize,
        preview: String,
    },

    #[error("Task '{task_id}' has {screenshots} screenshots for {actions} actions")]
    ScreenshotCountMismatch {
        task_id: String,
        screenshots: usize,
        actions: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during a single judge-model call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: no credential supplied for the judge model")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Whether another attempt at the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::Timeout(_) | LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
            LlmError::ParseError(_) => true,
            LlmError::MissingApiKey | LlmError::Io(_) => false,
        }
    }
}

/// A judge stage could not produce a usable answer.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Judge stage '{stage}' failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        stage: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Judge stage '{stage}' failed: {source}")]
    NonRetryable {
        stage: String,
        #[source]
        source: LlmError,
    },

    #[error("Screenshot could not be attached to the judge prompt: {0}")]
    Attachment(#[from] std::io::Error),
}

/// Errors raised by the credential pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A credential was released to a pool that did not lend it, or that no
    /// longer considers it borrowed. Indicates a logic defect in the caller.
    #[error("Pool protocol violation: {0}")]
    Protocol(String),

    #[error("Credential pool is empty")]
    EmptyPool,

    #[error("Invalid credential source: {0}")]
    InvalidSource(String),

    #[error("Credential pool is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration values that cannot produce a valid run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown evaluation mode '{0}'")]
    UnknownMode(String),

    #[error("Failed to read config file '{path}': {message}")]
    File { path: PathBuf, message: String },
}

/// Task-level evaluation failure, recorded in the result output.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Judge(#[from] JudgeError),

    #[error("Judge model unavailable: {0}")]
    Provider(#[from] LlmError),

    #[error("Evaluation exceeded the task timeout of {0:?}")]
    TimeoutExceeded(Duration),
}

/// Conditions that abort a batch run.
///
/// Per-task failures never appear here; they become result records.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to write results: {0}")]
    Output(#[from] std::io::Error),

    #[error("Worker {worker_id} stopped unexpectedly: {message}")]
    Worker { worker_id: String, message: String },
}
