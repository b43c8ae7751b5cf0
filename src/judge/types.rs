//! Artifacts produced by the judge stages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::llm::RetryPolicy;

/// Ordinal certainty of success, 1 (certain failure) to 5 (certain success).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Confidence(u8);

impl Confidence {
    pub const MIN: Confidence = Confidence(1);
    pub const MAX: Confidence = Confidence(5);

    /// Returns `None` outside 1..=5.
    pub fn new(value: u8) -> Option<Self> {
        (1..=5).contains(&value).then_some(Confidence(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Parses a CLI/config threshold value.
    pub fn threshold(value: u8) -> Result<Self, ConfigError> {
        Self::new(value).ok_or_else(|| ConfigError::InvalidValue {
            key: "score_threshold".to_string(),
            message: format!("{} is outside 1-5", value),
        })
    }
}

impl TryFrom<u8> for Confidence {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Confidence::new(value).ok_or_else(|| format!("confidence {} is outside 1-5", value))
    }
}

impl From<Confidence> for u8 {
    fn from(value: Confidence) -> Self {
        value.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The judge's binary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Success,
    Failure,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictStatus::Success => write!(f, "success"),
            VerdictStatus::Failure => write!(f, "failure"),
        }
    }
}

/// Ordered checklist of criteria a successful run must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPointSet(Vec<String>);

impl KeyPointSet {
    pub fn new(points: Vec<String>) -> Self {
        Self(points)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Chronologically ordered subset of trajectory step positions.
///
/// Built by the selector, which guarantees the positions are strictly
/// increasing, never exceed the budget and always include the final step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotSelection(Vec<usize>);

impl ScreenshotSelection {
    /// Sorts and de-duplicates `positions`.
    pub(crate) fn from_positions(mut positions: Vec<usize>) -> Self {
        positions.sort_unstable();
        positions.dedup();
        Self(positions)
    }

    /// No screenshots, for text-only judgment.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// Only the final step of a trajectory of `len` steps.
    pub fn final_only(len: usize) -> Self {
        Self(len.checked_sub(1).into_iter().collect())
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, position: usize) -> bool {
        self.0.binary_search(&position).is_ok()
    }
}

/// Final judgment for one (task, mode) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    status: VerdictStatus,
    confidence: Confidence,
    rationale: String,
    key_points: Vec<String>,
    screenshot_indices: Vec<usize>,
}

impl Verdict {
    pub fn new(
        status: VerdictStatus,
        confidence: Confidence,
        rationale: impl Into<String>,
        key_points: Vec<String>,
        screenshot_indices: Vec<usize>,
    ) -> Self {
        Self {
            status,
            confidence,
            rationale: rationale.into(),
            key_points,
            screenshot_indices,
        }
    }

    pub fn status(&self) -> VerdictStatus {
        self.status
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn key_points(&self) -> &[String] {
        &self.key_points
    }

    pub fn screenshot_indices(&self) -> &[usize] {
        &self.screenshot_indices
    }

    /// Pass/fail under `threshold`: `confidence >= threshold`.
    pub fn passes(&self, threshold: Confidence) -> bool {
        self.confidence >= threshold
    }
}

/// Model parameters shared by every judge stage.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// Model identifier; empty uses the provider's default.
    pub model: String,
    /// Sampling temperature. Default: 0.0.
    pub temperature: f64,
    /// Maximum tokens per answer. Default: 1024.
    pub max_tokens: u32,
    /// Retry budget applied to each stage independently.
    pub retry: RetryPolicy,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.0,
            max_tokens: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl JudgeConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
