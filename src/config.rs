//! Run settings: YAML file values overlaid by command-line values.
//!
//! Every field is optional so that layers can be merged; defaults are applied
//! once in [`Settings::resolve`].
//!
//! ```yaml
//! mode: WebJudge_Online_Mind2Web_eval,AgentTrek_eval
//! model: gpt-4o-mini
//! trajectories_dir: ./data/trajectories
//! output_path: ./results
//! num_worker: 8
//! score_threshold: 3
//! screenshot_budget: 10
//! fallback: uniform_stride
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::eval::{EvalConfig, EvalMode};
use crate::judge::{Confidence, FallbackHeuristic, JudgeConfig, SelectionConfig};
use crate::llm::{RetryPolicy, DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::scheduler::{OrchestratorConfig, DEFAULT_SCORE_THRESHOLD, DEFAULT_TASK_TIMEOUT_SECS};

/// Default directory for result files.
pub const DEFAULT_OUTPUT_PATH: &str = "./eval_results";

/// One layer of run settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Comma-separated mode names.
    pub mode: Option<String>,
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub api_keys_file: Option<PathBuf>,
    pub trajectories_dir: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub num_worker: Option<usize>,
    pub score_threshold: Option<u8>,
    pub task_timeout_secs: Option<u64>,
    pub screenshot_budget: Option<usize>,
    pub min_relevance: Option<u8>,
    pub fallback: Option<FallbackHeuristic>,
    pub max_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub model: String,
    pub api_base: String,
    pub api_keys_file: Option<PathBuf>,
    pub trajectories_dir: PathBuf,
    pub output_path: PathBuf,
    pub orchestrator: OrchestratorConfig,
}

impl Settings {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::File {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Returns `self` with every value set in `overrides` replaced.
    pub fn overlay(self, overrides: Settings) -> Settings {
        Settings {
            mode: overrides.mode.or(self.mode),
            model: overrides.model.or(self.model),
            api_base: overrides.api_base.or(self.api_base),
            api_keys_file: overrides.api_keys_file.or(self.api_keys_file),
            trajectories_dir: overrides.trajectories_dir.or(self.trajectories_dir),
            output_path: overrides.output_path.or(self.output_path),
            num_worker: overrides.num_worker.or(self.num_worker),
            score_threshold: overrides.score_threshold.or(self.score_threshold),
            task_timeout_secs: overrides.task_timeout_secs.or(self.task_timeout_secs),
            screenshot_budget: overrides.screenshot_budget.or(self.screenshot_budget),
            min_relevance: overrides.min_relevance.or(self.min_relevance),
            fallback: overrides.fallback.or(self.fallback),
            max_attempts: overrides.max_attempts.or(self.max_attempts),
            retry_base_delay_ms: overrides.retry_base_delay_ms.or(self.retry_base_delay_ms),
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
        }
    }

    /// Applies defaults and validates the result.
    pub fn resolve(self) -> Result<RunSettings, ConfigError> {
        let trajectories_dir = self.trajectories_dir.ok_or_else(|| ConfigError::InvalidValue {
            key: "trajectories_dir".to_string(),
            message: "is required".to_string(),
        })?;

        let modes = match self.mode.as_deref() {
            Some(names) => EvalMode::parse_list(names)?,
            None => vec![EvalMode::default()],
        };
        let model = self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let threshold = Confidence::threshold(self.score_threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD))?;

        let mut retry = RetryPolicy::default();
        if let Some(max_attempts) = self.max_attempts {
            retry.max_attempts = max_attempts;
        }
        if let Some(delay_ms) = self.retry_base_delay_ms {
            retry = retry.with_base_delay(Duration::from_millis(delay_ms));
        }

        let mut judge = JudgeConfig::default()
            .with_model(model.clone())
            .with_retry(retry);
        if let Some(temperature) = self.temperature {
            judge = judge.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            judge = judge.with_max_tokens(max_tokens);
        }

        let mut selection = SelectionConfig::default();
        if let Some(budget) = self.screenshot_budget {
            selection = selection.with_budget(budget);
        }
        if let Some(min) = self.min_relevance {
            selection = selection.with_min_relevance(min);
        }
        if let Some(fallback) = self.fallback {
            selection = selection.with_fallback(fallback);
        }

        let orchestrator = OrchestratorConfig::default()
            .with_num_workers(self.num_worker.unwrap_or(1))
            .with_task_timeout(Duration::from_secs(
                self.task_timeout_secs.unwrap_or(DEFAULT_TASK_TIMEOUT_SECS),
            ))
            .with_modes(modes)
            .with_score_threshold(threshold)
            .with_eval(EvalConfig::default().with_judge(judge).with_selection(selection));
        orchestrator.validate()?;

        Ok(RunSettings {
            model,
            api_base: self
                .api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_keys_file: self.api_keys_file,
            trajectories_dir,
            output_path: self
                .output_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH)),
            orchestrator,
        })
    }
}
