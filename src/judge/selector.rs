//! Key screenshot selection under a size budget.
//!
//! A full trajectory can hold far more screenshots than one judge call can
//! economically consume. The selector scores every non-final screenshot for
//! relevance to the key points in one batched call, keeps the best ones, and
//! always keeps the final screenshot so the judge sees the end state.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::engine::screenshot_parts;
use super::parsing::parse_image_scores;
use super::types::{JudgeConfig, KeyPointSet, ScreenshotSelection};
use crate::error::{ConfigError, JudgeError};
use crate::llm::{call_with_retry, ContentPart, GenerationRequest, LlmProvider, Message};
use crate::prompts::build_image_scoring_prompt;
use crate::trajectory::{Task, Trajectory};

/// Stage name reported in errors and logs.
pub const SELECTION_STAGE: &str = "screenshot_scoring";

/// Default number of screenshots shown to the judge.
pub const DEFAULT_SCREENSHOT_BUDGET: usize = 10;

/// Heuristic used when model scoring is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackHeuristic {
    /// Evenly spaced positions from first to last.
    #[default]
    UniformStride,
    /// The last `budget` positions.
    Tail,
}

impl FallbackHeuristic {
    pub fn apply(self, len: usize, budget: usize) -> ScreenshotSelection {
        match self {
            FallbackHeuristic::UniformStride => uniform_stride(len, budget),
            FallbackHeuristic::Tail => tail(len, budget),
        }
    }
}

impl fmt::Display for FallbackHeuristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackHeuristic::UniformStride => write!(f, "uniform_stride"),
            FallbackHeuristic::Tail => write!(f, "tail"),
        }
    }
}

impl FromStr for FallbackHeuristic {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "uniform_stride" | "uniform" | "stride" => Ok(FallbackHeuristic::UniformStride),
            "tail" => Ok(FallbackHeuristic::Tail),
            other => Err(ConfigError::InvalidValue {
                key: "fallback".to_string(),
                message: format!("unknown fallback heuristic '{}'", other),
            }),
        }
    }
}

/// Selection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionConfig {
    /// Maximum screenshots in a selection, final screenshot included. Default: 10.
    pub budget: usize,
    /// Non-final screenshots scoring below this are dropped even when budget remains.
    pub min_relevance: Option<u8>,
    /// Heuristic used when scoring fails. Default: uniform stride.
    pub fallback: FallbackHeuristic,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_SCREENSHOT_BUDGET,
            min_relevance: None,
            fallback: FallbackHeuristic::default(),
        }
    }
}

impl SelectionConfig {
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_min_relevance(mut self, min_relevance: u8) -> Self {
        self.min_relevance = Some(min_relevance);
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackHeuristic) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget == 0 {
            return Err(ConfigError::InvalidValue {
                key: "screenshot_budget".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if let Some(min) = self.min_relevance {
            if !(1..=5).contains(&min) {
                return Err(ConfigError::InvalidValue {
                    key: "min_relevance".to_string(),
                    message: format!("{} is outside 1-5", min),
                });
            }
        }
        Ok(())
    }
}

/// `budget` evenly spaced positions over `0..len`, always ending at `len - 1`.
pub fn uniform_stride(len: usize, budget: usize) -> ScreenshotSelection {
    if len == 0 {
        return ScreenshotSelection::none();
    }
    let budget = budget.max(1);
    if budget >= len {
        return ScreenshotSelection::from_positions((0..len).collect());
    }
    if budget == 1 {
        return ScreenshotSelection::final_only(len);
    }
    let last = len - 1;
    let positions = (0..budget)
        .map(|k| ((k * last) as f64 / (budget - 1) as f64).round() as usize)
        .collect();
    ScreenshotSelection::from_positions(positions)
}

/// The last `budget` positions of `0..len`.
pub fn tail(len: usize, budget: usize) -> ScreenshotSelection {
    let start = len.saturating_sub(budget.max(1));
    ScreenshotSelection::from_positions((start..len).collect())
}

/// Greedy selection from relevance scores of the non-final positions.
///
/// `scores[i]` belongs to position `i`; the final position `scores.len()` is
/// always kept. The `budget - 1` highest-scoring positions at or above
/// `min_relevance` are kept, ties broken toward earlier positions.
pub fn select_by_scores(
    scores: &[u8],
    budget: usize,
    min_relevance: Option<u8>,
) -> ScreenshotSelection {
    let final_position = scores.len();
    let mut ranked: Vec<(usize, u8)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| min_relevance.map_or(true, |min| *score >= min))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut positions: Vec<usize> = ranked
        .into_iter()
        .take(budget.max(1) - 1)
        .map(|(position, _)| position)
        .collect();
    positions.push(final_position);
    ScreenshotSelection::from_positions(positions)
}

/// Chooses which screenshots the judge sees.
pub struct KeyScreenshotSelector {
    llm: Arc<dyn LlmProvider>,
    config: JudgeConfig,
}

impl KeyScreenshotSelector {
    pub fn new(llm: Arc<dyn LlmProvider>, config: JudgeConfig) -> Self {
        Self { llm, config }
    }

    /// Selects at most `policy.budget` screenshots of `trajectory`.
    ///
    /// Never fails: when scoring cannot be obtained the policy's fallback
    /// heuristic decides instead. The result is never empty for a non-empty
    /// trajectory and always contains its final position.
    pub async fn select(
        &self,
        task: &Task,
        trajectory: &Trajectory,
        key_points: &KeyPointSet,
        policy: &SelectionConfig,
    ) -> ScreenshotSelection {
        let len = trajectory.len();
        let budget = policy.budget.max(1);

        if len <= 1 {
            return ScreenshotSelection::final_only(len);
        }
        if len <= budget && policy.min_relevance.is_none() {
            return ScreenshotSelection::from_positions((0..len).collect());
        }

        match self.score(task, trajectory, key_points).await {
            Ok(scores) => {
                let selection = select_by_scores(&scores, budget, policy.min_relevance);
                debug!(
                    task_id = %task.task_id,
                    steps = len,
                    selected = ?selection.indices(),
                    "Selected key screenshots"
                );
                selection
            }
            Err(e) => {
                warn!(
                    task_id = %task.task_id,
                    fallback = %policy.fallback,
                    error = %e,
                    "Screenshot scoring unavailable, using fallback heuristic"
                );
                policy.fallback.apply(len, budget)
            }
        }
    }

    /// Scores every non-final screenshot in one batched call.
    async fn score(
        &self,
        task: &Task,
        trajectory: &Trajectory,
        key_points: &KeyPointSet,
    ) -> Result<Vec<u8>, JudgeError> {
        let labels: Vec<usize> = (0..trajectory.len() - 1).collect();
        let prompt = build_image_scoring_prompt(task, key_points.as_slice(), &labels);

        let mut parts = vec![ContentPart::text(prompt.user)];
        parts.extend(screenshot_parts(trajectory, &labels)?);

        let request = GenerationRequest::new(
            self.config.model.clone(),
            vec![Message::system(prompt.system), Message::user_parts(parts)],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        call_with_retry(
            self.llm.as_ref(),
            &request,
            &self.config.retry,
            SELECTION_STAGE,
            |text| parse_image_scores(text, &labels),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, RetryPolicy, Usage};
    use crate::trajectory::{AgentStatus, Step};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    struct MockLlmProvider {
        response: Mutex<String>,
        calls: AtomicU32,
        images_seen: Mutex<usize>,
    }

    impl MockLlmProvider {
        fn new(response: impl Into<String>) -> Self {
            Self {
                response: Mutex::new(response.into()),
                calls: AtomicU32::new(0),
                images_seen: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.images_seen.lock().expect("lock not poisoned") =
                request.messages.iter().map(Message::image_count).sum();
            let content = self.response.lock().expect("lock not poisoned").clone();
            Ok(GenerationResponse {
                id: "mock-id".to_string(),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn trajectory(dir: &TempDir, steps: usize) -> Trajectory {
        let steps = (0..steps)
            .map(|i| {
                let path = dir.path().join(format!("{}_full_screenshot.png", i));
                std::fs::write(&path, PNG_MAGIC).expect("write screenshot");
                Step::new(i as u32, path, format!("<button> Step {} -> CLICK", i))
            })
            .collect();
        Trajectory::new("t1", steps, None, AgentStatus::Incomplete).expect("valid trajectory")
    }

    fn selector(mock: Arc<MockLlmProvider>) -> KeyScreenshotSelector {
        KeyScreenshotSelector::new(
            mock,
            JudgeConfig::default()
                .with_retry(RetryPolicy::new(2).with_base_delay(Duration::from_millis(1))),
        )
    }

    fn key_points() -> KeyPointSet {
        KeyPointSet::new(vec!["Sorted by price".to_string()])
    }

    #[test]
    fn test_uniform_stride() {
        assert_eq!(uniform_stride(10, 4).indices(), &[0, 3, 6, 9]);
        assert_eq!(uniform_stride(10, 1).indices(), &[9]);
        assert_eq!(uniform_stride(3, 10).indices(), &[0, 1, 2]);
        assert!(uniform_stride(0, 3).is_empty());
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail(10, 3).indices(), &[7, 8, 9]);
        assert_eq!(tail(2, 5).indices(), &[0, 1]);
        assert_eq!(tail(4, 0).indices(), &[3]);
    }

    #[test]
    fn test_select_by_scores_keeps_final_and_orders() {
        let selection = select_by_scores(&[2, 5, 1, 4, 5], 3, None);
        assert_eq!(selection.indices(), &[1, 4, 5]);

        let selection = select_by_scores(&[5, 5, 5], 1, None);
        assert_eq!(selection.indices(), &[3]);
    }

    #[test]
    fn test_select_by_scores_min_relevance() {
        let selection = select_by_scores(&[1, 2, 4, 1], 10, Some(3));
        assert_eq!(selection.indices(), &[2, 4]);
    }

    #[test]
    fn test_selection_invariants_hold_for_all_sizes() {
        for len in 1..25usize {
            let scores: Vec<u8> = (0..len - 1).map(|i| ((i * 7) % 5 + 1) as u8).collect();
            for budget in 1..12usize {
                for selection in [
                    select_by_scores(&scores, budget, None),
                    select_by_scores(&scores, budget, Some(4)),
                    uniform_stride(len, budget),
                    tail(len, budget),
                ] {
                    assert!(!selection.is_empty());
                    assert!(selection.len() <= budget);
                    assert_eq!(selection.indices().last(), Some(&(len - 1)));
                    assert!(selection.indices().windows(2).all(|w| w[0] < w[1]));
                }
            }
        }
    }

    #[test]
    fn test_selection_config_validate() {
        assert!(SelectionConfig::default().validate().is_ok());
        assert!(SelectionConfig::default().with_budget(0).validate().is_err());
        assert!(SelectionConfig::default().with_min_relevance(6).validate().is_err());
        assert_eq!(
            "tail".parse::<FallbackHeuristic>().expect("valid"),
            FallbackHeuristic::Tail
        );
        assert!("random".parse::<FallbackHeuristic>().is_err());
    }

    #[tokio::test]
    async fn test_three_steps_budget_two() {
        let dir = TempDir::new().expect("temp dir");
        let trajectory = trajectory(&dir, 3);
        let mock = Arc::new(MockLlmProvider::new(
            r#"{"scores": [{"image": 0, "score": 2}, {"image": 1, "score": 5}]}"#,
        ));

        let selection = selector(mock.clone())
            .select(
                &Task::new("t1", "Sort by price"),
                &trajectory,
                &key_points(),
                &SelectionConfig::default().with_budget(2),
            )
            .await;

        assert_eq!(selection.indices(), &[1, 2]);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*mock.images_seen.lock().expect("lock not poisoned"), 2);
    }

    #[tokio::test]
    async fn test_short_trajectory_skips_scoring() {
        let dir = TempDir::new().expect("temp dir");
        let trajectory = trajectory(&dir, 3);
        let mock = Arc::new(MockLlmProvider::new("unused"));

        let selection = selector(mock.clone())
            .select(
                &Task::new("t1", "Sort by price"),
                &trajectory,
                &key_points(),
                &SelectionConfig::default(),
            )
            .await;

        assert_eq!(selection.indices(), &[0, 1, 2]);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unparsable_scores_fall_back() {
        let dir = TempDir::new().expect("temp dir");
        let trajectory = trajectory(&dir, 10);
        let mock = Arc::new(MockLlmProvider::new("I'd rather not score these."));

        let policy = SelectionConfig::default()
            .with_budget(4)
            .with_fallback(FallbackHeuristic::Tail);
        let selection = selector(mock.clone())
            .select(&Task::new("t1", "Sort by price"), &trajectory, &key_points(), &policy)
            .await;

        assert_eq!(selection.indices(), &[6, 7, 8, 9]);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
    }
}
