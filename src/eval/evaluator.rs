//! Runs one evaluation mode over one trajectory.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::mode::{EvalMode, ScreenshotStrategy};
use crate::error::{ConfigError, JudgeError};
use crate::judge::{
    tail, JudgeConfig, JudgmentEngine, KeyPointExtractor, KeyPointSet, KeyScreenshotSelector,
    ScreenshotSelection, SelectionConfig, Verdict,
};
use crate::llm::LlmProvider;
use crate::trajectory::{Task, Trajectory};

/// Configuration shared by every mode.
#[derive(Debug, Clone, Default)]
pub struct EvalConfig {
    pub judge: JudgeConfig,
    pub selection: SelectionConfig,
}

impl EvalConfig {
    pub fn with_judge(mut self, judge: JudgeConfig) -> Self {
        self.judge = judge;
        self
    }

    pub fn with_selection(mut self, selection: SelectionConfig) -> Self {
        self.selection = selection;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.judge.retry.validate()?;
        self.selection.validate()
    }
}

/// Key points already extracted for the tasks a worker owns.
///
/// Lives inside one worker, so no locking is needed.
#[derive(Debug, Default)]
pub struct KeyPointCache {
    entries: HashMap<String, KeyPointSet>,
}

impl KeyPointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: &str) -> Option<&KeyPointSet> {
        self.entries.get(task_id)
    }

    pub fn insert(&mut self, task_id: impl Into<String>, points: KeyPointSet) {
        self.entries.insert(task_id.into(), points);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Composes the judge stages according to an [`EvalMode`].
pub struct Evaluator {
    extractor: KeyPointExtractor,
    selector: KeyScreenshotSelector,
    engine: JudgmentEngine,
    selection: SelectionConfig,
}

impl Evaluator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &EvalConfig) -> Self {
        Self {
            extractor: KeyPointExtractor::new(Arc::clone(&llm), config.judge.clone()),
            selector: KeyScreenshotSelector::new(Arc::clone(&llm), config.judge.clone()),
            engine: JudgmentEngine::new(llm, config.judge.clone()),
            selection: config.selection.clone(),
        }
    }

    /// Evaluates `trajectory` under `mode`.
    ///
    /// The trajectory is only read. Key points come from `cache` when the
    /// task was already seen by this worker.
    pub async fn evaluate(
        &self,
        mode: EvalMode,
        task: &Task,
        trajectory: &Trajectory,
        cache: &mut KeyPointCache,
    ) -> Result<Verdict, JudgeError> {
        debug!(task_id = %task.task_id, mode = %mode, "Evaluating trajectory");

        let key_points = if mode.uses_key_points() {
            Some(self.key_points(task, cache).await?)
        } else {
            None
        };

        let selection = match mode.screenshot_strategy() {
            ScreenshotStrategy::KeyScreenshots => {
                let empty = KeyPointSet::new(Vec::new());
                let points = key_points.as_ref().unwrap_or(&empty);
                self.selector
                    .select(task, trajectory, points, &self.selection)
                    .await
            }
            ScreenshotStrategy::FinalOnly => ScreenshotSelection::final_only(trajectory.len()),
            ScreenshotStrategy::Tail => tail(trajectory.len(), self.selection.budget),
            ScreenshotStrategy::None => ScreenshotSelection::none(),
        };

        self.engine
            .judge(
                mode.system_prompt(),
                task,
                key_points.as_ref(),
                &selection,
                trajectory,
            )
            .await
    }

    async fn key_points(
        &self,
        task: &Task,
        cache: &mut KeyPointCache,
    ) -> Result<KeyPointSet, JudgeError> {
        if let Some(points) = cache.get(&task.task_id) {
            debug!(task_id = %task.task_id, "Reusing cached key points");
            return Ok(points.clone());
        }
        let points = self.extractor.extract(task).await?;
        cache.insert(task.task_id.clone(), points.clone());
        Ok(points)
    }
}
