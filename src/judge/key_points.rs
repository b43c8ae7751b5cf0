//! Key-point extraction from the task intent.

use std::sync::Arc;

use tracing::{debug, info};

use super::parsing::parse_key_points;
use super::types::{JudgeConfig, KeyPointSet};
use crate::error::JudgeError;
use crate::llm::{call_with_retry, GenerationRequest, LlmProvider, Message};
use crate::prompts::build_key_point_prompt;
use crate::trajectory::Task;

/// Stage name reported in errors and logs.
pub const KEY_POINT_STAGE: &str = "key_points";

/// Turns a task intent into an ordered checklist of success criteria.
///
/// Only the intent is shown to the model, so the checklist cannot be biased
/// by anything the agent did.
pub struct KeyPointExtractor {
    llm: Arc<dyn LlmProvider>,
    config: JudgeConfig,
}

impl KeyPointExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>, config: JudgeConfig) -> Self {
        Self { llm, config }
    }

    /// Extracts key points for `task`.
    ///
    /// Fails with [`JudgeError::RetriesExhausted`] when the model never
    /// produces a parsable, non-empty list within the retry budget.
    pub async fn extract(&self, task: &Task) -> Result<KeyPointSet, JudgeError> {
        let prompt = build_key_point_prompt(task);
        let request = GenerationRequest::new(
            self.config.model.clone(),
            vec![Message::system(prompt.system), Message::user(prompt.user)],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        debug!(task_id = %task.task_id, "Extracting key points");

        let points = call_with_retry(
            self.llm.as_ref(),
            &request,
            &self.config.retry,
            KEY_POINT_STAGE,
            parse_key_points,
        )
        .await?;

        info!(
            task_id = %task.task_id,
            key_points = points.len(),
            "Key points extracted"
        );
        Ok(KeyPointSet::new(points))
    }
}
