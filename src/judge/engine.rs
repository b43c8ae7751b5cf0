//! Outcome judgment.

use std::sync::Arc;

use tracing::{debug, info};

use super::parsing::parse_outcome;
use super::types::{Confidence, JudgeConfig, KeyPointSet, ScreenshotSelection, Verdict, VerdictStatus};
use crate::error::JudgeError;
use crate::llm::{
    call_with_retry, image_data_url, ContentPart, GenerationRequest, LlmProvider, Message,
};
use crate::prompts::build_outcome_prompt;
use crate::trajectory::{Task, Trajectory};

/// Stage name reported in errors and logs.
pub const OUTCOME_STAGE: &str = "outcome";

/// Neutral point of the confidence scale.
const CONFIDENCE_MIDPOINT: u8 = 3;

/// Confidence is certainty of success, so a failure above the midpoint or a
/// success below it cannot both hold.
fn contradicts(status: VerdictStatus, confidence: Confidence) -> bool {
    match status {
        VerdictStatus::Failure => confidence.get() > CONFIDENCE_MIDPOINT,
        VerdictStatus::Success => confidence.get() < CONFIDENCE_MIDPOINT,
    }
}

/// Encodes the screenshots at `positions` as image content parts.
pub(crate) fn screenshot_parts(
    trajectory: &Trajectory,
    positions: &[usize],
) -> std::io::Result<Vec<ContentPart>> {
    positions
        .iter()
        .filter_map(|&position| trajectory.screenshot(position))
        .map(|path| image_data_url(path).map(ContentPart::image))
        .collect()
}

/// Produces the final verdict for one trajectory.
///
/// The model sees the task, the key points (when the mode uses them), the
/// factual action history and the selected screenshots. The agent's final
/// response and its thoughts are never shown.
pub struct JudgmentEngine {
    llm: Arc<dyn LlmProvider>,
    config: JudgeConfig,
}

impl JudgmentEngine {
    pub fn new(llm: Arc<dyn LlmProvider>, config: JudgeConfig) -> Self {
        Self { llm, config }
    }

    /// Judges `trajectory` with the given mode `system` prompt.
    ///
    /// A missing or out-of-range confidence, or one that contradicts the
    /// status, yields a failure verdict at minimum confidence. An answer without a status is retried
    /// and, once the budget is spent, surfaces as [`JudgeError`].
    pub async fn judge(
        &self,
        system: &str,
        task: &Task,
        key_points: Option<&KeyPointSet>,
        selection: &ScreenshotSelection,
        trajectory: &Trajectory,
    ) -> Result<Verdict, JudgeError> {
        let history = trajectory.action_history();
        let images = screenshot_parts(trajectory, selection.indices())?;
        let prompt = build_outcome_prompt(
            system,
            task,
            key_points.map(KeyPointSet::as_slice),
            &history,
            images.len(),
        );

        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::text(prompt.user));
        parts.extend(images);

        let request = GenerationRequest::new(
            self.config.model.clone(),
            vec![Message::system(prompt.system), Message::user_parts(parts)],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        debug!(
            task_id = %task.task_id,
            actions = history.len(),
            screenshots = selection.len(),
            "Requesting outcome judgment"
        );

        let answer = call_with_retry(
            self.llm.as_ref(),
            &request,
            &self.config.retry,
            OUTCOME_STAGE,
            parse_outcome,
        )
        .await?;

        let (status, confidence) = match answer.confidence {
            Some(confidence) if contradicts(answer.status, confidence) => {
                debug!(
                    task_id = %task.task_id,
                    status = %answer.status,
                    confidence = confidence.get(),
                    "Status contradicts confidence, recording failure"
                );
                (VerdictStatus::Failure, Confidence::MIN)
            }
            Some(confidence) => (answer.status, confidence),
            None => {
                debug!(
                    task_id = %task.task_id,
                    "Answer carried no usable confidence, recording failure"
                );
                (VerdictStatus::Failure, Confidence::MIN)
            }
        };

        info!(
            task_id = %task.task_id,
            status = %status,
            confidence = confidence.get(),
            "Verdict reached"
        );

        Ok(Verdict::new(
            status,
            confidence,
            answer.thoughts,
            key_points
                .map(|points| points.as_slice().to_vec())
                .unwrap_or_default(),
            selection.indices().to_vec(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::judge::selector::uniform_stride;
    use crate::llm::{Choice, GenerationResponse, RetryPolicy, Usage};
    use crate::prompts::{AGENTTREK_SYSTEM, WEBJUDGE_ONLINE_MIND2WEB_SYSTEM};
    use crate::trajectory::{AgentStatus, Step};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    struct MockLlmProvider {
        response: Mutex<String>,
        last_request: Mutex<Option<GenerationRequest>>,
    }

    impl MockLlmProvider {
        fn new(response: impl Into<String>) -> Self {
            Self {
                response: Mutex::new(response.into()),
                last_request: Mutex::new(None),
            }
        }

        fn last_request(&self) -> GenerationRequest {
            self.last_request
                .lock()
                .expect("lock not poisoned")
                .clone()
                .expect("request recorded")
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            *self.last_request.lock().expect("lock not poisoned") = Some(request);
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

    fn trajectory(dir: &TempDir) -> Trajectory {
        let steps = (0..3)
            .map(|i| {
                let path = dir.path().join(format!("{}.png", i));
                std::fs::write(&path, PNG_MAGIC).expect("write screenshot");
                Step::new(i, path, format!("<a> Link {} -> CLICK", i))
                    .with_thought(format!("secret reasoning {}", i))
            })
            .collect();
        Trajectory::new(
            "t1",
            steps,
            Some("I have definitely completed the task".to_string()),
            AgentStatus::Success,
        )
        .expect("valid trajectory")
    }

    fn engine(mock: Arc<MockLlmProvider>) -> JudgmentEngine {
        JudgmentEngine::new(
            mock,
            JudgeConfig::default()
                .with_retry(RetryPolicy::new(2).with_base_delay(Duration::from_millis(1))),
        )
    }

    #[tokio::test]
    async fn test_judge_success() {
        let dir = TempDir::new().expect("temp dir");
        let trajectory = trajectory(&dir);
        let mock = Arc::new(MockLlmProvider::new(
            r#"{"thoughts": "Results are sorted.", "status": "success", "confidence": 5}"#,
        ));
        let points = KeyPointSet::new(vec!["Sorted by price".to_string()]);
        let selection = uniform_stride(trajectory.len(), 2);

        let verdict = engine(mock.clone())
            .judge(
                WEBJUDGE_ONLINE_MIND2WEB_SYSTEM,
                &Task::new("t1", "Sort by price"),
                Some(&points),
                &selection,
                &trajectory,
            )
            .await
            .expect("should succeed");

        assert_eq!(verdict.status(), VerdictStatus::Success);
        assert_eq!(verdict.confidence(), Confidence::MAX);
        assert_eq!(verdict.rationale(), "Results are sorted.");
        assert_eq!(verdict.key_points(), &["Sorted by price".to_string()]);
        assert_eq!(verdict.screenshot_indices(), &[0, 2]);

        let request = mock.last_request();
        assert_eq!(request.messages[1].image_count(), 2);
        let text = request.messages[1].text();
        assert!(text.contains("Sorted by price"));
        assert!(!text.contains("definitely completed"));
        assert!(!text.contains("secret reasoning"));
    }

    #[tokio::test]
    async fn test_missing_confidence_is_failure() {
        let dir = TempDir::new().expect("temp dir");
        let trajectory = trajectory(&dir);
        let mock = Arc::new(MockLlmProvider::new(r#"{"thoughts": "ok", "status": "success"}"#));

        let verdict = engine(mock)
            .judge(
                AGENTTREK_SYSTEM,
                &Task::new("t1", "Sort by price"),
                None,
                &ScreenshotSelection::none(),
                &trajectory,
            )
            .await
            .expect("should succeed");

        assert_eq!(verdict.status(), VerdictStatus::Failure);
        assert_eq!(verdict.confidence(), Confidence::MIN);
        assert!(verdict.key_points().is_empty());
        assert!(verdict.screenshot_indices().is_empty());
    }

    async fn judge_answer(answer: &str) -> Verdict {
        let dir = TempDir::new().expect("temp dir");
        let trajectory = trajectory(&dir);
        engine(Arc::new(MockLlmProvider::new(answer)))
            .judge(
                AGENTTREK_SYSTEM,
                &Task::new("t1", "Sort by price"),
                None,
                &ScreenshotSelection::none(),
                &trajectory,
            )
            .await
            .expect("should succeed")
    }

    #[tokio::test]
    async fn test_confident_failure_cannot_pass() {
        let verdict = judge_answer(r#"{"thoughts": "Wrong item.", "status": "failure", "confidence": 5}"#).await;
        assert_eq!(verdict.status(), VerdictStatus::Failure);
        assert_eq!(verdict.confidence(), Confidence::MIN);
        assert!(!verdict.passes(Confidence::threshold(3).expect("valid threshold")));
        assert_eq!(verdict.rationale(), "Wrong item.");
    }

    #[tokio::test]
    async fn test_doubtful_success_is_failure() {
        let verdict = judge_answer(r#"{"thoughts": "Maybe.", "status": "success", "confidence": 2}"#).await;
        assert_eq!(verdict.status(), VerdictStatus::Failure);
        assert_eq!(verdict.confidence(), Confidence::MIN);
    }

    #[tokio::test]
    async fn test_consistent_answers_kept() {
        let verdict = judge_answer(r#"{"thoughts": "No.", "status": "failure", "confidence": 2}"#).await;
        assert_eq!(verdict.status(), VerdictStatus::Failure);
        assert_eq!(verdict.confidence().get(), 2);

        let verdict = judge_answer(r#"{"thoughts": "Unsure.", "status": "success", "confidence": 3}"#).await;
        assert_eq!(verdict.status(), VerdictStatus::Success);
        assert_eq!(verdict.confidence().get(), 3);
    }

    #[test]
    fn test_contradicts() {
        let c = |v| Confidence::new(v).expect("valid confidence");
        assert!(contradicts(VerdictStatus::Failure, c(4)));
        assert!(!contradicts(VerdictStatus::Failure, c(3)));
        assert!(contradicts(VerdictStatus::Success, c(1)));
        assert!(!contradicts(VerdictStatus::Success, c(3)));
    }

    #[tokio::test]
    async fn test_empty_trajectory_judged_from_empty_history() {
        let mock = Arc::new(MockLlmProvider::new(
            r#"{"thoughts": "Nothing was done.", "status": "failure", "confidence": 1}"#,
        ));
        let trajectory =
            Trajectory::new("t1", vec![], None, AgentStatus::Failure).expect("valid trajectory");

        let verdict = engine(mock.clone())
            .judge(
                AGENTTREK_SYSTEM,
                &Task::new("t1", "Sort by price"),
                None,
                &ScreenshotSelection::final_only(trajectory.len()),
                &trajectory,
            )
            .await
            .expect("should succeed");

        assert_eq!(verdict.status(), VerdictStatus::Failure);
        assert!(verdict.screenshot_indices().is_empty());
        let request = mock.last_request();
        assert_eq!(request.messages[1].image_count(), 0);
        assert!(request.messages[1].text().contains("(no actions recorded)"));
    }

    #[tokio::test]
    async fn test_statusless_answer_exhausts_budget() {
        let dir = TempDir::new().expect("temp dir");
        let trajectory = trajectory(&dir);
        let mock = Arc::new(MockLlmProvider::new("It is hard to say."));

        let err = engine(mock)
            .judge(
                AGENTTREK_SYSTEM,
                &Task::new("t1", "Sort by price"),
                None,
                &ScreenshotSelection::none(),
                &trajectory,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JudgeError::RetriesExhausted { ref stage, .. } if stage == OUTCOME_STAGE
        ));
    }

    #[tokio::test]
    async fn test_missing_screenshot_is_attachment_error() {
        let dir = TempDir::new().expect("temp dir");
        let trajectory = trajectory(&dir);
        std::fs::remove_file(dir.path().join("2.png")).expect("remove");
        let mock = Arc::new(MockLlmProvider::new("unused"));

        let err = engine(mock)
            .judge(
                AGENTTREK_SYSTEM,
                &Task::new("t1", "Sort by price"),
                None,
                &ScreenshotSelection::final_only(trajectory.len()),
                &trajectory,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JudgeError::Attachment(_)));
    }
}
