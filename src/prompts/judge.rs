//! Prompt builders for the three judge stages.
//!
//! Every builder takes only what its stage is allowed to see. Key-point
//! extraction sees the task intent alone; outcome judgment sees the intent,
//! key points, selected screenshots and the factual action history, but never
//! the agent's final response or its thoughts.

use crate::trajectory::Task;

/// System and user text for one judge call.
///
/// Screenshots are attached by the caller after the user text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgePrompt {
    pub system: String,
    pub user: String,
}

impl JudgePrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

const KEY_POINT_SYSTEM: &str = r#"You are an expert at analyzing web tasks. Given a task description, identify the key points that any successful completion of the task must satisfy.

Rules:
1. Read the task carefully and list every explicit requirement: filters, sort orders, quantities, locations, dates, prices, names and any other constraint.
2. Do not add requirements that the task does not state.
3. Keep each key point short, one requirement per point, phrased as a checkable condition.
4. Keep the order in which the requirements appear in the task.

Respond with JSON only:
{"key_points": ["<key point 1>", "<key point 2>"]}"#;

const IMAGE_SCORING_SYSTEM: &str = r#"You are an expert evaluator of web agent trajectories. You will see a task, its key points, and a numbered sequence of screenshots taken while an agent attempted the task.

For every screenshot, rate how much evidence it contains about whether the key points were satisfied:
1 - no relevant information
2 - marginally related page, nothing decisive
3 - shows progress toward some key points
4 - shows a key point being satisfied or violated
5 - decisive evidence about the final outcome

Respond with JSON only, one entry per screenshot, using the screenshot numbers given:
{"scores": [{"image": 0, "score": 3}, {"image": 1, "score": 5}]}"#;

const OUTPUT_CONTRACT: &str = r#"Respond with JSON only:
{"thoughts": "<your reasoning>", "status": "success" | "failure", "confidence": <integer 1-5>}

confidence is your certainty that the task was completed successfully:
1 - almost certainly failed, 2 - probably failed, 3 - uncertain, 4 - probably succeeded, 5 - almost certainly succeeded."#;

/// WebJudge evaluation on Online-Mind2Web tasks.
pub const WEBJUDGE_ONLINE_MIND2WEB_SYSTEM: &str = r#"You are an expert in evaluating the performance of a web navigation agent. The agent is designed to help a human user navigate a website to complete a task. You are given the user's task, the key points for task completion, the agent's action history, and the screenshots most relevant to the outcome.

Judge whether the agent completed the task:
1. Every key point must be satisfied. A missed filter, wrong sort order, wrong date or wrong item means failure.
2. Actions alone are not evidence. Verify outcomes in the screenshots; if a screenshot contradicts an action, trust the screenshot.
3. The final screenshot shows the end state. If the task requires reaching a specific page or result, it must be visible.
4. Submitting a form, purchasing or booking is only required when the task asks for it.
5. Partial completion is failure."#;

/// WebJudge evaluation for general websites.
pub const WEBJUDGE_GENERAL_SYSTEM: &str = r#"You are an expert in evaluating the performance of a web agent on an arbitrary website. You are given the user's task, the key points for task completion, the agent's action history, and the screenshots most relevant to the outcome.

Judge whether the agent completed the task:
1. Check each key point against the visible evidence. Missing evidence for a key point counts against success.
2. Prefer what the screenshots show over what the actions claim.
3. Accept equivalent ways of meeting a requirement when the website offers them (for example a different but correct navigation path).
4. Partial completion is failure."#;

/// Autonomous evaluation from the final state only.
pub const AUTONOMOUS_SYSTEM: &str = r#"You are an expert in evaluating the performance of a web agent. You are given the user's task, the agent's action history, and a screenshot of the final state of the website.

Judge whether the final state, reached through the listed actions, completes the task. If the final screenshot does not show evidence of completion, the task failed."#;

/// WebVoyager-style evaluation from the last screenshots.
pub const WEBVOYAGER_SYSTEM: &str = r#"You are an expert in evaluating web browsing tasks. You are given the user's task, the agent's action history, and the last screenshots of its run in chronological order.

Judge whether the task was completed. Base your decision on what the screenshots show. When the task has multiple parts, all of them must be satisfied."#;

/// AgentTrek-style evaluation from the action history only.
pub const AGENTTREK_SYSTEM: &str = r#"You are an expert in evaluating web agent trajectories from their action logs. You are given the user's task and the ordered list of actions the agent performed. No screenshots are available.

Judge whether the sequence of actions, if each one took effect as described, would complete the task. Missing steps, wrong inputs or actions on unrelated elements mean failure."#;

fn task_header(task: &Task) -> String {
    let mut header = format!("Task: {}", task.intent);
    if let Some(website) = &task.website {
        header.push_str(&format!("\nWebsite: {}", website));
    }
    header
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the key-point extraction prompt from the task intent alone.
pub fn build_key_point_prompt(task: &Task) -> JudgePrompt {
    JudgePrompt::new(KEY_POINT_SYSTEM, format!("Task: {}", task.intent))
}

/// Builds the batched screenshot scoring prompt.
///
/// `labels` are the numbers the model must use for each attached screenshot,
/// in attachment order.
pub fn build_image_scoring_prompt(task: &Task, key_points: &[String], labels: &[usize]) -> JudgePrompt {
    let labels = labels
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let user = format!(
        "{}\n\nKey points:\n{}\n\nThe following screenshots are attached in this order, numbered {}.",
        task_header(task),
        numbered(key_points),
        labels
    );
    JudgePrompt::new(IMAGE_SCORING_SYSTEM, user)
}

/// Builds the final outcome prompt.
///
/// `key_points` is `None` for modes that skip key-point extraction.
pub fn build_outcome_prompt(
    system: &str,
    task: &Task,
    key_points: Option<&[String]>,
    action_history: &[String],
    image_count: usize,
) -> JudgePrompt {
    let mut user = task_header(task);

    if let Some(points) = key_points {
        user.push_str("\n\nKey points:\n");
        user.push_str(&numbered(points));
    }

    user.push_str("\n\nAction history:\n");
    if action_history.is_empty() {
        user.push_str("(no actions recorded)");
    } else {
        user.push_str(&action_history.join("\n"));
    }

    if image_count > 0 {
        user.push_str(&format!(
            "\n\n{} screenshot(s) follow in chronological order; the last one shows the final state.",
            image_count
        ));
    }

    JudgePrompt::new(format!("{}\n\n{}", system, OUTPUT_CONTRACT), user)
}
