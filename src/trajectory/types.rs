//! Trajectory data types for recorded agent runs.
//!
//! A [`Trajectory`] is read-only input to the judgment pipeline: it is built
//! once by the loader, validated on construction, and only ever handed out by
//! shared reference afterwards.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrajectoryError;

/// A benchmark task the agent was asked to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for the task.
    pub task_id: String,

    /// Natural-language instruction given to the agent.
    pub intent: String,

    /// Starting website or URL, when recorded.
    #[serde(default)]
    pub website: Option<String>,

    /// Number of actions in the reference solution (difficulty proxy).
    #[serde(default)]
    pub reference_length: Option<u32>,
}

impl Task {
    /// Creates a task with only an identifier and intent.
    pub fn new(task_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            intent: intent.into(),
            website: None,
            reference_length: None,
        }
    }

    /// Sets the starting website.
    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    /// Sets the reference action count.
    pub fn with_reference_length(mut self, length: u32) -> Self {
        self.reference_length = Some(length);
        self
    }
}

/// Terminal status the agent reported for its own run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Failure,
    #[default]
    Incomplete,
}

/// One recorded step: the screenshot the agent saw and the action it took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Recorded sequence index. Strictly increasing within a trajectory.
    pub index: u32,

    /// Screenshot image on disk.
    pub screenshot: PathBuf,

    /// Agent reasoning for this step, if any. Never shown to the judge as fact.
    pub thought: Option<String>,

    /// Factual description of the action (e.g. `<button> -> CLICK`).
    pub action: String,

    /// Wall-clock time of the step, when recorded.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(index: u32, screenshot: impl Into<PathBuf>, action: impl Into<String>) -> Self {
        Self {
            index,
            screenshot: screenshot.into(),
            thought: None,
            action: action.into(),
            timestamp: None,
        }
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// The full recorded run of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    task_id: String,
    steps: Vec<Step>,
    final_response: Option<String>,
    status: AgentStatus,
}

impl Trajectory {
    /// Builds a trajectory, rejecting out-of-order step sequences.
    ///
    /// A run with no steps is valid: agents that fail before acting still
    /// get judged.
    pub fn new(
        task_id: impl Into<String>,
        steps: Vec<Step>,
        final_response: Option<String>,
        status: AgentStatus,
    ) -> Result<Self, TrajectoryError> {
        let task_id = task_id.into();
        for pair in steps.windows(2) {
            if pair[1].index <= pair[0].index {
                return Err(TrajectoryError::NonMonotonic {
                    task_id,
                    previous: pair[0].index,
                    index: pair[1].index,
                });
            }
        }
        Ok(Self {
            task_id,
            steps,
            final_response,
            status,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Steps in chronological order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Position of the step carrying the end state.
    pub fn final_position(&self) -> Option<usize> {
        self.steps.len().checked_sub(1)
    }

    /// Screenshot path for the step at `position`.
    pub fn screenshot(&self, position: usize) -> Option<&Path> {
        self.steps.get(position).map(|s| s.screenshot.as_path())
    }

    /// The agent's own closing message. Excluded from every judge prompt.
    pub fn final_response(&self) -> Option<&str> {
        self.final_response.as_deref()
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    /// Factual action history, one line per step, without thoughts.
    pub fn action_history(&self) -> Vec<String> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}", i + 1, step.action))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(index: u32) -> Step {
        Step::new(index, format!("/tmp/{}_full_screenshot.png", index), "<a> -> CLICK")
    }

    #[test]
    fn test_trajectory_accepts_increasing_indices() {
        let trajectory = Trajectory::new(
            "task-1",
            vec![step(0), step(2), step(5)],
            Some("done".to_string()),
            AgentStatus::Success,
        )
        .expect("valid trajectory");

        assert_eq!(trajectory.len(), 3);
        assert_eq!(trajectory.final_position(), Some(2));
        assert_eq!(trajectory.final_response(), Some("done"));
        assert_eq!(
            trajectory.screenshot(1),
            Some(Path::new("/tmp/2_full_screenshot.png"))
        );
    }

    #[test]
    fn test_trajectory_rejects_non_monotonic_steps() {
        let err = Trajectory::new(
            "task-1",
            vec![step(0), step(3), step(3)],
            None,
            AgentStatus::Incomplete,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            TrajectoryError::NonMonotonic {
                previous: 3,
                index: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_trajectory_allows_empty() {
        let trajectory =
            Trajectory::new("task-1", vec![], None, AgentStatus::Failure).expect("valid trajectory");
        assert!(trajectory.is_empty());
        assert_eq!(trajectory.final_position(), None);
        assert_eq!(trajectory.screenshot(0), None);
        assert!(trajectory.action_history().is_empty());
    }

    #[test]
    fn test_action_history_omits_thoughts() {
        let trajectory = Trajectory::new(
            "task-1",
            vec![
                step(0).with_thought("I should click the link"),
                Step::new(1, "/tmp/1.png", "<input> -> TYPE: shoes"),
            ],
            None,
            AgentStatus::Incomplete,
        )
        .expect("valid trajectory");

        let history = trajectory.action_history();
        assert_eq!(history, vec!["1. <a> -> CLICK", "2. <input> -> TYPE: shoes"]);
        assert!(history.iter().all(|line| !line.contains("should")));
    }

    #[test]
    fn test_agent_status_serde() {
        let status: AgentStatus = serde_json::from_str("\"incomplete\"").expect("parse");
        assert_eq!(status, AgentStatus::Incomplete);
        assert_eq!(AgentStatus::default(), AgentStatus::Incomplete);
    }
}
