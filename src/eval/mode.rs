//! Named evaluation methods.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::prompts::{
    AGENTTREK_SYSTEM, AUTONOMOUS_SYSTEM, WEBJUDGE_GENERAL_SYSTEM, WEBJUDGE_ONLINE_MIND2WEB_SYSTEM,
    WEBVOYAGER_SYSTEM,
};

/// Which screenshots a mode shows to the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotStrategy {
    /// Model-scored key screenshots under the selection budget.
    KeyScreenshots,
    /// The final screenshot only.
    FinalOnly,
    /// The last `budget` screenshots.
    Tail,
    /// No screenshots.
    None,
}

/// A named evaluation method.
///
/// The set is closed; every mode maps to one prompt and one pipeline shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvalMode {
    #[serde(rename = "WebJudge_Online_Mind2Web_eval")]
    WebJudgeOnlineMind2Web,
    #[serde(rename = "WebJudge_general_eval")]
    WebJudgeGeneral,
    #[serde(rename = "Autonomous_eval")]
    Autonomous,
    #[serde(rename = "WebVoyager_eval")]
    WebVoyager,
    #[serde(rename = "AgentTrek_eval")]
    AgentTrek,
}

impl Default for EvalMode {
    fn default() -> Self {
        EvalMode::WebJudgeOnlineMind2Web
    }
}

impl EvalMode {
    pub fn all() -> &'static [EvalMode] {
        &[
            EvalMode::WebJudgeOnlineMind2Web,
            EvalMode::WebJudgeGeneral,
            EvalMode::Autonomous,
            EvalMode::WebVoyager,
            EvalMode::AgentTrek,
        ]
    }

    /// The name used on the command line and in output file names.
    pub fn name(&self) -> &'static str {
        match self {
            EvalMode::WebJudgeOnlineMind2Web => "WebJudge_Online_Mind2Web_eval",
            EvalMode::WebJudgeGeneral => "WebJudge_general_eval",
            EvalMode::Autonomous => "Autonomous_eval",
            EvalMode::WebVoyager => "WebVoyager_eval",
            EvalMode::AgentTrek => "AgentTrek_eval",
        }
    }

    /// Looks a mode up by its exact name.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Self::all()
            .iter()
            .copied()
            .find(|mode| mode.name() == name.trim())
            .ok_or_else(|| ConfigError::UnknownMode(name.trim().to_string()))
    }

    /// Parses a comma-separated list of mode names, dropping duplicates.
    pub fn parse_list(names: &str) -> Result<Vec<Self>, ConfigError> {
        let mut modes = Vec::new();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let mode = Self::from_name(name)?;
            if !modes.contains(&mode) {
                modes.push(mode);
            }
        }
        if modes.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "mode".to_string(),
                message: "at least one mode is required".to_string(),
            });
        }
        Ok(modes)
    }

    pub fn description(&self) -> &'static str {
        match self {
            EvalMode::WebJudgeOnlineMind2Web => {
                "Key points plus model-scored key screenshots, Online-Mind2Web rubric"
            }
            EvalMode::WebJudgeGeneral => {
                "Key points plus model-scored key screenshots, general-web rubric"
            }
            EvalMode::Autonomous => "Action history plus the final screenshot",
            EvalMode::WebVoyager => "Action history plus the last screenshots",
            EvalMode::AgentTrek => "Action history only",
        }
    }

    pub fn uses_key_points(&self) -> bool {
        matches!(
            self,
            EvalMode::WebJudgeOnlineMind2Web | EvalMode::WebJudgeGeneral
        )
    }

    pub fn screenshot_strategy(&self) -> ScreenshotStrategy {
        match self {
            EvalMode::WebJudgeOnlineMind2Web | EvalMode::WebJudgeGeneral => {
                ScreenshotStrategy::KeyScreenshots
            }
            EvalMode::Autonomous => ScreenshotStrategy::FinalOnly,
            EvalMode::WebVoyager => ScreenshotStrategy::Tail,
            EvalMode::AgentTrek => ScreenshotStrategy::None,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            EvalMode::WebJudgeOnlineMind2Web => WEBJUDGE_ONLINE_MIND2WEB_SYSTEM,
            EvalMode::WebJudgeGeneral => WEBJUDGE_GENERAL_SYSTEM,
            EvalMode::Autonomous => AUTONOMOUS_SYSTEM,
            EvalMode::WebVoyager => WEBVOYAGER_SYSTEM,
            EvalMode::AgentTrek => AGENTTREK_SYSTEM,
        }
    }
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EvalMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}
