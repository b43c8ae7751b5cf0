//! Loading recorded runs from the Online-Mind2Web directory layout.
//!
//! ```text
//! <trajectories_dir>/<task_id>/result.json
//! <trajectories_dir>/<task_id>/trajectory/0_full_screenshot.png
//! <trajectories_dir>/<task_id>/trajectory/1_full_screenshot.png
//! ```
//!
//! Reading the directory ([`RawRecording::from_dir`]) and validating it into a
//! typed [`Trajectory`] ([`load`]) are separate steps so that a bad recording
//! can be reported per task without aborting discovery of the others.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use super::types::{AgentStatus, Step, Task, Trajectory};
use crate::error::TrajectoryError;

/// Name of the per-task record file.
pub const RECORD_FILE: &str = "result.json";

/// Name of the per-task screenshot directory.
pub const SCREENSHOT_DIR: &str = "trajectory";

const SCREENSHOT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// The `result.json` record as written by agent adapters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub task_id: Option<String>,

    #[serde(default, alias = "confirmed_task", alias = "intent")]
    pub task: Option<String>,

    #[serde(default)]
    pub website: Option<String>,

    #[serde(default)]
    pub reference_length: Option<u32>,

    #[serde(default)]
    pub action_history: Vec<RawAction>,

    /// Thoughts paired positionally with plain-string actions.
    #[serde(default)]
    pub thoughts: Vec<String>,

    #[serde(default)]
    pub final_result_response: Option<String>,

    #[serde(default)]
    pub status: Option<AgentStatus>,
}

/// One entry of the recorded action history.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAction {
    /// Mind2Web string form, e.g. `<button> Search -> CLICK`.
    Text(String),
    /// Structured form with an explicit sequence index.
    Record(RawActionRecord),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawActionRecord {
    #[serde(default)]
    pub index: Option<u32>,

    #[serde(default)]
    pub action: Option<String>,

    #[serde(default)]
    pub thought: Option<String>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Entry kind; anything other than `action` is agent narration.
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "action".to_string()
}

/// A task directory read from disk but not yet validated.
#[derive(Debug, Clone)]
pub struct RawRecording {
    /// Directory the recording was read from.
    pub dir: PathBuf,
    /// Parsed `result.json`.
    pub record: RawRecord,
    /// Screenshots with their numeric filename prefix, in prefix order.
    pub screenshots: Vec<(u32, PathBuf)>,
}

impl RawRecording {
    /// Assembles a recording from already-parsed parts.
    pub fn new(dir: impl Into<PathBuf>, record: RawRecord, screenshots: Vec<(u32, PathBuf)>) -> Self {
        Self {
            dir: dir.into(),
            record,
            screenshots,
        }
    }

    /// Reads `result.json` and lists the screenshots of one task directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, TrajectoryError> {
        let dir = dir.as_ref();
        let contents = fs::read_to_string(dir.join(RECORD_FILE))?;
        let record: RawRecord = serde_json::from_str(&contents)?;

        let screenshot_dir = dir.join(SCREENSHOT_DIR);
        let mut screenshots = Vec::new();
        if screenshot_dir.is_dir() {
            for entry in fs::read_dir(&screenshot_dir)? {
                let path = entry?.path();
                let is_image = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| SCREENSHOT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false);
                if !is_image {
                    continue;
                }
                match screenshot_prefix(&path) {
                    Some(prefix) => screenshots.push((prefix, path)),
                    None => debug!(path = %path.display(), "Ignoring screenshot without numeric prefix"),
                }
            }
        }
        screenshots.sort();

        Ok(Self {
            dir: dir.to_path_buf(),
            record,
            screenshots,
        })
    }

    /// Extracts the task metadata from the record.
    pub fn task(&self) -> Result<Task, TrajectoryError> {
        let task_id = non_empty(self.record.task_id.as_deref()).ok_or_else(|| {
            TrajectoryError::MissingField {
                task_id: self.dir_name(),
                field: "task_id".to_string(),
            }
        })?;
        let intent = non_empty(self.record.task.as_deref()).ok_or_else(|| {
            TrajectoryError::MissingField {
                task_id: task_id.to_string(),
                field: "task".to_string(),
            }
        })?;

        Ok(Task {
            task_id: task_id.to_string(),
            intent: intent.to_string(),
            website: self.record.website.clone(),
            reference_length: self.record.reference_length,
        })
    }

    fn dir_name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parses the leading number of `12_full_screenshot.png`.
fn screenshot_prefix(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Lists task directories under `root` that contain a `result.json`.
pub fn discover(root: impl AsRef<Path>) -> Result<Vec<PathBuf>, TrajectoryError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(TrajectoryError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("trajectories directory not found: {}", root.display()),
        )));
    }

    let mut dirs = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| TrajectoryError::Io(std::io::Error::other(e.to_string())))?;
        if entry.file_type().is_file() && entry.file_name() == RECORD_FILE {
            if let Some(parent) = entry.path().parent() {
                dirs.push(parent.to_path_buf());
            }
        }
    }
    Ok(dirs)
}

fn narration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(final\s+(answer|response|result)\b|task\s+(is\s+)?(completed?|finished|done|failed)\b|conclusion\s*:|summary\s*:|i\s+(have|'ve)\s+(successfully\s+)?(completed|finished|accomplished)\b)",
        )
        .expect("narration pattern is valid")
    })
}

/// Whether a plain-string action reads as the agent's own conclusion.
pub fn is_narration(action: &str) -> bool {
    narration_pattern().is_match(action)
}

/// Validates a raw recording into a [`Trajectory`] for `task`.
///
/// A record without actions and with at most the initial screenshot loads
/// as an empty trajectory.
///
/// Fails when required fields are missing, a screenshot cannot be read,
/// indices are not strictly increasing, the screenshot count does not match
/// the action count, or agent narration is mixed into the action history.
pub fn load(task: &Task, raw: &RawRecording) -> Result<Trajectory, TrajectoryError> {
    let task_id = task.task_id.as_str();
    let record = &raw.record;

    let mut entries = Vec::with_capacity(record.action_history.len());
    for (position, action) in record.action_history.iter().enumerate() {
        let entry = match action {
            RawAction::Text(text) => {
                if is_narration(text) {
                    return Err(narration(task_id, position, text));
                }
                let text = non_empty(Some(text.as_str())).ok_or_else(|| missing(task_id, position, "action"))?;
                (
                    position as u32,
                    text.to_string(),
                    record.thoughts.get(position).cloned(),
                    None,
                )
            }
            RawAction::Record(rec) => {
                let text = non_empty(rec.action.as_deref())
                    .ok_or_else(|| missing(task_id, position, "action"))?;
                if !rec.kind.eq_ignore_ascii_case("action") || is_narration(text) {
                    return Err(narration(task_id, position, text));
                }
                let index = rec.index.ok_or_else(|| missing(task_id, position, "index"))?;
                (index, text.to_string(), rec.thought.clone(), rec.timestamp)
            }
        };
        entries.push(entry);
    }

    for pair in raw.screenshots.windows(2) {
        if pair[1].0 <= pair[0].0 {
            return Err(TrajectoryError::NonMonotonic {
                task_id: task_id.to_string(),
                previous: pair[0].0,
                index: pair[1].0,
            });
        }
    }

    // A leading screenshot without an action is the initial page state.
    let offset = match raw.screenshots.len().checked_sub(entries.len()) {
        Some(offset @ (0 | 1)) => offset,
        _ => {
            return Err(TrajectoryError::ScreenshotCountMismatch {
                task_id: task_id.to_string(),
                screenshots: raw.screenshots.len(),
                actions: entries.len(),
            })
        }
    };

    let mut steps = Vec::with_capacity(entries.len());
    for (position, (index, action, thought, timestamp)) in entries.into_iter().enumerate() {
        let (_, path) = &raw.screenshots[position + offset];
        check_readable(task_id, path)?;
        steps.push(Step {
            index,
            screenshot: path.clone(),
            thought,
            action,
            timestamp,
        });
    }

    Trajectory::new(
        task_id,
        steps,
        record.final_result_response.clone(),
        record.status.unwrap_or_default(),
    )
}

fn missing(task_id: &str, position: usize, field: &str) -> TrajectoryError {
    TrajectoryError::MissingField {
        task_id: task_id.to_string(),
        field: format!("action_history[{}].{}", position, field),
    }
}

fn narration(task_id: &str, position: usize, text: &str) -> TrajectoryError {
    TrajectoryError::NarrationInActions {
        task_id: task_id.to_string(),
        index: position,
        preview: text.chars().take(60).collect(),
    }
}

/// Confirms the file opens and starts with a PNG, JPEG or WebP signature.
fn check_readable(task_id: &str, path: &Path) -> Result<(), TrajectoryError> {
    let unreadable = |reason: String| TrajectoryError::UnreadableScreenshot {
        task_id: task_id.to_string(),
        path: path.to_path_buf(),
        reason,
    };

    let mut header = [0u8; 12];
    let mut file = File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let read = file.read(&mut header).map_err(|e| unreadable(e.to_string()))?;
    let header = &header[..read];

    let known = header.starts_with(&[0x89, b'P', b'N', b'G'])
        || header.starts_with(&[0xFF, 0xD8, 0xFF])
        || (header.len() == 12 && &header[..4] == b"RIFF" && &header[8..12] == b"WEBP");
    if known {
        Ok(())
    } else {
        Err(unreadable("not a PNG, JPEG or WebP image".to_string()))
    }
}
