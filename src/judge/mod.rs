//! The three judge stages: key-point extraction, key screenshot selection
//! and outcome judgment.
//!
//! Each stage wraps exactly one kind of judge-model call and retries it
//! through [`crate::llm::call_with_retry`]. Stages share a [`JudgeConfig`].

pub mod engine;
pub mod key_points;
pub mod parsing;
pub mod selector;
pub mod types;

pub use engine::{JudgmentEngine, OUTCOME_STAGE};
pub use key_points::{KeyPointExtractor, KEY_POINT_STAGE};
pub use parsing::{parse_image_scores, parse_key_points, parse_outcome, OutcomeAnswer};
pub use selector::{
    select_by_scores, tail, uniform_stride, FallbackHeuristic, KeyScreenshotSelector,
    SelectionConfig, DEFAULT_SCREENSHOT_BUDGET, SELECTION_STAGE,
};
pub use types::{Confidence, JudgeConfig, KeyPointSet, ScreenshotSelection, Verdict, VerdictStatus};
