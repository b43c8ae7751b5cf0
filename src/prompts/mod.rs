//! Judge-model prompts for trajectory evaluation.
//!
//! # Usage
//!
//! ```no_run
//! use webjudge::prompts::{build_key_point_prompt, build_outcome_prompt, WEBJUDGE_GENERAL_SYSTEM};
//! use webjudge::trajectory::Task;
//!
//! let task = Task::new("t1", "Find the return policy for electronics");
//! let key_points = build_key_point_prompt(&task);
//! let outcome = build_outcome_prompt(WEBJUDGE_GENERAL_SYSTEM, &task, None, &[], 1);
//! ```

pub mod judge;

pub use judge::{
    build_image_scoring_prompt, build_key_point_prompt, build_outcome_prompt, JudgePrompt,
    AGENTTREK_SYSTEM, AUTONOMOUS_SYSTEM, WEBJUDGE_GENERAL_SYSTEM, WEBJUDGE_ONLINE_MIND2WEB_SYSTEM,
    WEBVOYAGER_SYSTEM,
};
