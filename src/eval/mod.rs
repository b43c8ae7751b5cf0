//! Evaluation modes and the evaluator that runs them.
//!
//! # Example
//!
//! ```ignore
//! use webjudge::eval::{EvalConfig, EvalMode, Evaluator, KeyPointCache};
//!
//! let evaluator = Evaluator::new(provider, &EvalConfig::default());
//! let mode = EvalMode::from_name("WebJudge_Online_Mind2Web_eval")?;
//! let verdict = evaluator
//!     .evaluate(mode, &task, &trajectory, &mut KeyPointCache::new())
//!     .await?;
//! ```

pub mod evaluator;
pub mod mode;

pub use evaluator::{EvalConfig, Evaluator, KeyPointCache};
pub use mode::{EvalMode, ScreenshotStrategy};
