//! webjudge: automatic evaluation of web agent trajectories.
//!
//! This library loads recorded agent runs, distills each task into key
//! points, picks the screenshots that matter and asks a multimodal judge
//! model for a verdict, across a bounded pool of API credentials.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod eval;
pub mod judge;
pub mod llm;
pub mod prompts;
pub mod scheduler;
pub mod trajectory;
pub mod utils;

// Re-export commonly used error types
pub use error::{
    ConfigError, EvalError, JudgeError, LlmError, PoolError, RunError, TrajectoryError,
};
