//! Recorded agent runs and their ingestion.
//!
//! # Overview
//!
//! A trajectory is the ordered sequence of steps an agent took on one task:
//! - **Screenshot**: what the agent saw at that step
//! - **Thought**: the agent's optional reasoning (never treated as fact)
//! - **Action**: a factual description of what the agent did
//!
//! plus the agent's final free-text response and self-reported status.
//!
//! # Usage
//!
//! ```rust,ignore
//! use webjudge::trajectory::{discover, load, RawRecording};
//!
//! for dir in discover("./results")? {
//!     let raw = RawRecording::from_dir(&dir)?;
//!     let task = raw.task()?;
//!     let trajectory = load(&task, &raw)?;
//!     println!("{}: {} steps", task.task_id, trajectory.len());
//! }
//! ```

pub mod loader;
pub mod types;

pub use loader::{discover, is_narration, load, RawAction, RawRecord, RawRecording};
pub use types::{AgentStatus, Step, Task, Trajectory};
