//! Concurrent batch evaluation.
//!
//! - **CredentialPool**: bounded, FIFO-fair set of API keys, one holder each
//! - **Orchestrator**: worker slots that evaluate tasks under a per-task timeout
//! - **Result output**: JSONL records, one file per evaluation mode
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!                 │  Job queue   │  task directories
//!                 └──────┬───────┘
//!         ┌──────────────┼──────────────┐
//!         ▼              ▼              ▼
//!    ┌─────────┐    ┌─────────┐    ┌─────────┐
//!    │ worker-0│    │ worker-1│    │ worker-N│ ──acquire/release──▶ CredentialPool
//!    └────┬────┘    └────┬────┘    └────┬────┘
//!         └──────────────┼──────────────┘
//!                        ▼
//!                 ┌──────────────┐
//!                 │  ResultSink  │  JSONL per mode
//!                 └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use webjudge::llm::OpenAiProviderFactory;
//! use webjudge::scheduler::{
//!     CredentialPool, CredentialSource, EvalJob, JsonlResultWriter, Orchestrator,
//!     OrchestratorConfig,
//! };
//!
//! let pool = CredentialPool::from_source(&CredentialSource::List("sk-a,sk-b".into()))?;
//! let factory = Arc::new(OpenAiProviderFactory::new("https://api.openai.com/v1", "gpt-4o-mini"));
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default().with_num_workers(4), pool, factory)?;
//!
//! let jobs = webjudge::trajectory::discover("./trajectories")?
//!     .into_iter()
//!     .map(EvalJob::from)
//!     .collect();
//! let mut sink = JsonlResultWriter::new("./results", "gpt-4o-mini", orchestrator.config().score_threshold)?;
//! let summary = orchestrator.run(jobs, &mut sink).await?;
//! ```

pub mod credentials;
pub mod orchestrator;
pub mod result;

pub use credentials::{Credential, CredentialLease, CredentialPool, CredentialSource};
pub use orchestrator::{
    EvalJob, Orchestrator, OrchestratorConfig, TaskState, DEFAULT_SCORE_THRESHOLD,
    DEFAULT_TASK_TIMEOUT_SECS,
};
pub use result::{
    output_file_name, JsonlResultWriter, RecordContext, ResultRecord, ResultSink, RunSummary,
    TaskOutcome,
};
