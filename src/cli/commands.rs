//! CLI command definitions for webjudge.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{RunSettings, Settings};
use crate::eval::EvalMode;
use crate::judge::FallbackHeuristic;
use crate::llm::OpenAiProviderFactory;
use crate::scheduler::{
    CredentialPool, CredentialSource, EvalJob, JsonlResultWriter, Orchestrator, RunSummary,
};
use crate::trajectory::{self, RawRecording};

/// Automatic evaluation of web agent trajectories with an LLM judge.
#[derive(Parser)]
#[command(name = "webjudge")]
#[command(about = "Judge recorded web agent trajectories with a multimodal LLM")]
#[command(version)]
#[command(
    long_about = "webjudge reads recorded web agent runs (task, action history, screenshots) and asks a judge model whether each task was completed.\n\nExample usage:\n  webjudge eval --mode WebJudge_Online_Mind2Web_eval --model gpt-4o-mini --trajectories-dir ./trajectories --output-path ./results --num-worker 4"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Judge every trajectory under a directory and write JSONL results.
    Eval(Box<EvalArgs>),

    /// Check which task directories load cleanly.
    Status(StatusArgs),

    /// List the available evaluation modes.
    Modes,
}

/// Arguments for `webjudge eval`.
#[derive(Parser, Debug)]
pub struct EvalArgs {
    /// Evaluation mode, or a comma-separated list of modes.
    #[arg(long)]
    pub mode: Option<String>,

    /// Judge model identifier.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Directory holding one sub-directory per task.
    #[arg(long, alias = "trajectories_dir")]
    pub trajectories_dir: Option<PathBuf>,

    /// Single API key.
    #[arg(long, alias = "api_key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Comma-separated API keys; one credential per key.
    #[arg(long, alias = "api_keys")]
    pub api_keys: Option<String>,

    /// File with one API key per line.
    #[arg(long, alias = "api_keys_file")]
    pub api_keys_file: Option<PathBuf>,

    /// OpenAI-compatible API base URL.
    #[arg(long, alias = "api_base", env = "WEBJUDGE_API_BASE")]
    pub api_base: Option<String>,

    /// Directory for result files.
    #[arg(short = 'o', long, alias = "output_path")]
    pub output_path: Option<PathBuf>,

    /// Number of concurrent worker slots.
    #[arg(short = 'w', long, alias = "num_worker")]
    pub num_worker: Option<usize>,

    /// Confidence (1-5) at or above which a task counts as passed.
    #[arg(long, alias = "score_threshold")]
    pub score_threshold: Option<u8>,

    /// Timeout for one task across all requested modes, in seconds.
    #[arg(long, alias = "task_timeout_secs")]
    pub task_timeout_secs: Option<u64>,

    /// Maximum screenshots shown to the judge.
    #[arg(long, alias = "screenshot_budget")]
    pub screenshot_budget: Option<usize>,

    /// Drop screenshots scored below this relevance (1-5).
    #[arg(long, alias = "min_relevance")]
    pub min_relevance: Option<u8>,

    /// Selection heuristic when screenshot scoring fails (uniform_stride, tail).
    #[arg(long)]
    pub fallback: Option<FallbackHeuristic>,

    /// Attempts per judge call, including the first.
    #[arg(long, alias = "max_attempts")]
    pub max_attempts: Option<u32>,

    /// YAML settings file; command-line values take precedence.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// Arguments for `webjudge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Directory holding one sub-directory per task.
    #[arg(long, alias = "trajectories_dir")]
    pub trajectories_dir: PathBuf,

    /// Output a JSON report instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl EvalArgs {
    fn settings(&self) -> Settings {
        Settings {
            mode: self.mode.clone(),
            model: self.model.clone(),
            api_base: self.api_base.clone(),
            api_keys_file: self.api_keys_file.clone(),
            trajectories_dir: self.trajectories_dir.clone(),
            output_path: self.output_path.clone(),
            num_worker: self.num_worker,
            score_threshold: self.score_threshold,
            task_timeout_secs: self.task_timeout_secs,
            screenshot_budget: self.screenshot_budget,
            min_relevance: self.min_relevance,
            fallback: self.fallback,
            max_attempts: self.max_attempts,
            ..Default::default()
        }
    }

    fn credential_source(&self, settings: &RunSettings) -> anyhow::Result<CredentialSource> {
        if let Some(path) = &settings.api_keys_file {
            return Ok(CredentialSource::File(path.clone()));
        }
        if let Some(list) = &self.api_keys {
            return Ok(CredentialSource::List(list.clone()));
        }
        if let Some(key) = &self.api_key {
            return Ok(CredentialSource::Single(key.clone()));
        }
        Err(anyhow::anyhow!(
            "No API key: pass --api-key, --api-keys or --api-keys-file, or set OPENAI_API_KEY"
        ))
    }
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Eval(args) => run_eval_command(*args).await,
        Commands::Status(args) => run_status_command(args),
        Commands::Modes => {
            run_modes_command();
            Ok(())
        }
    }
}

async fn run_eval_command(args: EvalArgs) -> anyhow::Result<()> {
    let file_settings = match &args.config {
        Some(path) => Settings::from_yaml_file(path)?,
        None => Settings::default(),
    };
    let settings = file_settings.overlay(args.settings()).resolve()?;

    let source = args.credential_source(&settings)?;
    let pool = CredentialPool::from_source(&source).context("Failed to build credential pool")?;
    info!(credentials = pool.size(), "Credential pool ready");

    let dirs = trajectory::discover(&settings.trajectories_dir).with_context(|| {
        format!(
            "Failed to scan trajectories directory {}",
            settings.trajectories_dir.display()
        )
    })?;
    if dirs.is_empty() {
        return Err(anyhow::anyhow!(
            "No task directories with result.json found in {}",
            settings.trajectories_dir.display()
        ));
    }
    info!(count = dirs.len(), "Discovered task directories");

    let factory = Arc::new(OpenAiProviderFactory::new(
        settings.api_base.clone(),
        settings.model.clone(),
    ));
    let threshold = settings.orchestrator.score_threshold;
    let modes = settings.orchestrator.modes.clone();
    let orchestrator = Orchestrator::new(settings.orchestrator, pool, factory)?;

    let mut writer = JsonlResultWriter::new(&settings.output_path, &settings.model, threshold)
        .with_context(|| format!("Failed to create {}", settings.output_path.display()))?;
    let jobs = dirs.into_iter().map(EvalJob::from).collect();
    let summary = orchestrator.run(jobs, &mut writer).await?;

    print_summary(&summary, &modes, &writer);
    Ok(())
}

fn print_summary(summary: &RunSummary, modes: &[EvalMode], writer: &JsonlResultWriter) {
    println!("\n=== Evaluation Summary ===");
    println!("Run ID:            {}", summary.run_id);
    println!("Tasks:             {}", summary.tasks_total);
    println!("Skipped:           {}", summary.tasks_skipped);
    println!("Succeeded:         {}", summary.succeeded);
    println!("Failed:            {}", summary.failed);
    println!("Timed out:         {}", summary.timed_out);
    println!("Passed:            {} ({:.1}%)", summary.passed, summary.pass_rate());
    println!("Peak credentials:  {}", summary.peak_credentials_in_use);
    println!("Duration:          {:.1}s", summary.duration_ms as f64 / 1000.0);
    println!("\nResults:");
    for mode in modes {
        println!("  {}", writer.path_for(*mode).display());
    }
}

/// Load state of one task directory.
#[derive(Debug, Serialize)]
struct TaskStatus {
    dir: String,
    task_id: Option<String>,
    steps: Option<usize>,
    error: Option<String>,
}

fn check_task_dir(dir: PathBuf) -> TaskStatus {
    let display = dir.display().to_string();
    let loaded = RawRecording::from_dir(&dir).and_then(|raw| {
        let task = raw.task()?;
        let trajectory = trajectory::load(&task, &raw)?;
        Ok((task, trajectory))
    });
    match loaded {
        Ok((task, trajectory)) => TaskStatus {
            dir: display,
            task_id: Some(task.task_id),
            steps: Some(trajectory.len()),
            error: None,
        },
        Err(e) => TaskStatus {
            dir: display,
            task_id: None,
            steps: None,
            error: Some(e.to_string()),
        },
    }
}

fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let dirs = trajectory::discover(&args.trajectories_dir)?;
    let statuses: Vec<TaskStatus> = dirs.into_iter().map(check_task_dir).collect();
    let malformed = statuses.iter().filter(|s| s.error.is_some()).count();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("{:<8} {:<40} {:>6}  DETAILS", "STATE", "TASK", "STEPS");
    for status in &statuses {
        match &status.error {
            None => println!(
                "{:<8} {:<40} {:>6}",
                "ok",
                status.task_id.as_deref().unwrap_or_default(),
                status.steps.unwrap_or_default()
            ),
            Some(error) => println!("{:<8} {:<40} {:>6}  {}", "invalid", status.dir, "-", error),
        }
    }
    println!(
        "\n{} task(s), {} loadable, {} malformed",
        statuses.len(),
        statuses.len() - malformed,
        malformed
    );
    if malformed > 0 {
        warn!(malformed, "Some trajectories will be skipped during evaluation");
    }
    Ok(())
}

fn run_modes_command() {
    for mode in EvalMode::all() {
        let marker = if *mode == EvalMode::default() { " (default)" } else { "" };
        println!("{:<32} {}{}", mode.name(), mode.description(), marker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_eval_args_with_original_option_names() {
        let cli = Cli::try_parse_from([
            "webjudge",
            "eval",
            "--mode",
            "WebJudge_Online_Mind2Web_eval",
            "--trajectories_dir",
            "./runs",
            "--api-key",
            "sk-test",
            "--num_worker",
            "3",
            "--score_threshold",
            "4",
        ])
        .expect("valid arguments");

        let Commands::Eval(args) = cli.command else {
            panic!("expected eval command");
        };
        let settings = Settings::default().overlay(args.settings()).resolve().expect("valid settings");
        assert_eq!(settings.orchestrator.num_workers, 3);
        assert_eq!(settings.orchestrator.score_threshold.get(), 4);
        assert_eq!(settings.trajectories_dir, PathBuf::from("./runs"));
        assert!(matches!(
            args.credential_source(&settings),
            Ok(CredentialSource::Single(ref k)) if k == "sk-test"
        ));
    }

    #[test]
    fn test_key_list_preferred_over_single_key() {
        let cli = Cli::try_parse_from([
            "webjudge",
            "eval",
            "--trajectories-dir",
            "./runs",
            "--api-key",
            "sk-one",
            "--api-keys",
            "sk-a,sk-b",
        ])
        .expect("valid arguments");
        let Commands::Eval(args) = cli.command else {
            panic!("expected eval command");
        };
        let settings = args.settings().resolve().expect("valid settings");
        assert!(matches!(
            args.credential_source(&settings),
            Ok(CredentialSource::List(_))
        ));
    }

    #[test]
    fn test_fallback_flag_parses() {
        let cli = Cli::try_parse_from([
            "webjudge",
            "eval",
            "--trajectories-dir",
            "./runs",
            "--fallback",
            "tail",
        ])
        .expect("valid arguments");
        let Commands::Eval(args) = cli.command else {
            panic!("expected eval command");
        };
        assert_eq!(args.fallback, Some(FallbackHeuristic::Tail));
    }
}
