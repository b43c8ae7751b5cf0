//! Per-task result records and JSONL output.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::eval::EvalMode;
use crate::judge::{Confidence, Verdict, VerdictStatus};

/// How the evaluation of one (task, mode) pair ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Succeeded => write!(f, "succeeded"),
            TaskOutcome::Failed => write!(f, "failed"),
            TaskOutcome::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One output line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub task_id: String,
    pub task: String,
    pub mode: EvalMode,
    pub model: String,
    pub outcome: TaskOutcome,
    pub status: VerdictStatus,
    pub confidence: Confidence,
    /// 1 when `confidence >= score_threshold`, else 0.
    pub predicted_label: u8,
    pub rationale: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub screenshot_indices: Vec<usize>,
    pub worker_id: String,
    pub duration_ms: u64,
    pub evaluated_at: DateTime<Utc>,
}

/// Identity fields shared by every record of one task.
#[derive(Debug, Clone)]
pub struct RecordContext {
    pub task_id: String,
    pub task: String,
    pub mode: EvalMode,
    pub model: String,
    pub worker_id: String,
    pub duration: Duration,
}

impl ResultRecord {
    /// Record for a completed judgment.
    pub fn from_verdict(ctx: RecordContext, verdict: &Verdict, threshold: Confidence) -> Self {
        Self {
            predicted_label: u8::from(verdict.passes(threshold)),
            outcome: TaskOutcome::Succeeded,
            status: verdict.status(),
            confidence: verdict.confidence(),
            rationale: verdict.rationale().to_string(),
            key_points: verdict.key_points().to_vec(),
            screenshot_indices: verdict.screenshot_indices().to_vec(),
            ..Self::blank(ctx)
        }
    }

    /// Record for an evaluation that produced no verdict.
    ///
    /// Failures count as a failure judgment at minimum confidence.
    pub fn failure(ctx: RecordContext, outcome: TaskOutcome, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            rationale: reason.into(),
            ..Self::blank(ctx)
        }
    }

    fn blank(ctx: RecordContext) -> Self {
        Self {
            task_id: ctx.task_id,
            task: ctx.task,
            mode: ctx.mode,
            model: ctx.model,
            outcome: TaskOutcome::Failed,
            status: VerdictStatus::Failure,
            confidence: Confidence::MIN,
            predicted_label: 0,
            rationale: String::new(),
            key_points: Vec::new(),
            screenshot_indices: Vec::new(),
            worker_id: ctx.worker_id,
            duration_ms: ctx.duration.as_millis() as u64,
            evaluated_at: Utc::now(),
        }
    }
}

/// Output file name for one mode, e.g.
/// `WebJudge_Online_Mind2Web_eval_gpt-4o-mini_score_threshold_3_auto_eval_results.json`.
pub fn output_file_name(mode: EvalMode, model: &str, threshold: Confidence) -> String {
    format!(
        "{}_{}_score_threshold_{}_auto_eval_results.json",
        mode.name(),
        model.replace('/', "_"),
        threshold
    )
}

/// Destination for result records as they are produced.
pub trait ResultSink: Send {
    fn write(&mut self, record: &ResultRecord) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResultSink for Vec<ResultRecord> {
    fn write(&mut self, record: &ResultRecord) -> io::Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Writes one JSONL file per mode under an output directory.
pub struct JsonlResultWriter {
    dir: PathBuf,
    model: String,
    threshold: Confidence,
    files: HashMap<EvalMode, BufWriter<File>>,
}

impl JsonlResultWriter {
    /// Creates `dir` if needed. Files are created (truncated) on first write.
    pub fn new(dir: impl Into<PathBuf>, model: impl Into<String>, threshold: Confidence) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            model: model.into(),
            threshold,
            files: HashMap::new(),
        })
    }

    pub fn path_for(&self, mode: EvalMode) -> PathBuf {
        self.dir.join(output_file_name(mode, &self.model, self.threshold))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ResultSink for JsonlResultWriter {
    fn write(&mut self, record: &ResultRecord) -> io::Result<()> {
        if !self.files.contains_key(&record.mode) {
            let file = File::create(self.path_for(record.mode))?;
            self.files.insert(record.mode, BufWriter::new(file));
        }
        let Some(writer) = self.files.get_mut(&record.mode) else {
            return Ok(());
        };
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        for writer in self.files.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Aggregate outcome of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Task directories handed to the run.
    pub tasks_total: usize,
    /// Tasks skipped because their trajectory was malformed.
    pub tasks_skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Records with `predicted_label == 1`.
    pub passed: usize,
    pub peak_credentials_in_use: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            tasks_total: 0,
            tasks_skipped: 0,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            passed: 0,
            peak_credentials_in_use: 0,
            duration_ms: 0,
        }
    }

    pub fn record(&mut self, record: &ResultRecord) {
        match record.outcome {
            TaskOutcome::Succeeded => self.succeeded += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::TimedOut => self.timed_out += 1,
        }
        if record.predicted_label == 1 {
            self.passed += 1;
        }
    }

    /// Records written.
    pub fn records(&self) -> usize {
        self.succeeded + self.failed + self.timed_out
    }

    /// Share of judged records that passed, in percent.
    pub fn pass_rate(&self) -> f64 {
        let total = self.records();
        if total == 0 {
            return 0.0;
        }
        (self.passed as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(task_id: &str, mode: EvalMode) -> RecordContext {
        RecordContext {
            task_id: task_id.to_string(),
            task: "Find the cheapest flight".to_string(),
            mode,
            model: "openai/gpt-4o".to_string(),
            worker_id: "worker-0".to_string(),
            duration: Duration::from_millis(1500),
        }
    }

    fn verdict(confidence: u8) -> Verdict {
        Verdict::new(
            VerdictStatus::Success,
            Confidence::new(confidence).expect("valid"),
            "Flight list sorted by price",
            vec!["Cheapest first".to_string()],
            vec![0, 3],
        )
    }

    #[test]
    fn test_output_file_name() {
        let threshold = Confidence::new(3).expect("valid");
        assert_eq!(
            output_file_name(EvalMode::WebJudgeOnlineMind2Web, "openai/gpt-4o", threshold),
            "WebJudge_Online_Mind2Web_eval_openai_gpt-4o_score_threshold_3_auto_eval_results.json"
        );
    }

    #[test]
    fn test_predicted_label_follows_threshold() {
        let threshold = Confidence::new(4).expect("valid");
        let pass = ResultRecord::from_verdict(ctx("t1", EvalMode::AgentTrek), &verdict(4), threshold);
        let fail = ResultRecord::from_verdict(ctx("t2", EvalMode::AgentTrek), &verdict(3), threshold);
        assert_eq!(pass.predicted_label, 1);
        assert_eq!(fail.predicted_label, 0);
        assert_eq!(pass.duration_ms, 1500);
        assert_eq!(pass.screenshot_indices, vec![0, 3]);
    }

    #[test]
    fn test_failure_record() {
        let record = ResultRecord::failure(
            ctx("t1", EvalMode::Autonomous),
            TaskOutcome::TimedOut,
            "Evaluation exceeded the task timeout",
        );
        assert_eq!(record.outcome, TaskOutcome::TimedOut);
        assert_eq!(record.status, VerdictStatus::Failure);
        assert_eq!(record.confidence, Confidence::MIN);
        assert_eq!(record.predicted_label, 0);
    }

    #[test]
    fn test_jsonl_writer_one_file_per_mode() {
        let dir = TempDir::new().expect("temp dir");
        let threshold = Confidence::new(3).expect("valid");
        let mut writer =
            JsonlResultWriter::new(dir.path().join("out"), "openai/gpt-4o", threshold).expect("writer");

        for (id, mode) in [
            ("t1", EvalMode::WebJudgeOnlineMind2Web),
            ("t2", EvalMode::WebJudgeOnlineMind2Web),
            ("t1", EvalMode::AgentTrek),
        ] {
            let record = ResultRecord::from_verdict(ctx(id, mode), &verdict(5), threshold);
            writer.write(&record).expect("write");
        }
        writer.flush().expect("flush");

        let content = fs::read_to_string(writer.path_for(EvalMode::WebJudgeOnlineMind2Web)).expect("read");
        let lines: Vec<ResultRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("valid record"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].task_id, "t2");
        assert_eq!(lines[0].mode, EvalMode::WebJudgeOnlineMind2Web);

        let trek = fs::read_to_string(writer.path_for(EvalMode::AgentTrek)).expect("read");
        assert_eq!(trek.lines().count(), 1);
        assert!(trek.contains("\"outcome\":\"succeeded\""));
        assert!(trek.contains("\"predicted_label\":1"));
    }

    #[test]
    fn test_summary_counts() {
        let threshold = Confidence::new(3).expect("valid");
        let mut summary = RunSummary::new(Uuid::new_v4());
        summary.record(&ResultRecord::from_verdict(ctx("a", EvalMode::AgentTrek), &verdict(5), threshold));
        summary.record(&ResultRecord::failure(ctx("b", EvalMode::AgentTrek), TaskOutcome::Failed, "x"));
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.records(), 2);
        assert!((summary.pass_rate() - 50.0).abs() < f64::EPSILON);
    }
}
