use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::job_config::JobParameters;

/// Connection settings for the remote engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub base_url: String,
    /// Cadence shared by the progress and candidate polling loops.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Per-request deadline; `None` waits for the connection to fail on its own.
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
}

/// Status tag reported by the engine or produced by a local action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    #[default]
    Idle,
    Loaded,
    Running,
    Done,
    Stopped,
    Error,
    Warning,
    Saved,
}

impl ProgressStatus {
    /// Map an engine status tag. Anything unrecognised (the engine answers
    /// `"not started"` before its first job) is treated as idle.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "loaded" => ProgressStatus::Loaded,
            "running" => ProgressStatus::Running,
            "done" => ProgressStatus::Done,
            "stopped" => ProgressStatus::Stopped,
            "error" => ProgressStatus::Error,
            "warning" => ProgressStatus::Warning,
            "saved" => ProgressStatus::Saved,
            _ => ProgressStatus::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::Idle => "idle",
            ProgressStatus::Loaded => "loaded",
            ProgressStatus::Running => "running",
            ProgressStatus::Done => "done",
            ProgressStatus::Stopped => "stopped",
            ProgressStatus::Error => "error",
            ProgressStatus::Warning => "warning",
            ProgressStatus::Saved => "saved",
        }
    }
}

/// Status/message pair. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressReport {
    pub status: ProgressStatus,
    #[serde(default)]
    pub message: String,
}

impl ProgressReport {
    pub fn new(status: ProgressStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// One row of the engine's candidate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateModel {
    pub complexity: u32,
    pub loss: f64,
    pub equation: String,
}

/// Accuracy of a candidate against the loaded dataset. A metric is `None`
/// when it is undefined (e.g. normalised RMSE of a constant output).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub r2: Option<f64>,
    pub rmse: Option<f64>,
    pub nrmse: Option<f64>,
}

impl AccuracyMetrics {
    /// Fill metrics missing here from `other`.
    pub fn or(self, other: AccuracyMetrics) -> AccuracyMetrics {
        AccuracyMetrics {
            r2: self.r2.or(other.r2),
            rmse: self.rmse.or(other.rmse),
            nrmse: self.nrmse.or(other.nrmse),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.r2.is_some() && self.rmse.is_some() && self.nrmse.is_some()
    }
}

/// Predictions for every dataset record (index-aligned; `None` where the
/// expression is not finite) plus accuracy metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub equation: String,
    pub predictions: Vec<Option<f64>>,
    pub metrics: AccuracyMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalKind {
    Done,
    Stopped,
    Error,
}

/// Lifecycle of the single job a session may own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobState {
    #[default]
    Idle,
    Submitting,
    Running,
    Stopping,
    Terminal(TerminalKind),
}

impl JobState {
    /// A job occupies the session while submitting, running or stopping.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Submitting | JobState::Running | JobState::Stopping
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Terminal(_))
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Submitting => write!(f, "submitting"),
            JobState::Running => write!(f, "running"),
            JobState::Stopping => write!(f, "stopping"),
            JobState::Terminal(TerminalKind::Done) => write!(f, "done"),
            JobState::Terminal(TerminalKind::Stopped) => write!(f, "stopped"),
            JobState::Terminal(TerminalKind::Error) => write!(f, "error"),
        }
    }
}

/// Everything the presentation layer needs about the current job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub state: JobState,
    pub progress: ProgressReport,
    pub candidates: Vec<CandidateModel>,
    /// Last failure that moved the job to `Terminal(Error)`.
    pub error: Option<String>,
    /// True between a terminal `done`/`stopped` progress report and the
    /// capture of the final candidate table.
    pub final_capture_pending: bool,
}

impl JobSnapshot {
    /// No request for this job is outstanding or scheduled.
    pub fn is_settled(&self) -> bool {
        !self.state.is_active() && !self.final_capture_pending
    }
}

/// Events emitted by the orchestrator and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    StateChanged { from: JobState, to: JobState },
    Progress(ProgressReport),
    Candidates { rows: usize },
    /// Timestamped, human-readable log line.
    Log(String),
}

/// Serializable summary of a finished job for JSON output and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    #[serde(default)]
    pub timestamp_utc: String,
    pub base_url: String,
    pub dataset: Option<String>,
    pub output: Option<String>,
    pub inputs: Vec<String>,
    pub parameters: JobParameters,
    pub state: JobState,
    pub progress: ProgressReport,
    pub error: Option<String>,
    pub candidates: Vec<CandidateModel>,
    #[serde(default)]
    pub evaluation: Option<EvaluationResult>,
}

/// Prefix `message` with the local wall-clock time, `[HH:MM:SS] message`.
pub fn log_line(message: &str) -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let stamp = now
        .format(time::macros::format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".into());
    format!("[{stamp}] {message}")
}
