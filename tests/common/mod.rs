//! Shared test fixtures: a scripted in-memory engine and job helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use symreg_cli::dataset::DatasetStore;
use symreg_cli::engine::{Ack, ArtifactStatus, EngineApi, EngineError, EvaluationRequest};
use symreg_cli::job_config::{JobConfigBuilder, JobSpec};
use symreg_cli::model::{
    AccuracyMetrics, CandidateModel, EvaluationResult, JobEvent, ProgressReport, ProgressStatus,
};
use symreg_cli::orchestrator::JobOrchestrator;
use tokio::sync::mpsc;

pub const POLL: Duration = Duration::from_secs(1);

pub const TEN_ROWS: &str = "y,x1,x2\n\
    1,0.1,2\n2,0.2,3\n3,0.3,4\n4,0.4,5\n5,0.5,6\n\
    6,0.6,7\n7,0.7,8\n8,0.8,9\n9,0.9,10\n10,1.0,11\n";

/// One scripted response, returned after `delay`.
#[derive(Clone)]
pub struct Step<T> {
    pub delay: Duration,
    pub result: Result<T, EngineError>,
}

pub fn ok<T>(value: T) -> Step<T> {
    Step {
        delay: Duration::ZERO,
        result: Ok(value),
    }
}

pub fn delayed<T>(ms: u64, value: T) -> Step<T> {
    Step {
        delay: Duration::from_millis(ms),
        result: Ok(value),
    }
}

pub fn network<T>(message: &str) -> Step<T> {
    Step {
        delay: Duration::ZERO,
        result: Err(EngineError::Network(message.to_string())),
    }
}

pub fn engine_err<T>(message: &str) -> Step<T> {
    Step {
        delay: Duration::ZERO,
        result: Err(EngineError::engine(message)),
    }
}

/// Responses for one endpoint, served in order. The last one repeats once
/// the script is exhausted.
pub struct Script<T> {
    steps: Mutex<Vec<Step<T>>>,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    pub fn new(steps: Vec<Step<T>>) -> Self {
        assert!(!steps.is_empty(), "a script needs at least one step");
        Self {
            steps: Mutex::new(steps),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next(&self) -> Result<T, EngineError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let steps = self.steps.lock().unwrap();
            steps.get(n).unwrap_or_else(|| steps.last().unwrap()).clone()
        };
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.result
    }
}

pub struct ScriptedEngine {
    pub submit: Script<Ack>,
    pub progress: Script<ProgressReport>,
    pub candidates: Script<Vec<CandidateModel>>,
    pub stop: Script<Ack>,
    pub delete: Script<ArtifactStatus>,
    /// The served result's equation is replaced by the request's.
    pub evaluate: Script<EvaluationResult>,
    pub submitted: Mutex<Vec<JobSpec>>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self {
            submit: Script::new(vec![ok(Ack {
                message: "Job submitted".into(),
            })]),
            progress: Script::new(vec![ok(running())]),
            candidates: Script::new(vec![ok(Vec::new())]),
            stop: Script::new(vec![ok(Ack {
                message: "Execution stopped".into(),
            })]),
            delete: Script::new(vec![ok(ArtifactStatus::Deleted)]),
            evaluate: Script::new(vec![ok(evaluation(&[1.0, 2.0, 3.0]))]),
            submitted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EngineApi for ScriptedEngine {
    async fn submit(&self, spec: &JobSpec) -> Result<Ack, EngineError> {
        self.submitted.lock().unwrap().push(spec.clone());
        self.submit.next().await
    }

    async fn fetch_progress(&self) -> Result<ProgressReport, EngineError> {
        self.progress.next().await
    }

    async fn fetch_candidates(&self) -> Result<Vec<CandidateModel>, EngineError> {
        self.candidates.next().await
    }

    async fn stop(&self) -> Result<Ack, EngineError> {
        self.stop.next().await
    }

    async fn delete_artifact(&self) -> Result<ArtifactStatus, EngineError> {
        self.delete.next().await
    }

    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult, EngineError> {
        let mut result = self.evaluate.next().await?;
        result.equation = request.equation.clone();
        Ok(result)
    }
}

pub fn running() -> ProgressReport {
    ProgressReport::new(ProgressStatus::Running, "Iteration in progress")
}

pub fn progress(status: ProgressStatus, message: &str) -> ProgressReport {
    ProgressReport::new(status, message)
}

pub fn row(complexity: u32, loss: f64, equation: &str) -> CandidateModel {
    CandidateModel {
        complexity,
        loss,
        equation: equation.to_string(),
    }
}

pub fn evaluation(predictions: &[f64]) -> EvaluationResult {
    EvaluationResult {
        equation: String::new(),
        predictions: predictions.iter().copied().map(Some).collect(),
        metrics: AccuracyMetrics {
            r2: Some(1.0),
            rmse: Some(0.0),
            nrmse: Some(0.0),
        },
    }
}

/// Store loaded with the ten-row `y, x1, x2` dataset.
pub fn loaded_store() -> DatasetStore {
    let mut store = DatasetStore::new();
    store.load_csv("data.csv", TEN_ROWS).unwrap();
    store
}

pub fn job_spec() -> JobSpec {
    JobConfigBuilder::new().build(&loaded_store()).unwrap()
}

/// Orchestrator over `engine`, plus the receiving end of its event stream.
pub fn orchestrator(
    engine: &Arc<ScriptedEngine>,
) -> (JobOrchestrator, mpsc::UnboundedReceiver<JobEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let api: Arc<dyn EngineApi> = engine.clone();
    (JobOrchestrator::spawn(api, POLL, tx), rx)
}

/// Drain every event received so far and return the log lines.
pub fn drain_logs(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        if let JobEvent::Log(line) = ev {
            lines.push(line);
        }
    }
    lines
}
