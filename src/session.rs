//! One client session: the dataset store, job configuration, orchestrator
//! and evaluator wired together for a presentation layer.
//!
//! Local action outcomes (load, save, rejected operations) are reported as a
//! status/message pair on the session and never change the job lifecycle.

use crate::dataset::{Dataset, DatasetStore, ParseError, SelectionError};
use crate::engine::{EngineApi, EvaluationRequest};
use crate::evaluator::{CandidateEvaluator, EvaluateError};
use crate::job_config::JobConfigBuilder;
use crate::model::{
    log_line, CandidateModel, EvaluationResult, JobEvent, JobReport, ProgressReport,
    ProgressStatus,
};
use crate::orchestrator::{JobOrchestrator, OrchestratorError};
use crate::storage;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

pub struct Session {
    store: DatasetStore,
    config: JobConfigBuilder,
    orchestrator: JobOrchestrator,
    evaluator: Arc<CandidateEvaluator>,
    event_tx: UnboundedSender<JobEvent>,
    status: ProgressReport,
}

impl Session {
    /// Must be called inside a tokio runtime; spawns the orchestrator task.
    pub fn new(
        api: Arc<dyn EngineApi>,
        poll_interval: Duration,
        event_tx: UnboundedSender<JobEvent>,
    ) -> Self {
        let orchestrator = JobOrchestrator::spawn(api.clone(), poll_interval, event_tx.clone());
        Self {
            store: DatasetStore::new(),
            config: JobConfigBuilder::new(),
            orchestrator,
            evaluator: Arc::new(CandidateEvaluator::new(api)),
            event_tx,
            status: ProgressReport::default(),
        }
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn config(&self) -> &JobConfigBuilder {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut JobConfigBuilder {
        &mut self.config
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    pub fn evaluator(&self) -> &Arc<CandidateEvaluator> {
        &self.evaluator
    }

    /// Outcome of the last local action.
    pub fn status(&self) -> &ProgressReport {
        &self.status
    }

    fn set_status(&mut self, status: ProgressStatus, message: impl Into<String>) {
        let report = ProgressReport::new(status, message);
        let _ = self.event_tx.send(JobEvent::Log(log_line(&report.message)));
        self.status = report;
    }

    /// Load CSV text as the new dataset. On success the previous job's
    /// results and any evaluation are dropped; on failure nothing changes
    /// except the status.
    pub async fn load_csv(&mut self, name: &str, raw: &str) -> Result<Arc<Dataset>, ParseError> {
        let dataset = match self.store.load_csv(name, raw) {
            Ok(dataset) => dataset,
            Err(e) => {
                self.set_status(ProgressStatus::Error, format!("Could not load {name}: {e}"));
                return Err(e);
            }
        };
        self.evaluator.clear();
        if let Err(e) = self.orchestrator.reset().await {
            tracing::warn!(error = %e, "could not reset job after load");
        }
        self.set_status(ProgressStatus::Loaded, format!("{name} loaded"));
        Ok(dataset)
    }

    fn selection_changed<T>(
        &mut self,
        result: Result<T, SelectionError>,
    ) -> Result<T, SelectionError> {
        match &result {
            Ok(_) => self.evaluator.clear(),
            Err(e) => self.set_status(ProgressStatus::Warning, e.to_string()),
        }
        result
    }

    pub fn set_output(&mut self, column: &str) -> Result<(), SelectionError> {
        let result = self.store.set_output(column);
        self.selection_changed(result)
    }

    pub fn toggle_input(&mut self, column: &str) -> Result<bool, SelectionError> {
        let result = self.store.toggle_input(column);
        self.selection_changed(result)
    }

    pub fn select_all_inputs(&mut self) {
        self.store.select_all_inputs();
        self.evaluator.clear();
    }

    pub fn select_no_inputs(&mut self) {
        self.store.select_no_inputs();
        self.evaluator.clear();
    }

    /// Build a job from the current dataset, selection and configuration
    /// and hand it to the orchestrator.
    pub async fn submit(&mut self) -> Result<(), OrchestratorError> {
        let result = match self.config.build(&self.store) {
            Ok(spec) => self.orchestrator.submit(spec).await,
            Err(e) => Err(OrchestratorError::Precondition(e.to_string())),
        };
        match &result {
            Ok(()) => self.evaluator.clear(),
            Err(e) => self.set_status(ProgressStatus::Warning, e.to_string()),
        }
        result
    }

    pub async fn stop(&mut self) -> Result<(), OrchestratorError> {
        let result = self.orchestrator.stop().await;
        if let Err(e) = &result {
            self.set_status(ProgressStatus::Warning, e.to_string());
        }
        result
    }

    /// Score one candidate against the loaded dataset. Overlapping calls
    /// resolve last-request-wins; see [`CandidateEvaluator`].
    pub async fn evaluate(
        &self,
        candidate: &CandidateModel,
    ) -> Result<EvaluationResult, EvaluateError> {
        let request: EvaluationRequest = CandidateEvaluator::request_for(candidate, &self.store)?;
        self.evaluator.evaluate(request).await
    }

    /// Export the current candidate table to `path`.
    pub fn save_candidates(&mut self, path: &Path) -> Result<()> {
        let rows = self.orchestrator.snapshot().candidates;
        match storage::export_candidates_csv(path, &rows) {
            Ok(()) => {
                self.set_status(
                    ProgressStatus::Saved,
                    format!("Candidates saved to {}", path.display()),
                );
                Ok(())
            }
            Err(e) => {
                self.set_status(ProgressStatus::Error, format!("Save failed: {e:#}"));
                Err(e)
            }
        }
    }

    /// Serializable summary of the session's current job.
    pub fn report(&self, base_url: &str) -> JobReport {
        let snapshot = self.orchestrator.snapshot();
        let selection = self.store.selection();
        let timestamp_utc = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        JobReport {
            timestamp_utc,
            base_url: base_url.to_string(),
            dataset: self.store.name().map(str::to_string),
            output: selection.output.clone(),
            inputs: selection.inputs.clone(),
            parameters: *self.config.parameters(),
            state: snapshot.state,
            progress: snapshot.progress,
            error: snapshot.error,
            candidates: snapshot.candidates,
            evaluation: self.evaluator.current(),
        }
    }
}
