//! Job lifecycle controller.
//!
//! A single task owns the lifecycle state and is the only place it is
//! mutated. UI layers talk to it through [`JobOrchestrator`]; background
//! requests report back through an internal channel, tagged with the job
//! generation they belong to.

use super::polling::{
    spawn_candidates_loop, spawn_final_capture, spawn_progress_loop, PollLoop, PollOutcome,
};
use crate::engine::{Ack, ArtifactStatus, EngineApi, EngineError};
use crate::job_config::JobSpec;
use crate::model::{
    log_line, CandidateModel, JobEvent, JobSnapshot, JobState, ProgressReport, ProgressStatus,
    TerminalKind,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// The operation is not valid in the current lifecycle state.
    #[error("{0}")]
    Precondition(String),
    #[error("orchestrator is no longer running")]
    Closed,
}

/// Commands accepted by the controller task.
enum Command {
    Submit {
        spec: Box<JobSpec>,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

/// Results of one-shot lifecycle requests run off the controller task.
enum ActionOutcome {
    Submitted {
        generation: u64,
        result: Result<Ack, EngineError>,
    },
    Stopped {
        generation: u64,
        stop: Result<Ack, EngineError>,
        candidates: Option<Result<Vec<CandidateModel>, EngineError>>,
    },
}

/// Cloneable handle to the controller task. The task exits once every
/// handle is dropped, cancelling any polling it still owns.
#[derive(Clone)]
pub struct JobOrchestrator {
    cmd_tx: UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<JobSnapshot>,
}

impl JobOrchestrator {
    /// Spawn the controller task. `poll_interval` is the cadence of both
    /// polling loops.
    pub fn spawn(
        api: Arc<dyn EngineApi>,
        poll_interval: Duration,
        event_tx: UnboundedSender<JobEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(JobSnapshot::default());
        let controller = Controller::new(api, poll_interval, event_tx, snapshot_tx);
        tokio::spawn(controller.run(cmd_rx));
        Self {
            cmd_tx,
            snapshot_rx,
        }
    }

    /// Start a job. Fails with [`OrchestratorError::Precondition`] while
    /// another job is submitting, running or stopping. Returns once the
    /// job is accepted; the outcome is observed through the snapshot.
    pub async fn submit(&self, spec: JobSpec) -> Result<(), OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit {
                spec: Box::new(spec),
                reply,
            })
            .map_err(|_| OrchestratorError::Closed)?;
        rx.await.map_err(|_| OrchestratorError::Closed)?
    }

    /// Stop the running job. Only valid while `Running`.
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stop { reply })
            .map_err(|_| OrchestratorError::Closed)?;
        rx.await.map_err(|_| OrchestratorError::Closed)?
    }

    /// Drop the current job from view and return to `Idle`.
    pub async fn reset(&self) -> Result<(), OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Reset { reply })
            .map_err(|_| OrchestratorError::Closed)?;
        rx.await.map_err(|_| OrchestratorError::Closed)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Wait until no request for the current job is outstanding or
    /// scheduled.
    pub async fn wait_settled(&self) -> Result<JobSnapshot, OrchestratorError> {
        let mut rx = self.snapshot_rx.clone();
        let snapshot = rx
            .wait_for(|s| s.is_settled())
            .await
            .map_err(|_| OrchestratorError::Closed)?;
        Ok(snapshot.clone())
    }
}

/// Delete the previous job's candidate table, then submit. A stale table
/// left behind would otherwise be read as this job's first results.
async fn submit_fresh(api: &dyn EngineApi, spec: &JobSpec) -> Result<Ack, EngineError> {
    match api.delete_artifact().await {
        Ok(ArtifactStatus::Deleted) => tracing::debug!("previous candidate table deleted"),
        Ok(ArtifactStatus::NotFound) => tracing::debug!("no previous candidate table"),
        Err(e) if e.is_network() => return Err(e),
        Err(e) => tracing::warn!(error = %e, "could not delete previous candidate table"),
    }
    api.submit(spec).await
}

struct Controller {
    api: Arc<dyn EngineApi>,
    poll_interval: Duration,
    event_tx: UnboundedSender<JobEvent>,
    snapshot_tx: watch::Sender<JobSnapshot>,
    poll_tx: UnboundedSender<PollOutcome>,
    poll_rx: UnboundedReceiver<PollOutcome>,
    action_tx: UnboundedSender<ActionOutcome>,
    action_rx: UnboundedReceiver<ActionOutcome>,

    /// Bumped on every submit and reset; outcomes from older generations
    /// are dropped.
    generation: u64,
    state: JobState,
    progress: ProgressReport,
    candidates: Vec<CandidateModel>,
    error: Option<String>,

    progress_loop: Option<PollLoop>,
    candidates_loop: Option<PollLoop>,
    final_capture: Option<PollLoop>,
}

impl Controller {
    fn new(
        api: Arc<dyn EngineApi>,
        poll_interval: Duration,
        event_tx: UnboundedSender<JobEvent>,
        snapshot_tx: watch::Sender<JobSnapshot>,
    ) -> Self {
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Self {
            api,
            poll_interval,
            event_tx,
            snapshot_tx,
            poll_tx,
            poll_rx,
            action_tx,
            action_rx,
            generation: 0,
            state: JobState::Idle,
            progress: ProgressReport::default(),
            candidates: Vec::new(),
            error: None,
            progress_loop: None,
            candidates_loop: None,
            final_capture: None,
        }
    }

    async fn run(mut self, mut cmd_rx: UnboundedReceiver<Command>) {
        loop {
            // Both outcome channels always have a live sender (held by
            // `self`), so only the command channel can close.
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(outcome) = self.action_rx.recv() => self.handle_action(outcome),
                Some(outcome) = self.poll_rx.recv() => self.handle_poll(outcome),
            }
            self.publish();
        }
        self.stop_polling();
        self.final_capture = None;
        tracing::debug!("job controller exited");
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            state: self.state,
            progress: self.progress.clone(),
            candidates: self.candidates.clone(),
            error: self.error.clone(),
            final_capture_pending: self.final_capture.is_some(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn log(&self, message: impl AsRef<str>) {
        let _ = self.event_tx.send(JobEvent::Log(log_line(message.as_ref())));
    }

    fn transition(&mut self, to: JobState) {
        let from = self.state;
        if from == to {
            return;
        }
        // Leaving `Running` and cancelling the loops happen in one step.
        if from == JobState::Running {
            self.stop_polling();
        }
        self.state = to;
        tracing::info!(%from, %to, "job state changed");
        let _ = self.event_tx.send(JobEvent::StateChanged { from, to });
    }

    fn set_progress(&mut self, report: ProgressReport) {
        if report != self.progress {
            if !report.message.is_empty() {
                self.log(&report.message);
            }
            let _ = self.event_tx.send(JobEvent::Progress(report.clone()));
        }
        self.progress = report;
    }

    fn set_candidates(&mut self, rows: Vec<CandidateModel>) {
        if rows != self.candidates {
            tracing::debug!(rows = rows.len(), "candidate table updated");
            let _ = self.event_tx.send(JobEvent::Candidates { rows: rows.len() });
        }
        self.candidates = rows;
    }

    fn stop_polling(&mut self) {
        if let Some(lp) = self.progress_loop.take() {
            lp.cancel();
        }
        if let Some(lp) = self.candidates_loop.take() {
            lp.cancel();
        }
    }

    fn fail(&mut self, message: String) {
        tracing::error!(error = %message, "job failed");
        self.final_capture = None;
        self.error = Some(message.clone());
        self.set_progress(ProgressReport::new(ProgressStatus::Error, message));
        self.transition(JobState::Terminal(TerminalKind::Error));
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            // Publish before replying so callers observe the new state.
            Command::Submit { spec, reply } => {
                let result = self.submit(*spec);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let result = self.stop();
                self.publish();
                let _ = reply.send(result);
            }
            Command::Reset { reply } => {
                self.reset();
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    fn submit(&mut self, spec: JobSpec) -> Result<(), OrchestratorError> {
        if self.state.is_active() {
            let msg = format!("cannot submit: a job is already {}", self.state);
            tracing::warn!("{msg}");
            return Err(OrchestratorError::Precondition(msg));
        }

        self.generation += 1;
        self.final_capture = None;
        self.error = None;
        self.set_candidates(Vec::new());
        for line in spec.describe() {
            self.log(line);
        }
        self.transition(JobState::Submitting);
        self.set_progress(ProgressReport::new(
            ProgressStatus::Running,
            "Started execution and polling...",
        ));

        let generation = self.generation;
        let api = self.api.clone();
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            let result = submit_fresh(&*api, &spec).await;
            let _ = tx.send(ActionOutcome::Submitted { generation, result });
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), OrchestratorError> {
        if self.state != JobState::Running {
            return Err(OrchestratorError::Precondition(format!(
                "cannot stop: job is {}",
                self.state
            )));
        }
        self.transition(JobState::Stopping);
        self.log("Stopping...");

        let generation = self.generation;
        let api = self.api.clone();
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            let stop = api.stop().await;
            let candidates = match stop {
                Ok(_) => Some(api.fetch_candidates().await),
                Err(_) => None,
            };
            let _ = tx.send(ActionOutcome::Stopped {
                generation,
                stop,
                candidates,
            });
        });
        Ok(())
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.stop_polling();
        self.final_capture = None;
        self.error = None;
        self.set_candidates(Vec::new());
        self.progress = ProgressReport::default();
        self.transition(JobState::Idle);
    }

    fn handle_action(&mut self, outcome: ActionOutcome) {
        match outcome {
            ActionOutcome::Submitted { generation, result } => {
                if generation != self.generation || self.state != JobState::Submitting {
                    tracing::debug!(generation, "dropping stale submit outcome");
                    return;
                }
                match result {
                    Ok(ack) => {
                        let message = if ack.message.is_empty() {
                            "Job submitted".to_string()
                        } else {
                            ack.message
                        };
                        self.set_progress(ProgressReport::new(ProgressStatus::Running, message));
                        self.transition(JobState::Running);
                        self.start_polling();
                    }
                    Err(e) => self.fail(e.to_string()),
                }
            }
            ActionOutcome::Stopped {
                generation,
                stop,
                candidates,
            } => {
                if generation != self.generation || self.state != JobState::Stopping {
                    tracing::debug!(generation, "dropping stale stop outcome");
                    return;
                }
                match stop {
                    Ok(ack) => {
                        match candidates {
                            Some(Ok(rows)) => self.set_candidates(rows),
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "final candidate fetch failed");
                                self.log(format!("Could not fetch final candidates: {e}"));
                            }
                            None => {}
                        }
                        let message = if ack.message.is_empty() {
                            "Execution stopped".to_string()
                        } else {
                            ack.message
                        };
                        self.set_progress(ProgressReport::new(ProgressStatus::Stopped, message));
                        self.transition(JobState::Terminal(TerminalKind::Stopped));
                    }
                    Err(e) => self.fail(e.to_string()),
                }
            }
        }
    }

    fn start_polling(&mut self) {
        let g = self.generation;
        self.progress_loop = Some(spawn_progress_loop(
            self.api.clone(),
            self.poll_interval,
            g,
            self.poll_tx.clone(),
        ));
        self.candidates_loop = Some(spawn_candidates_loop(
            self.api.clone(),
            self.poll_interval,
            g,
            self.poll_tx.clone(),
        ));
    }

    /// The engine reported a terminal status. Polling stops now; exactly one
    /// more candidate fetch is issued because the table endpoint may lag the
    /// progress endpoint.
    fn finish(&mut self, kind: TerminalKind) {
        self.transition(JobState::Terminal(kind));
        self.final_capture = Some(spawn_final_capture(
            self.api.clone(),
            self.generation,
            self.poll_tx.clone(),
        ));
    }

    fn handle_poll(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Progress { generation, result } => {
                if generation != self.generation || self.state != JobState::Running {
                    tracing::debug!(generation, "dropping progress from a finished poll");
                    return;
                }
                match result {
                    Ok(report) => {
                        let status = report.status;
                        let message = report.message.clone();
                        self.set_progress(report);
                        match status {
                            ProgressStatus::Done => self.finish(TerminalKind::Done),
                            ProgressStatus::Stopped => self.finish(TerminalKind::Stopped),
                            ProgressStatus::Error => self.fail(message),
                            _ => {}
                        }
                    }
                    Err(e) if e.is_network() => self.fail(e.to_string()),
                    Err(e) => {
                        tracing::warn!(error = %e, "progress poll failed");
                        self.log(format!("Progress fetch error: {e}"));
                    }
                }
            }
            PollOutcome::Candidates { generation, result } => {
                if generation != self.generation || self.state != JobState::Running {
                    tracing::debug!(generation, "dropping candidates from a finished poll");
                    return;
                }
                match result {
                    Ok(rows) => self.set_candidates(rows),
                    Err(e) if e.is_network() => self.fail(e.to_string()),
                    Err(e) => {
                        tracing::warn!(error = %e, "candidate poll failed");
                        self.log(format!("Candidate table error: {e}"));
                    }
                }
            }
            PollOutcome::FinalCandidates { generation, result } => {
                if generation != self.generation || self.final_capture.is_none() {
                    tracing::debug!(generation, "dropping stale final candidates");
                    return;
                }
                match result {
                    Ok(rows) => {
                        self.log(format!("Captured final candidate table ({} rows)", rows.len()));
                        self.set_candidates(rows);
                        self.final_capture = None;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "final candidate fetch failed");
                        self.log(format!("Could not fetch final candidates: {e}"));
                        self.final_capture = None;
                    }
                }
            }
        }
    }
}
