//! Remote job client.
//!
//! [`EngineApi`] is the seam between the orchestrator and the remote
//! symbolic-regression engine; [`HttpEngine`] implements it over HTTP.

mod client;
pub mod wire;

pub use client::HttpEngine;

use crate::dataset::{Dataset, DatasetStore};
use crate::job_config::JobSpec;
use crate::model::{CandidateModel, EvaluationResult, ProgressReport};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single engine request.
///
/// `Network` means the engine could not be reached (or the connection
/// dropped); `Engine` means it answered with an application-level error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Network(String),
    #[error("{message}")]
    Engine {
        /// HTTP status, if the error came with one.
        status: Option<u16>,
        message: String,
    },
}

impl EngineError {
    pub fn engine(message: impl Into<String>) -> Self {
        EngineError::Engine {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, EngineError::Network(_))
    }
}

/// Acknowledgement of a submit/stop request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ack {
    pub message: String,
}

/// Outcome of deleting the server-side candidate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    Deleted,
    NotFound,
}

/// Equation plus the dataset slice needed to score it.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub equation: String,
    pub output: String,
    pub inputs: Vec<String>,
    pub dataset: Arc<Dataset>,
}

impl EvaluationRequest {
    /// Build a request from the store's current dataset and selection.
    /// Returns `None` when no dataset or output column is available.
    pub fn for_candidate(candidate: &CandidateModel, store: &DatasetStore) -> Option<Self> {
        let dataset = store.dataset()?.clone();
        let selection = store.selection();
        Some(Self {
            equation: candidate.equation.clone(),
            output: selection.output.clone()?,
            inputs: selection.inputs.clone(),
            dataset,
        })
    }
}

#[async_trait]
pub trait EngineApi: Send + Sync {
    /// `POST /job`
    async fn submit(&self, spec: &JobSpec) -> Result<Ack, EngineError>;
    /// `GET /progress`
    async fn fetch_progress(&self) -> Result<ProgressReport, EngineError>;
    /// `GET /candidates`; empty while the engine has not written a table.
    async fn fetch_candidates(&self) -> Result<Vec<CandidateModel>, EngineError>;
    /// `POST /stop`
    async fn stop(&self) -> Result<Ack, EngineError>;
    /// `DELETE /candidates`
    async fn delete_artifact(&self) -> Result<ArtifactStatus, EngineError>;
    /// `POST /evaluate`. Metrics the engine cannot compute come back as `None`.
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult, EngineError>;
}
