//! On-demand scoring of a single candidate against the loaded dataset.
//!
//! Evaluations may overlap (rapid row selection). Each call takes a ticket;
//! only the holder of the newest ticket may publish, so the visible result
//! always belongs to the most recently started request.

use crate::dataset::DatasetStore;
use crate::engine::{EngineApi, EngineError, EvaluationRequest};
use crate::metrics;
use crate::model::{CandidateModel, EvaluationResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluateError {
    #[error("no dataset loaded")]
    NoDataset,
    #[error("no output variable selected")]
    NoSelection,
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A newer evaluation was started (or the result was cleared) before
    /// this one completed.
    #[error("superseded by a newer evaluation")]
    Superseded,
}

pub struct CandidateEvaluator {
    api: Arc<dyn EngineApi>,
    latest: AtomicU64,
    result_tx: watch::Sender<Option<EvaluationResult>>,
}

impl CandidateEvaluator {
    pub fn new(api: Arc<dyn EngineApi>) -> Self {
        let (result_tx, _) = watch::channel(None);
        Self {
            api,
            latest: AtomicU64::new(0),
            result_tx,
        }
    }

    /// Build the request for `candidate` from the store's dataset and
    /// current selection.
    pub fn request_for(
        candidate: &CandidateModel,
        store: &DatasetStore,
    ) -> Result<EvaluationRequest, EvaluateError> {
        if store.dataset().is_none() {
            return Err(EvaluateError::NoDataset);
        }
        EvaluationRequest::for_candidate(candidate, store).ok_or(EvaluateError::NoSelection)
    }

    /// Score `request`. The published result is replaced only if no newer
    /// evaluation started meanwhile; otherwise this returns
    /// [`EvaluateError::Superseded`] and the response is dropped.
    pub async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<EvaluationResult, EvaluateError> {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(ticket, equation = %request.equation, "evaluating candidate");

        let outcome = self
            .api
            .evaluate(&request)
            .await
            .map(|result| complete_metrics(result, &request));

        // The ticket check runs under the watch lock, so a newer request
        // cannot publish between the check and the write.
        let published = self.result_tx.send_if_modified(|slot| {
            if self.latest.load(Ordering::SeqCst) != ticket {
                return false;
            }
            *slot = outcome.as_ref().ok().cloned();
            true
        });
        if !published {
            tracing::debug!(ticket, "discarding superseded evaluation");
            return Err(EvaluateError::Superseded);
        }

        outcome.map_err(|e| {
            tracing::warn!(error = %e, "evaluation failed");
            EvaluateError::Engine(e)
        })
    }

    /// Drop the current result and invalidate every in-flight request.
    pub fn clear(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
        self.result_tx.send_replace(None);
    }

    pub fn current(&self) -> Option<EvaluationResult> {
        self.result_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<EvaluationResult>> {
        self.result_tx.subscribe()
    }
}

/// Fill metrics the engine could not compute from the predictions and the
/// observed output column.
fn complete_metrics(mut result: EvaluationResult, request: &EvaluationRequest) -> EvaluationResult {
    if result.metrics.is_complete() {
        return result;
    }
    let local = request
        .dataset
        .numeric_column(&request.output)
        .and_then(|observed| metrics::accuracy(&observed, &result.predictions));
    if let Some(local) = local {
        result.metrics = result.metrics.or(local);
    }
    result
}
