//! Cancellable polling tasks.
//!
//! Each loop owns a [`CancellationToken`]. Cancelling it guarantees no new
//! request is issued afterwards; a request already in flight runs to
//! completion and its outcome is still delivered, so the controller must
//! decide whether to keep it.

use crate::engine::{EngineApi, EngineError};
use crate::model::{CandidateModel, ProgressReport};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Results flowing back from background requests to the controller. Each
/// carries the generation of the job it was issued for.
#[derive(Debug)]
pub(crate) enum PollOutcome {
    Progress {
        generation: u64,
        result: Result<ProgressReport, EngineError>,
    },
    Candidates {
        generation: u64,
        result: Result<Vec<CandidateModel>, EngineError>,
    },
    /// The one fetch issued after the engine reported a terminal status.
    FinalCandidates {
        generation: u64,
        result: Result<Vec<CandidateModel>, EngineError>,
    },
}

/// Handle to a running polling task. Dropping it cancels the task.
pub(crate) struct PollLoop {
    cancel: CancellationToken,
    #[cfg_attr(not(test), allow(dead_code))]
    handle: JoinHandle<()>,
}

impl PollLoop {
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run `poll` once per `period`, starting one period from now, until the
/// token is cancelled or `poll` returns `false`.
fn spawn_periodic<F, Fut>(period: Duration, mut poll: F) -> PollLoop
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        // A slow engine stretches the cadence instead of bursting requests.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !poll().await {
                break;
            }
        }
    });
    PollLoop { cancel, handle }
}

pub(crate) fn spawn_progress_loop(
    api: Arc<dyn EngineApi>,
    period: Duration,
    generation: u64,
    tx: UnboundedSender<PollOutcome>,
) -> PollLoop {
    spawn_periodic(period, move || {
        let api = api.clone();
        let tx = tx.clone();
        async move {
            let result = api.fetch_progress().await;
            tx.send(PollOutcome::Progress { generation, result }).is_ok()
        }
    })
}

pub(crate) fn spawn_candidates_loop(
    api: Arc<dyn EngineApi>,
    period: Duration,
    generation: u64,
    tx: UnboundedSender<PollOutcome>,
) -> PollLoop {
    spawn_periodic(period, move || {
        let api = api.clone();
        let tx = tx.clone();
        async move {
            let result = api.fetch_candidates().await;
            tx.send(PollOutcome::Candidates { generation, result }).is_ok()
        }
    })
}

/// Fetch the candidate table once, now. There is no retry: whatever the
/// outcome, nothing is requested afterwards.
pub(crate) fn spawn_final_capture(
    api: Arc<dyn EngineApi>,
    generation: u64,
    tx: UnboundedSender<PollOutcome>,
) -> PollLoop {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        if token.is_cancelled() {
            return;
        }
        let result = api.fetch_candidates().await;
        let _ = tx.send(PollOutcome::FinalCandidates { generation, result });
    });
    PollLoop { cancel, handle }
}
