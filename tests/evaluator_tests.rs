//! Integration tests for candidate evaluation.

mod common;

use common::*;
use std::sync::Arc;
use symreg_cli::engine::{EngineApi, EvaluationRequest};
use symreg_cli::evaluator::{CandidateEvaluator, EvaluateError};
use symreg_cli::model::{AccuracyMetrics, EvaluationResult};

fn evaluator(engine: &Arc<ScriptedEngine>) -> CandidateEvaluator {
    let api: Arc<dyn EngineApi> = engine.clone();
    CandidateEvaluator::new(api)
}

fn request(equation: &str) -> EvaluationRequest {
    CandidateEvaluator::request_for(&row(1, 0.0, equation), &loaded_store()).unwrap()
}

// ---------------------------------------------------------------------------
// Test: last request wins
// ---------------------------------------------------------------------------

/// A slow evaluation of A started before B must not overwrite B's result.
#[tokio::test(start_paused = true)]
async fn newest_request_wins_over_slower_older_one() {
    let engine = Arc::new(ScriptedEngine {
        evaluate: Script::new(vec![
            delayed(500, evaluation(&[1.0; 10])),
            delayed(100, evaluation(&[2.0; 10])),
        ]),
        ..Default::default()
    });
    let ev = evaluator(&engine);
    let mut results = ev.subscribe();

    let (a, b) = tokio::join!(ev.evaluate(request("A")), ev.evaluate(request("B")));

    assert_eq!(a.unwrap_err(), EvaluateError::Superseded);
    let b = b.unwrap();
    assert_eq!(b.equation, "B");
    assert_eq!(ev.current().unwrap().equation, "B");
    assert_eq!(results.borrow_and_update().as_ref().unwrap().equation, "B");
    assert_eq!(engine.evaluate.calls(), 2);
}

/// A request that completes before the next one starts is shown until the
/// next one replaces it.
#[tokio::test(start_paused = true)]
async fn sequential_evaluations_replace_the_result() {
    let engine = Arc::new(ScriptedEngine {
        evaluate: Script::new(vec![
            delayed(100, evaluation(&[1.0; 10])),
            delayed(100, evaluation(&[2.0; 10])),
        ]),
        ..Default::default()
    });
    let ev = evaluator(&engine);

    ev.evaluate(request("A")).await.unwrap();
    let shown = ev.current().unwrap();
    assert_eq!(shown.equation, "A");
    assert_eq!(shown.predictions[0], Some(1.0));

    ev.evaluate(request("B")).await.unwrap();
    let shown = ev.current().unwrap();
    assert_eq!(shown.equation, "B");
    assert_eq!(shown.predictions[0], Some(2.0));
}

// ---------------------------------------------------------------------------
// Test: invalidation and errors
// ---------------------------------------------------------------------------

/// Clearing while a request is in flight drops its response.
#[tokio::test(start_paused = true)]
async fn clear_invalidates_in_flight_requests() {
    let engine = Arc::new(ScriptedEngine {
        evaluate: Script::new(vec![delayed(300, evaluation(&[1.0; 10]))]),
        ..Default::default()
    });
    let ev = evaluator(&engine);

    let pending = ev.evaluate(request("A"));
    let clear = async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        ev.clear();
    };
    let (result, ()) = tokio::join!(pending, clear);

    assert_eq!(result.unwrap_err(), EvaluateError::Superseded);
    assert!(ev.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_latest_request_clears_the_result() {
    let engine = Arc::new(ScriptedEngine {
        evaluate: Script::new(vec![
            ok(evaluation(&[1.0; 10])),
            engine_err("Invalid equation: x3"),
        ]),
        ..Default::default()
    });
    let ev = evaluator(&engine);

    ev.evaluate(request("x1")).await.unwrap();
    assert!(ev.current().is_some());

    let err = ev.evaluate(request("x3")).await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid equation: x3");
    assert!(ev.current().is_none());
}

/// Metrics the engine leaves undefined are computed from the dataset.
#[tokio::test(start_paused = true)]
async fn missing_metrics_are_filled_locally() {
    let observed: Vec<f64> = (1..=10).map(f64::from).collect();
    let engine = Arc::new(ScriptedEngine {
        evaluate: Script::new(vec![ok(EvaluationResult {
            equation: String::new(),
            predictions: observed.iter().copied().map(Some).collect(),
            metrics: AccuracyMetrics::default(),
        })]),
        ..Default::default()
    });
    let ev = evaluator(&engine);

    let result = ev.evaluate(request("y")).await.unwrap();
    assert_eq!(result.metrics.r2, Some(1.0));
    assert_eq!(result.metrics.rmse, Some(0.0));
    assert_eq!(result.metrics.nrmse, Some(0.0));
}
