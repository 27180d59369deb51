//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for a finished job: final status, the
//! candidate table and, if present, the evaluated candidate's metrics.

use crate::model::{JobReport, JobState};

/// Pre-formatted lines for text output.
pub struct TextSummary {
    pub lines: Vec<String>,
}

fn metric(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

/// Build a text summary from a job report.
pub fn build_text_summary(report: &JobReport) -> TextSummary {
    let mut lines = Vec::new();

    if let Some(dataset) = report.dataset.as_deref() {
        lines.push(format!("Dataset: {dataset}"));
    }
    if let Some(output) = report.output.as_deref() {
        lines.push(format!("Output: {output}  Inputs: {}", report.inputs.join(", ")));
    }
    lines.push(format!("Engine: {}", report.base_url));

    let status = match report.state {
        JobState::Terminal(_) => format!("Job {}", report.state),
        other => format!("Job {other} (not finished)"),
    };
    lines.push(status);
    if let Some(error) = report.error.as_deref() {
        lines.push(format!("Error: {error}"));
    } else if !report.progress.message.is_empty() {
        lines.push(format!("Status: {}", report.progress.message));
    }

    if report.candidates.is_empty() {
        lines.push("No candidate models.".to_string());
    } else {
        let width = report
            .candidates
            .iter()
            .map(|c| c.complexity.to_string().len())
            .max()
            .unwrap_or(1)
            .max("Complexity".len());
        lines.push(format!(
            "{:>3}  {:>width$}  {:>12}  Equation",
            "#", "Complexity", "Loss"
        ));
        for (i, c) in report.candidates.iter().enumerate() {
            lines.push(format!(
                "{:>3}  {:>width$}  {:>12.6e}  {}",
                i, c.complexity, c.loss, c.equation
            ));
        }
    }

    if let Some(eval) = report.evaluation.as_ref() {
        let predicted = eval.predictions.iter().filter(|p| p.is_some()).count();
        lines.push(format!("Evaluated: {}", eval.equation));
        lines.push(format!(
            "  r2 {}  rmse {}  nrmse {}  ({predicted}/{} predictions)",
            metric(eval.metrics.r2),
            metric(eval.metrics.rmse),
            metric(eval.metrics.nrmse),
            eval.predictions.len()
        ));
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_config::JobParameters;
    use crate::model::{
        AccuracyMetrics, CandidateModel, EvaluationResult, ProgressReport, ProgressStatus,
        TerminalKind,
    };

    fn report() -> JobReport {
        JobReport {
            timestamp_utc: String::new(),
            base_url: "http://localhost:5000".into(),
            dataset: Some("data.csv".into()),
            output: Some("y".into()),
            inputs: vec!["x1".into(), "x2".into()],
            parameters: JobParameters::default(),
            state: JobState::Terminal(TerminalKind::Done),
            progress: ProgressReport::new(ProgressStatus::Done, "Search finished"),
            error: None,
            candidates: vec![
                CandidateModel {
                    complexity: 2,
                    loss: 1.5,
                    equation: "x1".into(),
                },
                CandidateModel {
                    complexity: 5,
                    loss: 0.2,
                    equation: "x1 + x2".into(),
                },
            ],
            evaluation: None,
        }
    }

    #[test]
    fn lists_every_candidate() {
        let lines = build_text_summary(&report()).lines;
        assert!(lines.contains(&"Job done".to_string()));
        assert!(lines.contains(&"Status: Search finished".to_string()));
        let rows: Vec<&String> = lines.iter().filter(|l| l.starts_with("  ")).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].ends_with("Equation"));
        assert!(rows[1].starts_with("  0") && rows[1].ends_with("x1"));
        assert!(rows[2].contains("2.000000e-1") && rows[2].ends_with("x1 + x2"));
    }

    #[test]
    fn error_replaces_status_and_missing_metrics_show_dash() {
        let mut r = report();
        r.state = JobState::Terminal(TerminalKind::Error);
        r.error = Some("engine unreachable: refused".into());
        r.candidates.clear();
        r.evaluation = Some(EvaluationResult {
            equation: "x1".into(),
            predictions: vec![Some(1.0), None],
            metrics: AccuracyMetrics {
                r2: None,
                rmse: Some(0.5),
                nrmse: None,
            },
        });
        let lines = build_text_summary(&r).lines;
        assert!(lines.contains(&"Error: engine unreachable: refused".to_string()));
        assert!(lines.contains(&"No candidate models.".to_string()));
        assert!(lines
            .iter()
            .any(|l| l == "  r2 -  rmse 0.5000  nrmse -  (1/2 predictions)"));
    }
}
