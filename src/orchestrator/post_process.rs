//! Post-run processing utilities.
//!
//! Handles exports and auto-save once a job has settled.

use crate::cli::Cli;
use crate::model::JobReport;
use crate::storage;
use std::path::PathBuf;

/// Result of post-run processing, ready for presentation layers.
#[derive(Debug, Default)]
pub struct ProcessedJob {
    pub export_messages: Vec<String>,
    pub auto_saved_path: Option<PathBuf>,
}

/// Write the requested exports and, when enabled and there is something to
/// keep, auto-save the candidate table. Failures become messages; a job
/// that already finished is never failed by its exports.
pub fn process_job_completion(args: &Cli, report: &JobReport) -> ProcessedJob {
    let mut export_messages = Vec::new();

    if let Some(path) = args.export_csv.as_deref() {
        match storage::export_candidates_csv(path, &report.candidates) {
            Ok(()) => export_messages.push(format!("Exported CSV: {}", path.display())),
            Err(e) => export_messages.push(format!("Export CSV failed: {e:#}")),
        }
    }
    if let Some(path) = args.export_json.as_deref() {
        match storage::export_json(path, report) {
            Ok(()) => export_messages.push(format!("Exported JSON: {}", path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    let auto_saved_path = if args.auto_save && !report.candidates.is_empty() {
        match storage::save_candidates(report) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "auto-save failed");
                None
            }
        }
    } else {
        None
    };

    ProcessedJob {
        export_messages,
        auto_saved_path,
    }
}
