//! Local persistence of candidate tables and job reports.

use crate::model::{CandidateModel, JobReport};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory for auto-saved candidate tables.
pub fn runs_dir() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .context("no data or home directory available")?;
    Ok(base.join("symreg-cli").join("runs"))
}

/// Render candidates in the engine's own table layout.
pub fn candidates_to_csv(rows: &[CandidateModel]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(["Complexity", "Loss", "Equation"])?;
    for row in rows {
        writer.write_record([
            row.complexity.to_string(),
            row.loss.to_string(),
            row.equation.clone(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush candidate table: {}", e.error()))?;
    String::from_utf8(bytes).context("candidate table is not UTF-8")
}

pub fn export_candidates_csv(path: &Path, rows: &[CandidateModel]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let csv = candidates_to_csv(rows)?;
    fs::write(path, csv).with_context(|| format!("write {}", path.display()))
}

pub fn export_json(path: &Path, report: &JobReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("serialize job report")?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))
}

/// Save the candidate table into [`runs_dir`], named after the report's
/// timestamp. Returns the written path.
pub fn save_candidates(report: &JobReport) -> Result<PathBuf> {
    save_candidates_in(&runs_dir()?, report)
}

pub fn save_candidates_in(dir: &Path, report: &JobReport) -> Result<PathBuf> {
    let stamp = report.timestamp_utc.replace(':', "-");
    let path = dir.join(format!("candidates-{stamp}.csv"));
    export_candidates_csv(&path, &report.candidates)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::job_config::JobParameters;
    use crate::model::{JobState, ProgressReport, TerminalKind};

    fn rows() -> Vec<CandidateModel> {
        vec![
            CandidateModel {
                complexity: 1,
                loss: 2.5,
                equation: "x1".into(),
            },
            CandidateModel {
                complexity: 5,
                loss: 0.2,
                equation: "f(x1, x2)".into(),
            },
        ]
    }

    #[test]
    fn csv_uses_engine_layout_and_quotes_commas() {
        let csv = candidates_to_csv(&rows()).unwrap();
        assert_eq!(csv, "Complexity,Loss,Equation\n1,2.5,x1\n5,0.2,\"f(x1, x2)\"\n");
        let parsed = crate::engine::wire::parse_candidates_csv(&csv).unwrap();
        assert_eq!(parsed, rows());
    }

    #[test]
    fn exported_table_loads_as_a_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hof.csv");
        export_candidates_csv(&path, &rows()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let ds = Dataset::from_csv(&text).unwrap();
        assert_eq!(ds.columns(), ["Complexity", "Loss", "Equation"]);
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn saved_file_is_named_after_the_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let report = JobReport {
            timestamp_utc: "2026-01-02T03:04:05Z".into(),
            base_url: "http://localhost:5000".into(),
            dataset: Some("d.csv".into()),
            output: Some("y".into()),
            inputs: vec!["x1".into()],
            parameters: JobParameters::default(),
            state: JobState::Terminal(TerminalKind::Done),
            progress: ProgressReport::default(),
            error: None,
            candidates: rows(),
            evaluation: None,
        };
        let path = save_candidates_in(dir.path(), &report).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "candidates-2026-01-02T03-04-05Z.csv"
        );
        assert!(path.exists());
    }
}
