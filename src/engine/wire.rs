//! Request and response bodies exchanged with the engine.

use crate::dataset::{Dataset, Scalar};
use crate::engine::{EngineError, EvaluationRequest};
use crate::job_config::{JobParameters, JobSpec};
use crate::model::{AccuracyMetrics, CandidateModel, EvaluationResult, ProgressReport, ProgressStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ParametersBody {
    pub maxsize: u32,
    pub niterations: u32,
    pub populations: u32,
    pub population_size: u32,
    pub ncycles_per_iteration: u32,
    pub elementwise_loss: &'static str,
    pub model_selection: &'static str,
}

impl From<&JobParameters> for ParametersBody {
    fn from(p: &JobParameters) -> Self {
        Self {
            maxsize: p.max_size,
            niterations: p.iterations,
            populations: p.populations,
            population_size: p.population_size,
            ncycles_per_iteration: p.cycles_per_iteration,
            elementwise_loss: p.loss.wire_name(),
            model_selection: p.model_selection.wire_name(),
        }
    }
}

/// `POST /job` body.
#[derive(Debug, Serialize)]
pub struct JobBody<'a> {
    pub output_variable: &'a str,
    pub input_variables: &'a [String],
    pub headers: &'a [String],
    pub rows: &'a [Vec<Scalar>],
    pub parameters: ParametersBody,
    pub operators: Vec<&'static str>,
    pub functions: Vec<&'static str>,
}

impl<'a> From<&'a JobSpec> for JobBody<'a> {
    fn from(spec: &'a JobSpec) -> Self {
        Self {
            output_variable: &spec.output,
            input_variables: &spec.inputs,
            headers: spec.dataset.columns(),
            rows: spec.dataset.rows(),
            parameters: ParametersBody::from(&spec.parameters),
            operators: spec.operators.iter().map(|o| o.symbol()).collect(),
            functions: spec.functions.iter().map(|f| f.name()).collect(),
        }
    }
}

/// `POST /evaluate` body.
#[derive(Debug, Serialize)]
pub struct EvaluateBody<'a> {
    pub equation: &'a str,
    pub output_variable: &'a str,
    pub input_variables: &'a [String],
    pub headers: &'a [String],
    pub rows: &'a [Vec<Scalar>],
}

impl<'a> From<&'a EvaluationRequest> for EvaluateBody<'a> {
    fn from(req: &'a EvaluationRequest) -> Self {
        let dataset: &Dataset = &req.dataset;
        Self {
            equation: req.equation.trim(),
            output_variable: &req.output,
            input_variables: &req.inputs,
            headers: dataset.columns(),
            rows: dataset.rows(),
        }
    }
}

/// Status/message answer shared by `/job`, `/progress`, `/stop` and
/// `DELETE /candidates`.
#[derive(Debug, Default, Deserialize)]
pub struct StatusBody {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusBody {
    pub fn into_progress(self) -> ProgressReport {
        let status = self
            .status
            .as_deref()
            .map(ProgressStatus::from_tag)
            .unwrap_or_default();
        ProgressReport::new(status, self.message.unwrap_or_default())
    }

    /// Best human-readable text in the body.
    pub fn text(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .or(self.status.as_deref())
    }
}

/// `POST /evaluate` answer. Non-finite predictions and undefined metrics
/// arrive as `null`.
#[derive(Debug, Deserialize)]
pub struct EvaluationBody {
    #[serde(alias = "predictions")]
    pub prediction: Vec<Option<f64>>,
    #[serde(default)]
    pub r2: Option<f64>,
    #[serde(default)]
    pub rmse: Option<f64>,
    #[serde(default)]
    pub nrmse: Option<f64>,
}

impl EvaluationBody {
    pub fn into_result(self, equation: &str) -> EvaluationResult {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        EvaluationResult {
            equation: equation.to_string(),
            predictions: self.prediction.into_iter().map(finite).collect(),
            metrics: AccuracyMetrics {
                r2: finite(self.r2),
                rmse: finite(self.rmse),
                nrmse: finite(self.nrmse),
            },
        }
    }
}

const CANDIDATE_COLUMNS: [&str; 3] = ["Complexity", "Loss", "Equation"];

/// One row of the engine's candidate table.
#[derive(Debug, Deserialize)]
struct CandidateRecord {
    #[serde(rename = "Complexity")]
    complexity: f64,
    #[serde(rename = "Loss")]
    loss: f64,
    #[serde(rename = "Equation")]
    equation: String,
}

/// Complexity is an ordering key: only whole numbers in `u32` range count.
fn whole_complexity(v: f64) -> Option<u32> {
    (v.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&v)).then_some(v as u32)
}

/// Decode the engine's candidate table (`Complexity,Loss,Equation`, any
/// column order and header case, extra columns ignored).
pub fn parse_candidates_csv(text: &str) -> Result<Vec<CandidateModel>, EngineError> {
    let malformed = |e: csv::Error| EngineError::engine(format!("malformed candidate table: {e}"));
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: csv::StringRecord = reader
        .headers()
        .map_err(malformed)?
        .iter()
        .map(|h| {
            CANDIDATE_COLUMNS
                .into_iter()
                .find(|c| c.eq_ignore_ascii_case(h))
                .unwrap_or(h)
        })
        .collect();
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    for column in CANDIDATE_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(EngineError::engine(format!(
                "candidate table has no {} column",
                column.to_ascii_lowercase()
            )));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(malformed)?;
        let line = record.position().map_or(0, |p| p.line());
        let parsed: CandidateRecord = record.deserialize(Some(&headers)).map_err(malformed)?;
        let complexity = whole_complexity(parsed.complexity).ok_or_else(|| {
            EngineError::engine(format!(
                "candidate row on line {line}: invalid complexity {}",
                parsed.complexity
            ))
        })?;
        rows.push(CandidateModel {
            complexity,
            loss: parsed.loss,
            equation: parsed.equation,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetStore;
    use crate::job_config::{JobConfigBuilder, Operator, UnaryFunction};

    #[test]
    fn job_body_matches_engine_field_names() {
        let mut store = DatasetStore::new();
        store.load_csv("d.csv", "y,x1\n1,2\n3,\n").unwrap();
        let mut builder = JobConfigBuilder::new();
        builder.set_operators([Operator::Add, Operator::Mul]);
        builder.set_functions([UnaryFunction::Exp]);
        let spec = builder.build(&store).unwrap();

        let v = serde_json::to_value(JobBody::from(&spec)).unwrap();
        assert_eq!(v["output_variable"], "y");
        assert_eq!(v["input_variables"], serde_json::json!(["x1"]));
        assert_eq!(v["headers"], serde_json::json!(["y", "x1"]));
        assert_eq!(v["rows"], serde_json::json!([[1.0, 2.0], [3.0, null]]));
        assert_eq!(v["parameters"]["maxsize"], 30);
        assert_eq!(v["parameters"]["ncycles_per_iteration"], 380);
        assert_eq!(v["parameters"]["elementwise_loss"], "L2DistLoss()");
        assert_eq!(v["parameters"]["model_selection"], "best");
        assert_eq!(v["operators"], serde_json::json!(["+", "*"]));
        assert_eq!(v["functions"], serde_json::json!(["exp"]));
    }

    #[test]
    fn progress_status_tags_are_mapped() {
        let body: StatusBody =
            serde_json::from_str(r#"{"status":"done","message":"PySR complete!"}"#).unwrap();
        assert_eq!(
            body.into_progress(),
            ProgressReport::new(ProgressStatus::Done, "PySR complete!")
        );

        let body: StatusBody = serde_json::from_str(r#"{"status":"not started"}"#).unwrap();
        assert_eq!(body.into_progress().status, ProgressStatus::Idle);
    }

    #[test]
    fn evaluation_nulls_become_none() {
        let body: EvaluationBody = serde_json::from_str(
            r#"{"prediction":[1.0,null,3.5],"r2":0.9,"rmse":0.1,"nrmse":null}"#,
        )
        .unwrap();
        let r = body.into_result("x1 + 1");
        assert_eq!(r.predictions, vec![Some(1.0), None, Some(3.5)]);
        assert_eq!(r.metrics.r2, Some(0.9));
        assert_eq!(r.metrics.nrmse, None);
    }

    #[test]
    fn candidate_table_is_decoded() {
        let csv = "Complexity,Loss,Equation\n1,2.5,x1\n5,0.25,\"(x1 + x2) * 0.5\"\n";
        let rows = parse_candidates_csv(csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].complexity, 5);
        assert_eq!(rows[1].loss, 0.25);
        assert_eq!(rows[1].equation, "(x1 + x2) * 0.5");
    }

    #[test]
    fn empty_candidate_table_is_empty() {
        assert!(parse_candidates_csv("").unwrap().is_empty());
        assert!(parse_candidates_csv("Complexity,Loss,Equation\n")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn malformed_candidate_rows_are_engine_errors() {
        let err = parse_candidates_csv("Complexity,Loss,Equation\nabc,1,x\n").unwrap_err();
        assert!(!err.is_network());
        assert!(err.to_string().starts_with("malformed candidate table"));

        let err = parse_candidates_csv("a,b\n1,2\n").unwrap_err();
        assert_eq!(err.to_string(), "candidate table has no complexity column");
    }

    #[test]
    fn headers_match_in_any_case_and_order() {
        let rows = parse_candidates_csv("equation,extra,LOSS,complexity\nx1,?,0.5,3\n").unwrap();
        assert_eq!(rows[0].complexity, 3);
        assert_eq!(rows[0].loss, 0.5);
        assert_eq!(rows[0].equation, "x1");
    }

    #[test]
    fn complexity_must_be_a_whole_u32() {
        let rows = parse_candidates_csv("Complexity,Loss,Equation\n7.0,1,x1\n").unwrap();
        assert_eq!(rows[0].complexity, 7);
        for bad in ["-3", "2.7", "1e12", "inf"] {
            let csv = format!("Complexity,Loss,Equation\n1,1,x1\n{bad},1,x2\n");
            let err = parse_candidates_csv(&csv).unwrap_err();
            assert!(!err.is_network());
            assert!(
                err.to_string().starts_with("candidate row on line 3: invalid complexity"),
                "{bad}: {err}"
            );
        }
    }
}
