//! Job configuration builder.
//!
//! Collects search parameters and the enabled operator/function sets, and
//! snapshots them together with the current dataset and selection into an
//! immutable [`JobSpec`].

use crate::dataset::{Dataset, DatasetStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    L1,
    L2,
}

impl LossKind {
    /// Engine-side loss expression.
    pub fn wire_name(self) -> &'static str {
        match self {
            LossKind::L1 => "L1DistLoss()",
            LossKind::L2 => "L2DistLoss()",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelSelection {
    Accuracy,
    Score,
    Best,
}

impl ModelSelection {
    pub fn wire_name(self) -> &'static str {
        match self {
            ModelSelection::Accuracy => "accuracy",
            ModelSelection::Score => "score",
            ModelSelection::Best => "best",
        }
    }
}

/// Binary arithmetic operators the search may use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum Operator {
    #[value(name = "+", alias = "add")]
    #[serde(rename = "+")]
    Add,
    #[value(name = "-", alias = "sub")]
    #[serde(rename = "-")]
    Sub,
    #[value(name = "*", alias = "mul")]
    #[serde(rename = "*")]
    Mul,
    #[value(name = "/", alias = "div")]
    #[serde(rename = "/")]
    Div,
}

impl Operator {
    pub const ALL: [Operator; 4] = [Operator::Add, Operator::Sub, Operator::Mul, Operator::Div];

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }
}

/// Unary functions the search may use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum UnaryFunction {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
}

impl UnaryFunction {
    pub const ALL: [UnaryFunction; 5] = [
        UnaryFunction::Sin,
        UnaryFunction::Cos,
        UnaryFunction::Tan,
        UnaryFunction::Exp,
        UnaryFunction::Log,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UnaryFunction::Sin => "sin",
            UnaryFunction::Cos => "cos",
            UnaryFunction::Tan => "tan",
            UnaryFunction::Exp => "exp",
            UnaryFunction::Log => "log",
        }
    }
}

/// Numeric and enum search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    pub max_size: u32,
    pub iterations: u32,
    pub populations: u32,
    pub population_size: u32,
    pub cycles_per_iteration: u32,
    pub loss: LossKind,
    pub model_selection: ModelSelection,
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            max_size: 30,
            iterations: 100,
            populations: 31,
            population_size: 27,
            cycles_per_iteration: 380,
            loss: LossKind::L2,
            model_selection: ModelSelection::Best,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("no dataset loaded")]
    NoDataset,
    #[error("no output variable selected")]
    NoOutput,
    #[error("no input variables selected")]
    NoInputs,
}

/// Snapshot of everything the engine needs for one job. Never mutated after
/// it is built; a new submission builds a new one.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub output: String,
    pub inputs: Vec<String>,
    pub dataset: Arc<Dataset>,
    pub parameters: JobParameters,
    pub operators: Vec<Operator>,
    pub functions: Vec<UnaryFunction>,
}

impl JobSpec {
    /// Human-readable lines describing the submitted configuration.
    pub fn describe(&self) -> Vec<String> {
        let p = &self.parameters;
        let ops: Vec<&str> = self.operators.iter().map(|o| o.symbol()).collect();
        let fns: Vec<&str> = self.functions.iter().map(|f| f.name()).collect();
        vec![
            format!(
                "Parameters: maxsize = {}, niterations = {}, populations = {}, population_size = {}, ncycles_per_iteration = {}, elementwise_loss = {}, model_selection = {}",
                p.max_size,
                p.iterations,
                p.populations,
                p.population_size,
                p.cycles_per_iteration,
                p.loss.wire_name(),
                p.model_selection.wire_name()
            ),
            format!("Operators: {}", ops.join(", ")),
            format!("Functions: {}", fns.join(", ")),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct JobConfigBuilder {
    parameters: JobParameters,
    operators: BTreeSet<Operator>,
    functions: BTreeSet<UnaryFunction>,
}

impl Default for JobConfigBuilder {
    fn default() -> Self {
        Self {
            parameters: JobParameters::default(),
            operators: Operator::ALL.into_iter().collect(),
            functions: UnaryFunction::ALL.into_iter().collect(),
        }
    }
}

impl JobConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: JobParameters) {
        self.parameters = parameters;
    }

    pub fn set_operators(&mut self, operators: impl IntoIterator<Item = Operator>) {
        self.operators = operators.into_iter().collect();
    }

    pub fn set_functions(&mut self, functions: impl IntoIterator<Item = UnaryFunction>) {
        self.functions = functions.into_iter().collect();
    }

    /// Returns whether the operator is enabled afterwards.
    pub fn toggle_operator(&mut self, op: Operator) -> bool {
        if !self.operators.remove(&op) {
            self.operators.insert(op);
            return true;
        }
        false
    }

    pub fn toggle_function(&mut self, f: UnaryFunction) -> bool {
        if !self.functions.remove(&f) {
            self.functions.insert(f);
            return true;
        }
        false
    }

    pub fn build(&self, store: &DatasetStore) -> Result<JobSpec, BuildError> {
        let dataset = store.dataset().ok_or(BuildError::NoDataset)?.clone();
        let selection = store.selection();
        let output = selection.output.clone().ok_or(BuildError::NoOutput)?;
        let inputs: Vec<String> = selection
            .inputs
            .iter()
            .filter(|c| **c != output)
            .cloned()
            .collect();
        if inputs.is_empty() {
            return Err(BuildError::NoInputs);
        }
        Ok(JobSpec {
            output,
            inputs,
            dataset,
            parameters: self.parameters,
            operators: self.operators.iter().copied().collect(),
            functions: self.functions.iter().copied().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DatasetStore {
        let mut store = DatasetStore::new();
        store.load_csv("d.csv", "y,x1,x2\n1,2,3\n4,5,6\n").unwrap();
        store
    }

    #[test]
    fn defaults_enable_everything() {
        let spec = JobConfigBuilder::new().build(&store()).unwrap();
        assert_eq!(spec.output, "y");
        assert_eq!(spec.inputs, ["x1", "x2"]);
        assert_eq!(spec.operators, Operator::ALL);
        assert_eq!(spec.functions, UnaryFunction::ALL);
        assert_eq!(spec.parameters, JobParameters::default());
    }

    #[test]
    fn toggles_flip_membership() {
        let mut b = JobConfigBuilder::new();
        assert!(!b.toggle_operator(Operator::Div));
        assert!(!b.toggle_function(UnaryFunction::Tan));
        assert!(b.toggle_function(UnaryFunction::Tan));
        let spec = b.build(&store()).unwrap();
        assert_eq!(spec.operators, [Operator::Add, Operator::Sub, Operator::Mul]);
        assert_eq!(spec.functions.len(), 5);
    }

    #[test]
    fn build_requires_dataset_output_and_inputs() {
        let b = JobConfigBuilder::new();
        assert_eq!(b.build(&DatasetStore::new()).unwrap_err(), BuildError::NoDataset);

        let mut s = store();
        s.select_no_inputs();
        assert_eq!(b.build(&s).unwrap_err(), BuildError::NoInputs);
    }

    #[test]
    fn spec_is_a_snapshot() {
        let mut s = store();
        let spec = JobConfigBuilder::new().build(&s).unwrap();
        s.set_output("x1").unwrap();
        assert_eq!(spec.output, "y");
        assert_eq!(spec.inputs, ["x1", "x2"]);
    }

    #[test]
    fn describe_lists_enabled_sets() {
        let mut b = JobConfigBuilder::new();
        b.set_operators([Operator::Add]);
        b.set_functions([UnaryFunction::Exp, UnaryFunction::Sin]);
        let lines = b.build(&store()).unwrap().describe();
        assert!(lines[0].contains("maxsize = 30"));
        assert!(lines[0].contains("L2DistLoss()"));
        assert_eq!(lines[1], "Operators: +");
        assert_eq!(lines[2], "Functions: sin, exp");
    }
}
