//! Client for a remote symbolic-regression engine: dataset handling, job
//! configuration, the job lifecycle orchestrator and candidate evaluation.

pub mod cli;
pub mod dataset;
pub mod engine;
pub mod evaluator;
pub mod job_config;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod session;
pub mod storage;
pub mod text_summary;
