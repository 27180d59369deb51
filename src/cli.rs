use crate::engine::{EngineApi, HttpEngine};
use crate::evaluator::EvaluateError;
use crate::job_config::{JobParameters, LossKind, ModelSelection, Operator, UnaryFunction};
use crate::model::{CandidateModel, EngineConfig, JobEvent, JobState, TerminalKind};
use crate::orchestrator::{process_job_completion, OrchestratorError};
use crate::session::Session;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// Which candidate to score once the job has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluateTarget {
    /// Lowest loss in the final table.
    Best,
    /// Zero-based row of the final table.
    Row(usize),
}

impl FromStr for EvaluateTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("best") {
            return Ok(EvaluateTarget::Best);
        }
        s.parse::<usize>()
            .map(EvaluateTarget::Row)
            .map_err(|_| format!("expected a row number or `best`, got `{s}`"))
    }
}

impl EvaluateTarget {
    fn pick(self, rows: &[CandidateModel]) -> Option<&CandidateModel> {
        match self {
            EvaluateTarget::Row(i) => rows.get(i),
            EvaluateTarget::Best => rows.iter().min_by(|a, b| a.loss.total_cmp(&b.loss)),
        }
    }
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "symreg-cli",
    version,
    about = "Run a symbolic-regression job on a remote engine and collect its candidate models"
)]
pub struct Cli {
    /// Base URL of the symbolic-regression engine
    #[arg(long, default_value = "http://localhost:5000")]
    pub base_url: String,

    /// Print the job report as JSON instead of a text summary
    #[arg(long)]
    pub json: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Cadence of the progress and candidate polls
    #[arg(long, default_value = "1s")]
    pub poll_interval: humantime::Duration,

    /// Per-request deadline; 0s disables it
    #[arg(long, default_value = "30s")]
    pub request_timeout: humantime::Duration,

    /// CSV dataset with a header row
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Output column (default: first column)
    #[arg(long)]
    pub output: Option<String>,

    /// Input columns, comma separated (default: every other column)
    #[arg(long, value_delimiter = ',')]
    pub inputs: Option<Vec<String>>,

    /// Maximum expression size
    #[arg(long, default_value_t = JobParameters::default().max_size)]
    pub max_size: u32,

    /// Number of search iterations
    #[arg(long, default_value_t = JobParameters::default().iterations)]
    pub iterations: u32,

    /// Number of populations
    #[arg(long, default_value_t = JobParameters::default().populations)]
    pub populations: u32,

    /// Individuals per population
    #[arg(long, default_value_t = JobParameters::default().population_size)]
    pub population_size: u32,

    /// Mutation cycles per iteration
    #[arg(long, default_value_t = JobParameters::default().cycles_per_iteration)]
    pub cycles_per_iteration: u32,

    /// Elementwise loss
    #[arg(long, value_enum, default_value = "l2")]
    pub loss: LossKind,

    /// Policy for choosing the reported best model
    #[arg(long, value_enum, default_value = "best")]
    pub model_selection: ModelSelection,

    /// Enabled binary operators, comma separated (default: all)
    #[arg(long, value_enum, value_delimiter = ',')]
    pub operators: Option<Vec<Operator>>,

    /// Enabled unary functions, comma separated (default: all)
    #[arg(long, value_enum, value_delimiter = ',')]
    pub functions: Option<Vec<UnaryFunction>>,

    /// Score one candidate after the job: a row number or `best`
    #[arg(long)]
    pub evaluate: Option<EvaluateTarget>,

    /// Export the final candidate table as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,

    /// Export the job report as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,
}

/// Build an `EngineConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> EngineConfig {
    let timeout = Duration::from(args.request_timeout);
    EngineConfig {
        base_url: args.base_url.clone(),
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: (!timeout.is_zero()).then_some(timeout),
        user_agent: format!("symreg-cli/{}", env!("CARGO_PKG_VERSION")),
    }
}

pub fn build_parameters(args: &Cli) -> JobParameters {
    JobParameters {
        max_size: args.max_size,
        iterations: args.iterations,
        populations: args.populations,
        population_size: args.population_size,
        cycles_per_iteration: args.cycles_per_iteration,
        loss: args.loss,
        model_selection: args.model_selection,
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }
    let Some(data) = args.data.clone() else {
        return Err(anyhow::anyhow!("--data <csv> is required"));
    };

    let cfg = build_config(&args);
    let api: Arc<dyn EngineApi> = Arc::new(HttpEngine::new(&cfg)?);
    let silent = args.silent;

    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<JobEvent>();
    let log_tx = out_tx.clone();
    let printer = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            if silent {
                continue;
            }
            match ev {
                JobEvent::Log(line) => {
                    let _ = log_tx.send(OutputLine::Stderr(line));
                }
                JobEvent::Candidates { rows } => {
                    let _ = log_tx.send(OutputLine::Stderr(format!("Candidates: {rows} rows")));
                }
                JobEvent::StateChanged { .. } | JobEvent::Progress(_) => {}
            }
        }
    });

    let mut session = Session::new(api, cfg.poll_interval, evt_tx);
    let outcome = drive_job(&args, &data, &mut session).await;

    let report = session.report(&cfg.base_url);
    drop(session);
    let _ = printer.await;
    let outcome = outcome.and_then(|()| match (&report.state, report.error.as_deref()) {
        (JobState::Terminal(TerminalKind::Error), Some(msg)) => {
            Err(anyhow::anyhow!("job failed: {msg}"))
        }
        _ => Ok(()),
    });

    // Nothing was submitted, so there is nothing to report.
    if report.state == JobState::Idle {
        drop(out_tx);
        let _ = out_handle.await;
        return outcome;
    }

    let processed = process_job_completion(&args, &report);
    if !silent {
        if args.json {
            let out = serde_json::to_string_pretty(&report)?;
            let _ = out_tx.send(OutputLine::Stdout(out));
        } else {
            for line in crate::text_summary::build_text_summary(&report).lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
        for msg in processed.export_messages {
            let _ = out_tx.send(OutputLine::Stderr(msg));
        }
        if let Some(p) = processed.auto_saved_path.as_ref() {
            let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    outcome
}

/// Load, configure, submit and wait for the job to settle. Ctrl-C stops a
/// running job instead of abandoning it.
async fn drive_job(args: &Cli, data: &Path, session: &mut Session) -> Result<()> {
    let raw = std::fs::read_to_string(data)
        .with_context(|| format!("failed to read {}", data.display()))?;
    let name = data
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| data.display().to_string());
    session
        .load_csv(&name, &raw)
        .await
        .with_context(|| format!("failed to parse {}", data.display()))?;

    if let Some(output) = args.output.as_deref() {
        session.set_output(output).context("invalid --output")?;
    }
    if let Some(inputs) = args.inputs.as_ref() {
        session.select_no_inputs();
        for column in inputs {
            session
                .toggle_input(column.trim())
                .with_context(|| format!("invalid input column {column}"))?;
        }
    }

    let config = session.config_mut();
    config.set_parameters(build_parameters(args));
    if let Some(ops) = args.operators.as_ref() {
        config.set_operators(ops.iter().copied());
    }
    if let Some(fns) = args.functions.as_ref() {
        config.set_functions(fns.iter().copied());
    }

    session.submit().await.context("failed to submit job")?;

    let orchestrator = session.orchestrator().clone();
    let settled = orchestrator.wait_settled();
    tokio::pin!(settled);
    let snapshot = loop {
        tokio::select! {
            snapshot = &mut settled => break snapshot?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                match session.stop().await {
                    Ok(()) => tracing::info!("stop requested"),
                    Err(OrchestratorError::Precondition(msg)) => tracing::warn!("{msg}"),
                    Err(e) => return Err(e.into()),
                }
            }
        }
    };

    if let Some(target) = args.evaluate {
        match target.pick(&snapshot.candidates) {
            Some(candidate) => match session.evaluate(candidate).await {
                Ok(_) | Err(EvaluateError::Superseded) => {}
                Err(e) => tracing::warn!(error = %e, "evaluation failed"),
            },
            None => tracing::warn!(?target, "no such candidate to evaluate"),
        }
    }
    Ok(())
}
