#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use generation_harness::config::{RunConfig, SamplingParams, DEFAULT_CONCURRENCY};
use generation_harness::dataset::{
    FileRowSource, HubRowSource, RowSource, DEFAULT_DATASET, DEFAULT_DATASET_CONFIG,
    DEFAULT_SPLIT,
};
use generation_harness::executor::FailurePolicy;
use generation_harness::gateway::openrouter::DEFAULT_TIMEOUT;
use generation_harness::gateway::OpenRouterAdapter;

#[derive(Parser)]
#[command(
    name = "genharness",
    version,
    about = "Query every question in a dataset against one model and save the generations as CSV"
)]
struct Cli {
    /// Model identifier passed to the provider
    #[arg(long)]
    model: String,

    /// Optional system prompt sent before every question
    #[arg(long)]
    system: Option<String>,

    /// Sampling temperature; "none" leaves it to the provider
    #[arg(long, default_value = "1.0")]
    temperature: OptionalFloat,

    /// Nucleus sampling probability mass
    #[arg(long)]
    top_p: Option<f64>,

    /// Max tokens to generate
    #[arg(long)]
    max_tokens: Option<u32>,

    /// How many times to query each question
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    repeats: u64,

    /// Optional cap on number of questions to process
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    max_questions: Option<u64>,

    /// Maximum concurrent requests (values below 1 are treated as 1)
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY as i64, allow_negative_numbers = true)]
    concurrency: i64,

    /// Directory to save results; filename derived from model
    #[arg(long, default_value = "outputs")]
    output_dir: PathBuf,

    /// What a failed request does to the run
    #[arg(long, value_enum, default_value = "abort")]
    on_error: CliFailurePolicy,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Hugging Face dataset id
    #[arg(long, default_value = DEFAULT_DATASET)]
    dataset: String,

    /// Dataset config name
    #[arg(long, default_value = DEFAULT_DATASET_CONFIG)]
    dataset_config: String,

    /// Dataset split
    #[arg(long, default_value = DEFAULT_SPLIT)]
    split: String,

    /// Local JSON Lines or JSON array file to read instead of the hub dataset
    #[arg(long)]
    input: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// A float that may also be given as "none".
#[derive(Debug, Clone, Copy)]
struct OptionalFloat(Option<f64>);

impl FromStr for OptionalFloat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(Self(None));
        }
        s.parse::<f64>()
            .map(|v| Self(Some(v)))
            .map_err(|e| format!("expected a number or \"none\": {e}"))
    }
}

/// CLI-facing failure policy enum (clap::ValueEnum).
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliFailurePolicy {
    Abort,
    Record,
}

impl From<CliFailurePolicy> for FailurePolicy {
    fn from(p: CliFailurePolicy) -> Self {
        match p {
            CliFailurePolicy::Abort => FailurePolicy::Abort,
            CliFailurePolicy::Record => FailurePolicy::Record,
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            system: self.system.clone(),
            sampling: SamplingParams {
                temperature: self.temperature.0,
                top_p: self.top_p,
                max_tokens: self.max_tokens,
            },
            repeats: self.repeats as usize,
            max_questions: self.max_questions.map(|n| n as usize),
            concurrency: usize::try_from(self.concurrency.max(1)).unwrap_or(usize::MAX),
            output_dir: self.output_dir.clone(),
            on_error: self.on_error.into(),
            ..RunConfig::new(&self.model)
        }
    }

    fn row_source(&self) -> Result<Box<dyn RowSource>, Box<dyn std::error::Error>> {
        Ok(match &self.input {
            Some(path) => Box::new(FileRowSource::new(path)),
            None => Box::new(HubRowSource::from_env(
                &self.dataset,
                &self.dataset_config,
                &self.split,
            )?),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = cli.run_config().validate()?;
    let source = cli.row_source()?;
    let gateway = Arc::new(OpenRouterAdapter::from_env(Duration::from_secs(
        cli.timeout_secs,
    ))?);

    let summary = generation_harness::run(gateway, source.as_ref(), config).await?;
    println!(
        "Saved {} rows to {}",
        summary.rows_written,
        summary.output_path.display()
    );
    Ok(())
}
