//! One run, end to end: rows → fan-out → CSV.
//!
//! ```bash
//! genharness --model openai/gpt-4o-mini --repeats 3 --concurrency 8
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, RunConfig};
use crate::dataset::{prepare_rows, RowSource, RowSourceError};
use crate::executor::{BatchExecutor, ExecutorError};
use crate::gateway::ChatGateway;
use crate::sink::{write_csv, SinkError};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("row source unavailable: {0}")]
    RowSource(#[from] RowSourceError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub output_path: PathBuf,
    pub rows_written: usize,
}

/// Validate, load rows, fan out, and persist. Nothing is requested if the
/// configuration, output directory or row source fails.
pub async fn run(
    gateway: Arc<dyn ChatGateway>,
    source: &dyn RowSource,
    config: RunConfig,
) -> Result<RunSummary, RunError> {
    let config = config.validate()?;

    std::fs::create_dir_all(&config.output_dir).map_err(|e| RunError::OutputDir {
        path: config.output_dir.clone(),
        source: e,
    })?;
    let output_path = config.output_path();

    let rows = prepare_rows(source.load().await?, config.max_questions);

    let executor = BatchExecutor::new(gateway, &config);
    let records = executor.run(&rows).await?;

    let rows_written = write_csv(&records, &output_path)?;
    info!(path = %output_path.display(), rows = rows_written, "run complete");

    Ok(RunSummary {
        output_path,
        rows_written,
    })
}
