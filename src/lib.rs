#![forbid(unsafe_code)]

//! # generation-harness
//!
//! Sample a chat model over a question dataset. Each question is sent
//! `repeats` times with a fixed number of requests in flight, the generated
//! text is merged back into the question's row together with the sampling
//! parameters, and the whole result set is written as one CSV per model.

pub mod config;
pub mod dataset;
pub mod executor;
pub mod gateway;
pub mod pipeline;
pub mod sink;

pub use config::{output_path, sanitize_model_id, ConfigError, RunConfig, SamplingParams};
pub use dataset::{prepare_rows, FileRowSource, HubRowSource, InputRow, RowSource, RowSourceError};
pub use executor::{BatchExecutor, ExecutorError, FailurePolicy, OutputRecord};
pub use gateway::{ChatGateway, OpenRouterAdapter, ProviderError};
pub use pipeline::{run, RunError, RunSummary};
