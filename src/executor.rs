//! Bounded fan-out over (row × repeat) request units.
//!
//! Every unit future is created up front and polled from a single
//! `FuturesUnordered`, so the run is one cooperative task. A semaphore with
//! `concurrency` permits guards the outbound call only; extraction and merge
//! run after the permit is released.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::{RunConfig, SamplingParams};
use crate::dataset::{InputRow, RawRow};
use crate::gateway::{ChatGateway, ChatRequest, Message, ProviderError};

/// What to do when a unit's outbound call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// First failure ends the run; units still pending are dropped.
    #[default]
    Abort,
    /// Keep going; the failed unit yields a record with empty text and an
    /// `error` column.
    Record,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("request failed for question {question_index} run {run_index}: {source}")]
    Unit {
        question_index: usize,
        run_index: usize,
        #[source]
        source: ProviderError,
    },
    #[error("concurrency gate closed")]
    GateClosed,
}

/// One (row, repeat) pair; exactly one outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestUnit {
    pub question_index: usize,
    /// 1-based.
    pub run_index: usize,
}

/// Row-major cross product of `0..rows` × `1..=repeats`.
pub fn build_units(rows: usize, repeats: usize) -> Vec<RequestUnit> {
    (0..rows)
        .flat_map(|question_index| {
            (1..=repeats).map(move |run_index| RequestUnit {
                question_index,
                run_index,
            })
        })
        .collect()
}

/// Text read out of a provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    Malformed,
}

impl Extraction {
    pub fn into_text(self) -> String {
        match self {
            Extraction::Text(text) => text,
            Extraction::Malformed => String::new(),
        }
    }
}

/// `choices[0].message.content`, if it is a string.
pub fn extract_text(raw: &Value) -> Extraction {
    match raw.pointer("/choices/0/message/content") {
        Some(Value::String(text)) => Extraction::Text(text.clone()),
        _ => Extraction::Malformed,
    }
}

/// One row of the result set.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub question_index: usize,
    pub run_index: usize,
    /// Row fields followed by run metadata, in column order.
    pub fields: RawRow,
}

impl OutputRecord {
    pub fn generation(&self) -> &str {
        self.fields
            .get("generation")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Per-run executor. Owns the concurrency gate; nothing outlives the run.
pub struct BatchExecutor {
    gateway: Arc<dyn ChatGateway>,
    gate: Semaphore,
    model: String,
    system: Option<String>,
    sampling: SamplingParams,
    repeats: usize,
    policy: FailurePolicy,
}

impl BatchExecutor {
    pub fn new(gateway: Arc<dyn ChatGateway>, config: &RunConfig) -> Self {
        Self {
            gateway,
            gate: Semaphore::new(config.concurrency.max(1)),
            model: config.model.clone(),
            system: config.system.clone(),
            sampling: config.sampling,
            repeats: config.repeats,
            policy: config.on_error,
        }
    }

    /// Issue every unit and collect one record per unit, sorted by
    /// `(question_index, run_index)`.
    pub async fn run(&self, rows: &[InputRow]) -> Result<Vec<OutputRecord>, ExecutorError> {
        let units = build_units(rows.len(), self.repeats);
        let total = units.len();
        info!(
            rows = rows.len(),
            repeats = self.repeats,
            total,
            concurrency = self.gate.available_permits(),
            model = %self.model,
            "dispatching requests"
        );

        let mut pending: FuturesUnordered<_> = units
            .into_iter()
            .map(|unit| self.execute(&rows[unit.question_index], unit))
            .collect();

        let mut records = Vec::with_capacity(total);
        while let Some(outcome) = pending.next().await {
            let record = outcome?;
            records.push(record);
            info!(completed = records.len(), total, "progress");
        }

        records.sort_by_key(|r| (r.question_index, r.run_index));
        Ok(records)
    }

    async fn execute(
        &self,
        row: &InputRow,
        unit: RequestUnit,
    ) -> Result<OutputRecord, ExecutorError> {
        let request = self.request_for(row);

        let response = {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| ExecutorError::GateClosed)?;
            self.gateway.chat(&request).await
        };

        let q = unit.question_index;
        let r = unit.run_index;
        match response {
            Ok(resp) => {
                debug!(
                    q,
                    r,
                    latency_ms = resp.latency.as_millis() as u64,
                    request_id = resp.request_id.as_deref().unwrap_or("-"),
                    raw = %resp.raw,
                    "raw response"
                );
                let extraction = extract_text(&resp.raw);
                if extraction == Extraction::Malformed {
                    warn!(q, r, raw = %resp.raw, "no text in response; recording empty generation");
                }
                let text = extraction.into_text();
                debug!(q, r, text = %text, "output text");
                Ok(self.merge(row, unit, text, None))
            }
            Err(err) => match self.policy {
                FailurePolicy::Abort => {
                    error!(
                        q,
                        r,
                        code = err.code(),
                        request_id = err.request_id().unwrap_or("-"),
                        error = %err,
                        "request failed; aborting run"
                    );
                    Err(ExecutorError::Unit {
                        question_index: q,
                        run_index: r,
                        source: err,
                    })
                }
                FailurePolicy::Record => {
                    warn!(
                        q,
                        r,
                        code = err.code(),
                        request_id = err.request_id().unwrap_or("-"),
                        error = %err,
                        "request failed; recording sentinel"
                    );
                    Ok(self.merge(row, unit, String::new(), Some(err.to_string())))
                }
            },
        }
    }

    fn request_for(&self, row: &InputRow) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(&row.question));

        ChatRequest::new(&self.model, messages)
            .temperature(self.sampling.temperature)
            .top_p(self.sampling.top_p)
            .max_tokens(self.sampling.max_tokens)
    }

    fn merge(
        &self,
        row: &InputRow,
        unit: RequestUnit,
        generation: String,
        failure: Option<String>,
    ) -> OutputRecord {
        let mut fields = row.fields.clone();
        fields.insert("question_index".into(), json!(unit.question_index));
        fields.insert("run_index".into(), json!(unit.run_index));
        fields.insert("generation".into(), Value::String(generation));
        fields.insert("model".into(), Value::String(self.model.clone()));
        fields.insert("temperature".into(), json!(self.sampling.temperature));
        fields.insert("top_p".into(), json!(self.sampling.top_p));
        fields.insert("max_tokens".into(), json!(self.sampling.max_tokens));
        if self.policy == FailurePolicy::Record {
            fields.insert("error".into(), json!(failure));
        }

        OutputRecord {
            question_index: unit.question_index,
            run_index: unit.run_index,
            fields,
        }
    }
}
