//! Row sources: where questions come from.
//!
//! A source yields raw rows as ordered JSON objects; [`prepare_rows`] then
//! applies the question filter, re-indexing and the optional cap. Any
//! failure here is fatal to the run and happens before a request is issued.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

pub const QUESTION_FIELD: &str = "question";

pub const DEFAULT_DATASET: &str = "amphora/suhak-full";
pub const DEFAULT_DATASET_CONFIG: &str = "default";
pub const DEFAULT_SPLIT: &str = "train";
pub const DEFAULT_DATASETS_SERVER_URL: &str = "https://datasets-server.huggingface.co";

/// The datasets-server caps `length` at 100 rows per page.
const HUB_PAGE_SIZE: usize = 100;

pub type RawRow = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum RowSourceError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("dataset server returned HTTP {status}: {message}")]
    Hub { status: u16, message: String },
    #[error("dataset server response malformed: {0}")]
    Malformed(String),
    #[error("hub token is not a valid header value")]
    InvalidToken,
}

/// One question row after filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    /// Contiguous position after filtering, starting at 0.
    pub index: usize,
    pub question: String,
    /// Every source column, `question` included, in source order.
    pub fields: RawRow,
}

#[async_trait]
pub trait RowSource: Send + Sync {
    async fn load(&self) -> Result<Vec<RawRow>, RowSourceError>;
}

/// Drop rows without a question, re-index, and cap to `max_questions`.
pub fn prepare_rows(raw: Vec<RawRow>, max_questions: Option<usize>) -> Vec<InputRow> {
    let total = raw.len();
    let mut rows: Vec<InputRow> = raw
        .into_iter()
        .filter_map(|fields| {
            let question = question_text(fields.get(QUESTION_FIELD)?)?;
            Some((question, fields))
        })
        .enumerate()
        .map(|(index, (question, fields))| InputRow {
            index,
            question,
            fields,
        })
        .collect();

    let kept = rows.len();
    if let Some(cap) = max_questions {
        rows.truncate(cap);
    }
    info!(
        total,
        with_question = kept,
        selected = rows.len(),
        "rows prepared"
    );
    rows
}

fn question_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// =============================================================================
// FILE SOURCE
// =============================================================================

/// Local JSON Lines file, or a file holding one JSON array of objects.
#[derive(Debug, Clone)]
pub struct FileRowSource {
    path: PathBuf,
}

impl FileRowSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse_error(&self, line: usize, message: impl Into<String>) -> RowSourceError {
        RowSourceError::Parse {
            path: self.path.clone(),
            line,
            message: message.into(),
        }
    }

    fn parse(&self, text: &str) -> Result<Vec<RawRow>, RowSourceError> {
        if text.trim_start().starts_with('[') {
            let values: Vec<Value> =
                serde_json::from_str(text).map_err(|e| self.parse_error(e.line(), e.to_string()))?;
            return values
                .into_iter()
                .enumerate()
                .map(|(i, v)| match v {
                    Value::Object(map) => Ok(map),
                    _ => Err(self.parse_error(0, format!("element {i} is not an object"))),
                })
                .collect();
        }

        let mut rows = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(map)) => rows.push(map),
                Ok(_) => return Err(self.parse_error(line_no, "row is not a JSON object")),
                Err(e) => return Err(self.parse_error(line_no, e.to_string())),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl RowSource for FileRowSource {
    async fn load(&self) -> Result<Vec<RawRow>, RowSourceError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| RowSourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        let rows = self.parse(&text)?;
        info!(path = %self.path.display(), rows = rows.len(), "loaded rows from file");
        Ok(rows)
    }
}

// =============================================================================
// HUB SOURCE
// =============================================================================

/// Hugging Face dataset read through the datasets-server `/rows` API.
#[derive(Debug, Clone)]
pub struct HubRowSource {
    client: reqwest::Client,
    base_url: String,
    dataset: String,
    config: String,
    split: String,
}

#[derive(Deserialize)]
struct RowsPage {
    rows: Vec<PageRow>,
    num_rows_total: usize,
}

#[derive(Deserialize)]
struct PageRow {
    #[serde(default)]
    row_idx: Option<usize>,
    row: RawRow,
    /// Columns the server cut short; such a row is not the real row.
    #[serde(default)]
    truncated_cells: Vec<String>,
}

impl HubRowSource {
    pub fn new(
        base_url: impl Into<String>,
        dataset: impl Into<String>,
        config: impl Into<String>,
        split: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, RowSourceError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| RowSourceError::InvalidToken)?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dataset: dataset.into(),
            config: config.into(),
            split: split.into(),
        })
    }

    /// Read `HF_TOKEN` and `HF_DATASETS_SERVER_URL` from the environment.
    pub fn from_env(
        dataset: impl Into<String>,
        config: impl Into<String>,
        split: impl Into<String>,
    ) -> Result<Self, RowSourceError> {
        let base_url = std::env::var("HF_DATASETS_SERVER_URL")
            .unwrap_or_else(|_| DEFAULT_DATASETS_SERVER_URL.into());
        let token = std::env::var("HF_TOKEN").ok();
        Self::new(base_url, dataset, config, split, token)
    }

    async fn fetch_page(&self, offset: usize) -> Result<RowsPage, RowSourceError> {
        let offset_s = offset.to_string();
        let length_s = HUB_PAGE_SIZE.to_string();
        let response = self
            .client
            .get(format!("{}/rows", self.base_url))
            .query(&[
                ("dataset", self.dataset.as_str()),
                ("config", self.config.as_str()),
                ("split", self.split.as_str()),
                ("offset", offset_s.as_str()),
                ("length", length_s.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(RowSourceError::Hub {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| RowSourceError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RowSource for HubRowSource {
    async fn load(&self) -> Result<Vec<RawRow>, RowSourceError> {
        let mut rows = Vec::new();
        loop {
            let offset = rows.len();
            let page = self.fetch_page(offset).await?;
            let fetched = page.rows.len();
            for (i, r) in page.rows.into_iter().enumerate() {
                if !r.truncated_cells.is_empty() {
                    return Err(RowSourceError::Malformed(format!(
                        "row {} has truncated cells: {}",
                        r.row_idx.unwrap_or(offset + i),
                        r.truncated_cells.join(", ")
                    )));
                }
                rows.push(r.row);
            }
            debug!(offset = rows.len(), total = page.num_rows_total, "fetched rows page");

            if rows.len() >= page.num_rows_total {
                break;
            }
            if fetched == 0 {
                return Err(RowSourceError::Malformed(format!(
                    "empty page at offset {} of {}",
                    rows.len(),
                    page.num_rows_total
                )));
            }
        }
        info!(
            dataset = %self.dataset,
            split = %self.split,
            rows = rows.len(),
            "loaded rows from hub"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> RawRow {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn prepare_drops_null_and_missing_questions() {
        let raw = vec![
            row(json!({"id": 0, "question": "a"})),
            row(json!({"id": 1, "question": null})),
            row(json!({"id": 2})),
            row(json!({"id": 3, "question": "b"})),
        ];
        let rows = prepare_rows(raw, None);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 0);
        assert_eq!(rows[1].index, 1);
        assert_eq!(rows[1].question, "b");
        assert_eq!(rows[1].fields["id"], json!(3));
    }

    #[test]
    fn prepare_keeps_field_order() {
        let raw = vec![row(json!({"z": 1, "question": "q", "a": 2}))];
        let rows = prepare_rows(raw, None);
        let keys: Vec<&str> = rows[0].fields.keys().map(String::as_str).collect();
        assert_eq!(keys, ["z", "question", "a"]);
    }

    #[test]
    fn prepare_renders_non_string_questions() {
        let rows = prepare_rows(vec![row(json!({"question": 42}))], None);
        assert_eq!(rows[0].question, "42");
    }

    #[test]
    fn jsonl_and_array_files_parse_alike() {
        let src = FileRowSource::new("rows");
        let lines = src
            .parse("{\"question\":\"a\"}\n\n{\"question\":\"b\",\"x\":1}\n")
            .unwrap();
        let array = src
            .parse("[{\"question\":\"a\"},{\"question\":\"b\",\"x\":1}]")
            .unwrap();
        assert_eq!(lines, array);
    }

    #[test]
    fn jsonl_reports_bad_line_number() {
        let src = FileRowSource::new("rows.jsonl");
        let err = src.parse("{\"question\":\"a\"}\n[1,2]\n").unwrap_err();
        match err {
            RowSourceError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
