//! CSV sink for the result set.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use crate::executor::OutputRecord;

#[derive(Debug, thiserror::Error)]
#[error("failed to write {records} in-memory records to {path}: {source}")]
pub struct SinkError {
    pub path: PathBuf,
    pub records: usize,
    #[source]
    pub source: std::io::Error,
}

/// Union of record keys in first-appearance order.
pub fn columns(records: &[OutputRecord]) -> Vec<String> {
    let mut cols: Vec<String> = Vec::new();
    for record in records {
        for key in record.fields.keys() {
            if !cols.iter().any(|c| c == key) {
                cols.push(key.clone());
            }
        }
    }
    cols
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_line<W: Write>(out: &mut W, cells: impl Iterator<Item = String>) -> std::io::Result<()> {
    let line = cells
        .map(|c| escape_csv_field(&c))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(out, "{line}")
}

/// Render the whole table: header row, then one row per record. Missing
/// cells are empty.
pub fn render_csv<W: Write>(records: &[OutputRecord], out: &mut W) -> std::io::Result<()> {
    let cols = columns(records);
    write_line(out, cols.iter().cloned())?;
    for record in records {
        write_line(
            out,
            cols.iter()
                .map(|c| record.fields.get(c).map(render_value).unwrap_or_default()),
        )?;
    }
    Ok(())
}

fn write_then_rename(records: &[OutputRecord], tmp: &Path, path: &Path) -> std::io::Result<()> {
    let mut out = BufWriter::new(fs::File::create(tmp)?);
    render_csv(records, &mut out)?;
    out.flush()?;
    drop(out);
    fs::rename(tmp, path)
}

/// Write all records to `path` in one go: a temporary sibling is written
/// and then renamed over the target. Returns the number of rows written.
pub fn write_csv(records: &[OutputRecord], path: &Path) -> Result<usize, SinkError> {
    let tmp = path.with_extension("csv.tmp");
    if let Err(source) = write_then_rename(records, &tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(SinkError {
            path: path.to_path_buf(),
            records: records.len(),
            source,
        });
    }

    info!(path = %path.display(), rows = records.len(), "results written");
    Ok(records.len())
}
