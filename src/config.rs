//! Run configuration and output naming.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::executor::FailurePolicy;

pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_OUTPUT_DIR: &str = "outputs";

const OUTPUT_SUFFIX: &str = "_generations.csv";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--model must not be empty")]
    EmptyModel,
    #[error("--repeats must be >= 1")]
    ZeroRepeats,
    #[error("--max-questions must be >= 1")]
    ZeroMaxQuestions,
}

/// Sampling parameters forwarded to the provider and echoed into every record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: Some(DEFAULT_TEMPERATURE),
            top_p: None,
            max_tokens: None,
        }
    }
}

/// Everything one run needs, independent of where rows come from.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: String,
    pub system: Option<String>,
    pub sampling: SamplingParams,
    pub repeats: usize,
    pub max_questions: Option<usize>,
    pub concurrency: usize,
    pub output_dir: PathBuf,
    pub on_error: FailurePolicy,
}

impl RunConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            sampling: SamplingParams::default(),
            repeats: 1,
            max_questions: None,
            concurrency: DEFAULT_CONCURRENCY,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            on_error: FailurePolicy::default(),
        }
    }

    /// Reject configurations that cannot produce a run. Concurrency is
    /// clamped rather than rejected.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel);
        }
        if self.repeats == 0 {
            return Err(ConfigError::ZeroRepeats);
        }
        if self.max_questions == Some(0) {
            return Err(ConfigError::ZeroMaxQuestions);
        }
        self.concurrency = self.concurrency.max(1);
        Ok(self)
    }

    pub fn output_path(&self) -> PathBuf {
        output_path(&self.output_dir, &self.model)
    }
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]+").expect("static regex"))
}

/// Replace each run of characters outside `[A-Za-z0-9_.-]` with one `_`.
pub fn sanitize_model_id(model: &str) -> String {
    unsafe_chars().replace_all(model, "_").into_owned()
}

/// `<output_dir>/<sanitized-model>_generations.csv`
pub fn output_path(output_dir: &Path, model: &str) -> PathBuf {
    output_dir.join(format!("{}{OUTPUT_SUFFIX}", sanitize_model_id(model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filename_ok(name: &str) -> bool {
        Regex::new(r"^[A-Za-z0-9_.-]+_generations\.csv$")
            .unwrap()
            .is_match(name)
    }

    #[test]
    fn sanitize_replaces_runs_of_unsafe_chars() {
        assert_eq!(sanitize_model_id("openai/gpt-4o-mini"), "openai_gpt-4o-mini");
        assert_eq!(sanitize_model_id("a :: b"), "a_b");
        assert_eq!(sanitize_model_id("test-model"), "test-model");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for model in ["openai/gpt-4o", "weird name!!", "ünïcode/模型", "a..b", "/"] {
            let once = sanitize_model_id(model);
            assert_eq!(sanitize_model_id(&once), once, "model={model}");
        }
    }

    #[test]
    fn derived_filenames_are_always_safe() {
        for model in ["openai/gpt-4o", "weird name!!", "ünïcode/模型", "/", " ", "x"] {
            let path = output_path(Path::new("outputs"), model);
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(filename_ok(name), "model={model:?} name={name}");
        }
    }

    #[test]
    fn output_path_for_plain_model() {
        assert_eq!(
            output_path(Path::new("outputs"), "test-model"),
            PathBuf::from("outputs/test-model_generations.csv")
        );
    }

    #[test]
    fn defaults_match_cli() {
        let cfg = RunConfig::new("m");
        assert_eq!(cfg.sampling.temperature, Some(1.0));
        assert_eq!(cfg.sampling.top_p, None);
        assert_eq!(cfg.sampling.max_tokens, None);
        assert_eq!(cfg.repeats, 1);
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.output_dir, PathBuf::from("outputs"));
        assert_eq!(cfg.on_error, FailurePolicy::Abort);
    }

    #[test]
    fn validate_clamps_concurrency() {
        let mut cfg = RunConfig::new("m");
        cfg.concurrency = 0;
        assert_eq!(cfg.validate().unwrap().concurrency, 1);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert_eq!(
            RunConfig::new("  ").validate().unwrap_err(),
            ConfigError::EmptyModel
        );

        let mut cfg = RunConfig::new("m");
        cfg.repeats = 0;
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ZeroRepeats);

        let mut cfg = RunConfig::new("m");
        cfg.max_questions = Some(0);
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ZeroMaxQuestions);
    }
}
