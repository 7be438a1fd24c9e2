//! Core types for the provider gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request for chat completion.
///
/// Sampling parameters left as `None` are omitted from the outbound body so
/// the provider applies its own default.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Provider model identifier, e.g. "openai/gpt-4o-mini".
    pub model: String,
    /// Messages in the conversation.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Nucleus sampling probability mass.
    pub top_p: Option<f64>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
        }
    }

    pub fn temperature(mut self, t: Option<f64>) -> Self {
        self.temperature = t;
        self
    }

    pub fn top_p(mut self, p: Option<f64>) -> Self {
        self.top_p = p;
        self
    }

    pub fn max_tokens(mut self, max: Option<u32>) -> Self {
        self.max_tokens = max;
        self
    }
}

/// Response from chat completion.
///
/// The body is kept as parsed JSON; reading text out of it is the caller's
/// job, so a surprising shape never fails the call itself.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Parsed response body.
    pub raw: Value,
    /// Provider request ID (x-request-id header), if sent.
    pub request_id: Option<String>,
    /// Time taken for the request.
    pub latency: Duration,
}
