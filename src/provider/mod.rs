//! Content providers: the LLM boundary.
//!
//! A provider turns a [`ProviderRequest`] (instructions, user input, and an
//! output constraint) into text, either in one shot or as a stream of
//! [`StreamEvent`]s. [`OpenAiProvider`] talks to the Responses API;
//! [`ScriptedProvider`] replays canned outputs for tests and offline runs.

/// OpenAI Responses API client.
pub mod openai;
/// Table-driven provider for tests and replay.
pub mod scripted;

pub use openai::OpenAiProvider;
pub use scripted::{Script, ScriptedProvider};

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Convenience result alias for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Stream of provider events.
pub type ProviderStream = BoxStream<'static, ProviderResult<StreamEvent>>;

/// Errors raised at the provider boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No API key was configured.
    #[error("no API key configured (set CADENZA_API_KEY or OPENAI_API_KEY)")]
    MissingApiKey,

    /// Transport-level failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("provider returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The provider reported an error event.
    #[error("provider error: {0}")]
    Remote(String),

    /// The response did not have the expected shape.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// The call did not complete within the configured timeout.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// A scripted provider had nothing for the requested key.
    #[error("no scripted response for `{0}`")]
    Unscripted(String),

    /// A scripted failure.
    #[error("scripted failure: {0}")]
    Scripted(String),

    /// JSON encoding or decoding failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Conversation role of an input message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions from the application.
    Developer,
    /// End-user text.
    User,
    /// Earlier model output.
    Assistant,
}

/// One input message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who said it.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl Message {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// A developer message.
    pub fn developer(content: impl Into<String>) -> Self {
        Self {
            role: Role::Developer,
            content: content.into(),
        }
    }
}

/// Constraint on the shape of the model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputFormat {
    /// Free text.
    Text,
    /// Output produced through a grammar-constrained custom tool.
    Grammar {
        /// Tool name.
        tool_name: String,
        /// Tool description shown to the model.
        description: String,
        /// Grammar syntax (`lark`).
        syntax: String,
        /// Grammar source.
        definition: String,
    },
    /// JSON output validated against a schema.
    JsonSchema {
        /// Schema name.
        name: String,
        /// JSON schema.
        schema: JsonValue,
    },
}

impl OutputFormat {
    /// Tool or schema name, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Text => None,
            Self::Grammar { tool_name, .. } => Some(tool_name),
            Self::JsonSchema { name, .. } => Some(name),
        }
    }
}

/// One provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Model identifier.
    pub model: String,
    /// System-level instructions.
    pub instructions: String,
    /// Input messages.
    pub input: Vec<Message>,
    /// Output constraint.
    pub output: OutputFormat,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Completion tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Sum of both.
    #[serde(default)]
    pub total_tokens: u64,
}

/// Result of a one-shot provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Model that answered.
    pub model: String,
    /// Output text (DSL, JSON, or prose depending on the format).
    pub text: String,
    /// Token usage when reported.
    pub usage: Option<Usage>,
}

/// Incremental provider output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chunk of output text.
    Delta(String),
    /// The response finished; `text` is the complete output.
    Completed {
        /// Complete output text.
        text: String,
        /// Token usage when reported.
        usage: Option<Usage>,
    },
}

/// The LLM boundary.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Provider name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Generate the complete output.
    async fn generate(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse>;

    /// Generate incrementally. The default yields the one-shot output as a
    /// single delta followed by completion.
    async fn stream(&self, request: &ProviderRequest) -> ProviderResult<ProviderStream> {
        let response = self.generate(request).await?;
        let events = vec![
            Ok(StreamEvent::Delta(response.text.clone())),
            Ok(StreamEvent::Completed {
                text: response.text,
                usage: response.usage,
            }),
        ];
        Ok(stream::iter(events).boxed())
    }
}

/// Connection and model settings for a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Base URL of the API, e.g. `https://api.openai.com/v1`.
    pub endpoint: String,
    /// API key; never written back to disk by `write_config`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model used by the DSL generators.
    pub model: String,
    /// Smaller model used by the fallback classifier.
    pub classifier_model: String,
    /// Sampling temperature, when the model accepts one.
    pub temperature: Option<f32>,
    /// Output token cap.
    pub max_output_tokens: Option<u32>,
    /// Reasoning effort for reasoning models (`none`, `low`, `medium`, `high`).
    pub reasoning_effort: Option<String>,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-5.1".into(),
            classifier_model: "gpt-4.1-mini".into(),
            temperature: None,
            max_output_tokens: None,
            reasoning_effort: Some("none".into()),
            timeout_secs: 60,
        }
    }
}

impl ProviderSettings {
    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
