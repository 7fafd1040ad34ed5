//! Generators: one per capability, each pairing a content provider with the
//! interpreter for its DSL.
//!
//! A generator asks its provider for DSL text, interprets it against the
//! request's snapshot, and for content domains derives the positioned note
//! payload. Streaming generators forward actions as soon as a complete line of
//! DSL interprets cleanly.

/// Request-wide cancellation.
pub mod cancel;
/// The provider-backed DSL generator.
pub mod dsl;
/// Per-domain instructions and grammars.
pub mod prompts;

pub use cancel::CancelSignal;
pub use dsl::DslGenerator;
pub use prompts::{DomainPrompt, prompt_for};

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interpreter::{Action, InterpreterError, Notice, Snapshot};
use crate::provider::{ProviderError, Usage};
use crate::theory::{NoteEvent, TheoryError};

/// Convenience result alias for generator operations.
pub type Result<T> = std::result::Result<T, GeneratorError>;

/// What a generator contributes to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Creates and modifies containers (tracks, clips, effects).
    Daw,
    /// Chords, arpeggios, and progressions.
    Arranger,
    /// Drum grids.
    Drummer,
}

impl Capability {
    /// Every capability, structural first, content in merge order.
    pub const ALL: [Capability; 3] = [Capability::Daw, Capability::Arranger, Capability::Drummer];

    /// Lowercase name used in configuration and logs.
    pub fn name(self) -> &'static str {
        match self {
            Capability::Daw => "daw",
            Capability::Arranger => "arranger",
            Capability::Drummer => "drummer",
        }
    }

    /// Parse a lowercase name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cap| cap.name() == name)
    }

    /// Whether this capability creates containers.
    pub fn is_structural(self) -> bool {
        matches!(self, Capability::Daw)
    }

    /// Whether this capability produces attachable content.
    pub fn is_content(self) -> bool {
        !self.is_structural()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised by a generator. Every variant names its capability.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The provider call failed.
    #[error("{capability}: provider call failed: {source}")]
    Provider {
        /// Failing generator.
        capability: Capability,
        /// Underlying error.
        #[source]
        source: ProviderError,
    },

    /// The provider's DSL was rejected by the interpreter.
    #[error("{capability}: DSL rejected: {source}")]
    Interpret {
        /// Failing generator.
        capability: Capability,
        /// DSL text that was rejected.
        dsl: String,
        /// Underlying error.
        #[source]
        source: InterpreterError,
    },

    /// Interpreted content could not be rendered into notes.
    #[error("{capability}: content could not be rendered: {source}")]
    Payload {
        /// Failing generator.
        capability: Capability,
        /// Underlying error.
        #[source]
        source: TheoryError,
    },

    /// The request was cancelled before anything usable was produced.
    #[error("{capability}: cancelled")]
    Cancelled {
        /// Cancelled generator.
        capability: Capability,
    },

    /// The snapshot could not be rendered for the prompt.
    #[error("{capability}: snapshot encoding failed: {source}")]
    Snapshot {
        /// Failing generator.
        capability: Capability,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl GeneratorError {
    /// Capability that failed.
    pub fn capability(&self) -> Capability {
        match self {
            Self::Provider { capability, .. }
            | Self::Interpret { capability, .. }
            | Self::Payload { capability, .. }
            | Self::Cancelled { capability }
            | Self::Snapshot { capability, .. } => *capability,
        }
    }
}

/// What happened during one generator run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Generator capability.
    pub capability: Capability,
    /// Provider name.
    pub provider: String,
    /// Model used.
    pub model: String,
    /// DSL text as received.
    pub dsl: String,
    /// Token usage when reported.
    pub usage: Option<Usage>,
    /// Low-confidence interpretation outcomes.
    pub notices: Vec<Notice>,
    /// Wall-clock duration.
    pub elapsed_ms: u64,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
    /// Whether the run streamed its output.
    pub streamed: bool,
    /// Whether cancellation cut the run short.
    pub cancelled: bool,
}

/// Output of one generator run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratorResult {
    /// Generator capability.
    pub capability: Capability,
    /// Actions in interpretation order.
    pub actions: Vec<Action>,
    /// Positioned notes for content domains; empty for structural ones.
    pub payload: Vec<NoteEvent>,
    /// Run details.
    pub diagnostics: Diagnostics,
}

/// A capability-tagged producer of actions.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Capability this generator serves.
    fn capability(&self) -> Capability;

    /// Produce the complete result.
    async fn produce(
        &self,
        request: &str,
        snapshot: &Snapshot,
        cancel: &CancelSignal,
    ) -> Result<GeneratorResult>;

    /// Produce while forwarding each action to `sink` as soon as it is
    /// known. The default runs [`Generator::produce`] and forwards the
    /// actions afterwards.
    async fn produce_stream(
        &self,
        request: &str,
        snapshot: &Snapshot,
        cancel: &CancelSignal,
        sink: &mut (dyn FnMut(Action) + Send),
    ) -> Result<GeneratorResult> {
        let result = self.produce(request, snapshot, cancel).await?;
        for action in &result.actions {
            sink(action.clone());
        }
        Ok(result)
    }
}
