//! Cadenza – natural-language music production requests turned into ordered
//! DAW actions.
//!
//! A request ("create a drum track with a four on the floor kick") flows
//! through:
//! - a two-tier classifier that picks the generators it needs
//! - concurrent generators, each asking a content provider for a small
//!   call-chain DSL and interpreting it against a session snapshot
//! - a merge step that orders structural actions before the content that
//!   attaches to them, optionally streaming actions as they become ready

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Configuration loading and environment overrides.
pub mod config;
/// Crate-level error types.
pub mod error;
/// Provider-backed DSL generators.
pub mod generator;
/// Call-chain parser, interpreter engine, and domain method tables.
pub mod interpreter;
/// Classification, concurrent generation, and merging.
pub mod orchestrator;
/// Content providers (OpenAI Responses API, scripted replay).
pub mod provider;
/// Chord symbols, arpeggios, and drum grids as note events.
pub mod theory;

// Re-export key types for convenience
pub use config::{CadenzaConfig, load_config, write_config};
pub use error::{CadenzaError, OrchestratorError, Result};
pub use generator::{CancelSignal, Capability, Generator, GeneratorResult};
pub use interpreter::{Action, Interpreter, Snapshot};
pub use orchestrator::{Orchestrator, OrchestratorResult};
pub use provider::{ContentProvider, OpenAiProvider, ScriptedProvider};

/// Current version of Cadenza
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
