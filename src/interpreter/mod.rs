//! Functional call-chain interpreter.
//!
//! DSL text emitted by a content provider (`track(id=1).set_name(name="Bass")`)
//! is parsed into statements of chained calls and interpreted against a
//! read-only [`Snapshot`], producing a flat list of [`Action`]s. The engine is
//! shared; each domain (structural `daw`, musical `arranger`, percussion
//! `drummer`) contributes only its whitelisted method table.

/// Flat action records handed to the host.
pub mod action;
/// Calls, statements, and strict argument accessors.
pub mod ast;
/// Chord, arpeggio, and progression methods.
pub mod arranger;
/// Track, clip, and effect methods.
pub mod daw;
/// Drum grid methods.
pub mod drummer;
/// Statement sequencing, collections, and filtering shared by all domains.
pub mod engine;
/// Hand-written recursive-descent parser.
pub mod parser;
/// Read-only snapshot of the host session.
pub mod snapshot;
/// Per-invocation mutable state.
pub mod state;
/// Argument values and structured predicates.
pub mod value;

pub use action::{Action, kinds};
pub use arranger::ArrangerDomain;
pub use ast::{Call, ParamSpec, Program, Statement};
pub use daw::DawDomain;
pub use drummer::DrummerDomain;
pub use engine::{Context, Domain, Interpretation, Interpreter, Target, iteration_variable};
pub use parser::parse_program;
pub use snapshot::{ClipState, Entity, EntityKind, FxState, Snapshot, TrackState};
pub use state::{InterpreterState, Notice};
pub use value::{Args, CompareOp, FunctionRef, Literal, ParamKey, Predicate, PropertyPath, Value};

use thiserror::Error;

/// Convenience result alias for interpreter operations.
pub type Result<T> = std::result::Result<T, InterpreterError>;

/// Errors surfaced by the parser and interpreter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InterpreterError {
    /// Parsing failed due to invalid syntax.
    #[error("invalid DSL syntax: {0}")]
    Syntax(String),

    /// Input contained no statements.
    #[error("empty DSL input")]
    EmptyInput,

    /// A reference (id, selection) did not resolve.
    #[error("{call}: unresolved reference {reference}")]
    UnresolvedReference {
        /// Call that made the reference.
        call: String,
        /// Reference as written.
        reference: String,
    },

    /// A property-chain call ran with no bound entity.
    #[error("{call}: no entity is bound")]
    NoContext {
        /// Offending call.
        call: String,
    },

    /// An argument had the wrong value kind.
    #[error("{call}: parameter `{param}` expects {expected}, got {found}")]
    TypeMismatch {
        /// Offending call.
        call: String,
        /// Parameter name.
        param: String,
        /// Expected value kind.
        expected: &'static str,
        /// Supplied value kind.
        found: &'static str,
    },

    /// A required argument was absent.
    #[error("{call}: missing parameter `{param}`")]
    MissingArgument {
        /// Offending call.
        call: String,
        /// Parameter name.
        param: String,
    },

    /// An argument had the right kind but an unusable value.
    #[error("{call}: invalid `{param}`: {reason}")]
    InvalidArgument {
        /// Offending call.
        call: String,
        /// Parameter name.
        param: String,
        /// What was wrong.
        reason: String,
    },

    /// A named collection does not exist.
    #[error("unknown collection `{collection}`")]
    UnknownCollection {
        /// Collection name as written.
        collection: String,
    },

    /// A call outside the domain's whitelist.
    #[error("`{call}` is not a {domain} DSL method")]
    UnknownMethod {
        /// Domain that rejected the call.
        domain: &'static str,
        /// Call name.
        call: String,
    },

    /// A predicate or receiver named a variable other than the iteration variable.
    #[error("{call}: variable `{variable}` is not bound")]
    UnboundVariable {
        /// Offending call.
        call: String,
        /// Variable as written.
        variable: String,
    },

    /// A collection operation was started inside another one.
    #[error("{call}: nested iteration is not supported")]
    NestedIteration {
        /// Offending call.
        call: String,
    },

    /// The program parsed but produced no actions.
    #[error("DSL produced no actions")]
    EmptyResult,
}
