//! Music theory helpers turning content descriptors into positioned notes.
//!
//! Chord symbols resolve to MIDI pitches with `C4 = 48`; drum grids resolve
//! through the General MIDI percussion map.

/// Chord symbol parsing and chord/arpeggio/progression note layout.
pub mod chord;
/// Drum names and grid notation.
pub mod drums;

pub use chord::{
    ArpeggioDirection, ChordSymbol, NoteShape, arpeggio_events, block_chord_events,
    progression_events, resolve_symbol_to_pitches,
};
pub use drums::{DRUM_MAP, GridSettings, drum_note, grid_events, validate_grid};

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

/// Convenience result alias for theory operations.
pub type TheoryResult<T> = std::result::Result<T, TheoryError>;

/// Errors raised while resolving musical descriptors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TheoryError {
    /// The chord symbol could not be parsed.
    #[error("invalid chord symbol '{symbol}': {reason}")]
    InvalidSymbol {
        /// Symbol as written.
        symbol: String,
        /// What was wrong.
        reason: String,
    },

    /// Every pitch of the chord fell outside the MIDI range.
    #[error("chord '{symbol}' has no pitches in MIDI range at octave {octave}")]
    NoPitches {
        /// Symbol as written.
        symbol: String,
        /// Requested octave.
        octave: i32,
    },

    /// Drum name outside the canonical kit.
    #[error("unknown drum '{0}'")]
    UnknownDrum(String),

    /// Grid contained a character other than `x X o -` or space.
    #[error("invalid grid character '{ch}' in \"{grid}\"")]
    InvalidGrid {
        /// Grid as written.
        grid: String,
        /// Offending character.
        ch: char,
    },

    /// A content descriptor was missing a field or carried a bad value.
    #[error("invalid {descriptor}: {reason}")]
    InvalidDescriptor {
        /// Descriptor kind (`arpeggio`, `drum_pattern`, ...).
        descriptor: String,
        /// What was wrong.
        reason: String,
    },
}

/// One positioned MIDI note. Times are in beats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI pitch, 0-127.
    pub pitch: u8,
    /// MIDI velocity, 1-127.
    pub velocity: u8,
    /// Start position in beats from the clip start.
    pub start: f64,
    /// Length in beats.
    pub duration: f64,
}

impl NoteEvent {
    /// JSON form used inside `add_midi` actions.
    pub fn to_json(&self) -> JsonValue {
        json!({
            "pitch": self.pitch,
            "velocity": self.velocity,
            "start": self.start,
            "duration": self.duration,
        })
    }

    /// End position in beats.
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}
