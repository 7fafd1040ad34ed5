//! Musical-content domain: arpeggios, chords, and progressions.
//!
//! Calls describe *what* to play; [`ArrangerDomain::payload`] turns the
//! resulting actions into positioned note events, each descriptor starting
//! where the previous one ended.

use serde_json::Value as JsonValue;

use super::action::{Action, kinds};
use super::ast::Call;
use super::engine::{Context, Domain};
use super::value::{Value, number_to_json};
use super::{InterpreterError, Result};
use crate::theory::chord::invert;
use crate::theory::{
    ArpeggioDirection, NoteEvent, NoteShape, TheoryError, TheoryResult, arpeggio_events,
    block_chord_events, progression_events, resolve_symbol_to_pitches,
};

const METHODS: &[&str] = &[
    "arpeggio",
    "chord",
    "progression",
    "composition",
    "add_arpeggio",
    "add_chord",
    "add_progression",
    "choice",
];

const DEFAULT_LENGTH: f64 = 4.0;
const DEFAULT_VELOCITY: usize = 100;
const DEFAULT_OCTAVE: usize = 4;
const MAX_OCTAVE: usize = 9;
const MAX_REPEAT: usize = 256;

/// Method table for musical content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrangerDomain;

impl Domain for ArrangerDomain {
    fn name(&self) -> &'static str {
        "arranger"
    }

    fn methods(&self) -> &'static [&'static str] {
        METHODS
    }

    fn apply(&self, cx: &mut Context<'_>, call: &Call) -> Result<()> {
        match call.name.as_str() {
            "arpeggio" | "add_arpeggio" => {
                let action = arpeggio(call)?;
                cx.emit(action);
                Ok(())
            }
            "chord" | "add_chord" => {
                let action = chord(call)?;
                cx.emit(action);
                Ok(())
            }
            "progression" | "add_progression" => {
                let action = progression(call)?;
                cx.emit(action);
                Ok(())
            }
            "composition" => Ok(()),
            "choice" => self.choice(cx, call),
            other => Err(InterpreterError::UnknownMethod {
                domain: "arranger",
                call: other.to_string(),
            }),
        }
    }

    fn payload(&self, actions: &[Action]) -> TheoryResult<Vec<NoteEvent>> {
        let mut cursor = 0.0;
        let mut events = Vec::new();
        for action in actions {
            let (notes, span) = match action.kind.as_str() {
                kinds::ARPEGGIO => arpeggio_notes(action, cursor)?,
                kinds::CHORD => chord_notes(action, cursor)?,
                kinds::PROGRESSION => progression_notes(action, cursor)?,
                _ => continue,
            };
            events.extend(notes);
            cursor += span;
        }
        Ok(events)
    }
}

impl ArrangerDomain {
    /// `choice(description, [call, ...])`: interpret each nested content call.
    fn choice(&self, cx: &mut Context<'_>, call: &Call) -> Result<()> {
        let items = call.array(("calls", 1))?;
        for item in items {
            let Value::Function(func) = item else {
                return Err(InterpreterError::TypeMismatch {
                    call: call.name.clone(),
                    param: "calls".into(),
                    expected: "function",
                    found: item.kind(),
                });
            };
            let nested = func.to_call();
            if nested.name == "choice" || !METHODS.contains(&nested.name.as_str()) {
                return Err(InterpreterError::UnknownMethod {
                    domain: "arranger",
                    call: nested.name,
                });
            }
            self.apply(cx, &nested)?;
        }
        Ok(())
    }
}

/// Shared timing and dynamics arguments.
struct Common {
    length: f64,
    repeat: usize,
    velocity: usize,
    octave: usize,
}

fn common(call: &Call, default_length: f64) -> Result<Common> {
    let length = call.opt_number("length")?.unwrap_or(default_length);
    if length <= 0.0 {
        return Err(call.invalid("length", "must be positive"));
    }
    let repeat = call.opt_count("repeat")?.unwrap_or(1);
    if repeat == 0 || repeat > MAX_REPEAT {
        return Err(call.invalid("repeat", format!("must be between 1 and {MAX_REPEAT}")));
    }
    let velocity = call.opt_count("velocity")?.unwrap_or(DEFAULT_VELOCITY);
    if !(1..=127).contains(&velocity) {
        return Err(call.invalid("velocity", format!("{velocity} is outside 1-127")));
    }
    let octave = call.opt_count("octave")?.unwrap_or(DEFAULT_OCTAVE);
    if octave > MAX_OCTAVE {
        return Err(call.invalid("octave", format!("{octave} is above {MAX_OCTAVE}")));
    }
    Ok(Common {
        length,
        repeat,
        velocity,
        octave,
    })
}

impl Common {
    fn apply_to(&self, action: Action) -> Action {
        action
            .with("length", number_to_json(self.length))
            .with("repeat", self.repeat)
            .with("velocity", self.velocity)
            .with("octave", self.octave)
    }
}

/// Validate a symbol and split `Em/G` into `("Em", Some("G"))`.
fn symbol<'c>(call: &'c Call, param: &str, text: &'c str, octave: usize) -> Result<(&'c str, Option<&'c str>)> {
    resolve_symbol_to_pitches(text, octave as i32).map_err(|err| call.invalid(param, err.to_string()))?;
    Ok(match text.split_once('/') {
        Some((chord, bass)) => (chord.trim(), Some(bass.trim())),
        None => (text.trim(), None),
    })
}

fn arpeggio(call: &Call) -> Result<Action> {
    let common = common(call, DEFAULT_LENGTH)?;
    let text = call.string(("symbol", 0))?;
    let (chord, bass) = symbol(call, "symbol", text, common.octave)?;
    let direction = call.opt_string("direction")?.unwrap_or("up");
    if ArpeggioDirection::parse(direction).is_none() {
        return Err(call.invalid("direction", format!("'{direction}' is not up, down, or updown")));
    }
    let note_duration = call.opt_number("note_duration")?;
    if matches!(note_duration, Some(duration) if duration <= 0.0) {
        return Err(call.invalid("note_duration", "must be positive"));
    }
    let action = Action::new(kinds::ARPEGGIO)
        .with("chord", chord)
        .with_opt("bass", bass);
    Ok(common
        .apply_to(action)
        .with("direction", direction)
        .with_opt("note_duration", note_duration.map(number_to_json)))
}

fn chord(call: &Call) -> Result<Action> {
    let common = common(call, DEFAULT_LENGTH)?;
    let text = call.string(("symbol", 0))?;
    let (chord, bass) = symbol(call, "symbol", text, common.octave)?;
    let inversion = call.opt_count("inversion")?.unwrap_or(0);
    if inversion > 3 {
        return Err(call.invalid("inversion", "at most 3"));
    }
    let action = Action::new(kinds::CHORD)
        .with("chord", chord)
        .with_opt("bass", bass);
    Ok(common.apply_to(action).with("inversion", inversion))
}

fn progression(call: &Call) -> Result<Action> {
    let items = call.array(("chords", 0))?;
    if items.is_empty() {
        return Err(call.invalid("chords", "needs at least one chord"));
    }
    let common = common(call, DEFAULT_LENGTH * items.len() as f64)?;
    let mut chords = Vec::with_capacity(items.len());
    for item in items {
        let Some(text) = item.as_str() else {
            return Err(InterpreterError::TypeMismatch {
                call: call.name.clone(),
                param: "chords".into(),
                expected: "string",
                found: item.kind(),
            });
        };
        symbol(call, "chords", text, common.octave)?;
        chords.push(JsonValue::from(text.trim()));
    }
    Ok(common.apply_to(Action::new(kinds::PROGRESSION).with("chords", chords)))
}

fn descriptor(action: &Action, reason: impl Into<String>) -> TheoryError {
    TheoryError::InvalidDescriptor {
        descriptor: action.kind.clone(),
        reason: reason.into(),
    }
}

fn shape(action: &Action, start: f64) -> TheoryResult<NoteShape> {
    let length = action
        .get_f64("length")
        .ok_or_else(|| descriptor(action, "missing length"))?;
    let repeat = action.get_f64("repeat").unwrap_or(1.0).max(1.0) as usize;
    let velocity = action.get_f64("velocity").unwrap_or(DEFAULT_VELOCITY as f64);
    let velocity = u8::try_from(velocity as i64)
        .ok()
        .filter(|v| (1..=127).contains(v))
        .ok_or_else(|| descriptor(action, format!("velocity {velocity} is outside 1-127")))?;
    Ok(NoteShape {
        length,
        repeat,
        velocity,
        start,
    })
}

fn octave(action: &Action) -> i32 {
    action.get_f64("octave").unwrap_or(DEFAULT_OCTAVE as f64) as i32
}

fn full_symbol(action: &Action) -> TheoryResult<String> {
    let chord = action
        .get_str("chord")
        .ok_or_else(|| descriptor(action, "missing chord"))?;
    Ok(match action.get_str("bass") {
        Some(bass) => format!("{chord}/{bass}"),
        None => chord.to_string(),
    })
}

fn arpeggio_notes(action: &Action, start: f64) -> TheoryResult<(Vec<NoteEvent>, f64)> {
    let shape = shape(action, start)?;
    let pitches = resolve_symbol_to_pitches(&full_symbol(action)?, octave(action))?;
    let direction = action
        .get_str("direction")
        .and_then(ArpeggioDirection::parse)
        .unwrap_or_default();
    let events = arpeggio_events(&pitches, direction, action.get_f64("note_duration"), shape);
    let span = events
        .last()
        .map(|last| last.end() - start)
        .unwrap_or(shape.length * shape.repeat as f64);
    Ok((events, span))
}

fn chord_notes(action: &Action, start: f64) -> TheoryResult<(Vec<NoteEvent>, f64)> {
    let shape = shape(action, start)?;
    let mut pitches = resolve_symbol_to_pitches(&full_symbol(action)?, octave(action))?;
    let inversion = action.get_f64("inversion").unwrap_or(0.0) as usize;
    if inversion > 0 {
        let bass = action.get("bass").map(|_| pitches.remove(0));
        pitches = invert(&pitches, inversion);
        if let Some(bass) = bass {
            pitches.insert(0, bass);
        }
    }
    Ok((
        block_chord_events(&pitches, shape),
        shape.length * shape.repeat as f64,
    ))
}

fn progression_notes(action: &Action, start: f64) -> TheoryResult<(Vec<NoteEvent>, f64)> {
    let shape = shape(action, start)?;
    let octave = octave(action);
    let symbols = action
        .get("chords")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| descriptor(action, "missing chords"))?;
    let mut chords = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol
            .as_str()
            .ok_or_else(|| descriptor(action, "chords must be strings"))?;
        chords.push(resolve_symbol_to_pitches(symbol, octave)?);
    }
    Ok((
        progression_events(&chords, shape),
        shape.length * shape.repeat as f64,
    ))
}
