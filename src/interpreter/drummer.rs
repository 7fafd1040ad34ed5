//! Percussion domain: per-voice grids grouped into beats.

use super::action::{Action, kinds};
use super::ast::Call;
use super::engine::{Context, Domain};
use super::value::{Value, number_to_json};
use super::{InterpreterError, Result};
use crate::theory::{
    DRUM_MAP, GridSettings, NoteEvent, TheoryError, TheoryResult, drum_note, grid_events,
    validate_grid,
};

const METHODS: &[&str] = &["pattern", "beat"];

const DEFAULT_VELOCITY: usize = 100;
const DEFAULT_SUBDIVISION: usize = 16;
const MAX_SUBDIVISION: usize = 64;
const MAX_BARS: usize = 1024;

/// Method table for drum programming.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrummerDomain;

impl Domain for DrummerDomain {
    fn name(&self) -> &'static str {
        "drummer"
    }

    fn methods(&self) -> &'static [&'static str] {
        METHODS
    }

    fn apply(&self, cx: &mut Context<'_>, call: &Call) -> Result<()> {
        match call.name.as_str() {
            "pattern" => {
                let action = pattern(call)?;
                cx.emit(action);
                Ok(())
            }
            "beat" => beat(cx, call),
            other => Err(InterpreterError::UnknownMethod {
                domain: "drummer",
                call: other.to_string(),
            }),
        }
    }

    /// Grid hits of every pattern, sorted by start. Patterns use the settings
    /// of the closest preceding `drum_beat`; each new beat starts after the
    /// previous one's bars.
    fn payload(&self, actions: &[Action]) -> TheoryResult<Vec<NoteEvent>> {
        let mut settings = GridSettings::default();
        let mut offset = 0.0;
        let mut seen_pattern = false;
        let mut events = Vec::new();
        for action in actions {
            match action.kind.as_str() {
                kinds::DRUM_BEAT => {
                    if seen_pattern {
                        offset += f64::from(settings.bars.max(1)) * 4.0;
                        seen_pattern = false;
                    }
                    settings = beat_settings(action);
                }
                kinds::DRUM_PATTERN => {
                    seen_pattern = true;
                    let drum = action
                        .get_str("drum")
                        .ok_or_else(|| descriptor(action, "missing drum"))?;
                    let pitch = drum_note(drum).ok_or_else(|| TheoryError::UnknownDrum(drum.to_string()))?;
                    let grid = action
                        .get_str("grid")
                        .ok_or_else(|| descriptor(action, "missing grid"))?;
                    let velocity = action.get_f64("velocity").unwrap_or(DEFAULT_VELOCITY as f64);
                    let velocity = u8::try_from(velocity as i64)
                        .ok()
                        .filter(|v| (1..=127).contains(v))
                        .ok_or_else(|| descriptor(action, format!("velocity {velocity} is outside 1-127")))?;
                    events.extend(grid_events(grid, pitch, velocity, settings)?.into_iter().map(
                        |mut event| {
                            event.start += offset;
                            event
                        },
                    ));
                }
                _ => {}
            }
        }
        events.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));
        Ok(events)
    }
}

fn descriptor(action: &Action, reason: impl Into<String>) -> TheoryError {
    TheoryError::InvalidDescriptor {
        descriptor: action.kind.clone(),
        reason: reason.into(),
    }
}

fn beat_settings(action: &Action) -> GridSettings {
    let defaults = GridSettings::default();
    GridSettings {
        subdivision: action
            .get_f64("subdivision")
            .map_or(defaults.subdivision, |value| value as u32),
        swing: action.get_f64("swing").unwrap_or(defaults.swing),
        bars: action
            .get_f64("bars")
            .map_or(defaults.bars, |value| value as u32),
    }
}

/// `pattern(drum, grid, velocity=100, humanize=0)`.
fn pattern(call: &Call) -> Result<Action> {
    let drum = call.string(("drum", 0))?;
    if drum_note(drum).is_none() {
        let known: Vec<&str> = DRUM_MAP.iter().map(|(name, _)| *name).collect();
        return Err(call.invalid(
            "drum",
            format!("unknown drum '{drum}' (expected one of {})", known.join(", ")),
        ));
    }
    let grid = call.string(("grid", 1))?;
    if grid.trim().is_empty() {
        return Err(call.invalid("grid", "grid is empty"));
    }
    validate_grid(grid).map_err(|err| call.invalid("grid", err.to_string()))?;
    let velocity = call.opt_count("velocity")?.unwrap_or(DEFAULT_VELOCITY);
    if !(1..=127).contains(&velocity) {
        return Err(call.invalid("velocity", format!("{velocity} is outside 1-127")));
    }
    let humanize = call.opt_number("humanize")?.unwrap_or(0.0);
    if !(0.0..=1.0).contains(&humanize) {
        return Err(call.invalid("humanize", "must be between 0 and 1"));
    }
    Ok(Action::new(kinds::DRUM_PATTERN)
        .with("drum", drum)
        .with("grid", grid)
        .with("velocity", velocity)
        .with("humanize", number_to_json(humanize)))
}

/// `beat(patterns=[pattern(..), ..], bars=1, tempo?, swing=0, subdivision=16)`.
fn beat(cx: &mut Context<'_>, call: &Call) -> Result<()> {
    let items = call.array(("patterns", 0))?;
    if items.is_empty() {
        return Err(call.invalid("patterns", "a beat needs at least one pattern"));
    }
    let bars = call.opt_count("bars")?.unwrap_or(1);
    if bars == 0 || bars > MAX_BARS {
        return Err(call.invalid("bars", format!("must be between 1 and {MAX_BARS}")));
    }
    let tempo = call.opt_number("tempo")?;
    if matches!(tempo, Some(bpm) if bpm <= 0.0) {
        return Err(call.invalid("tempo", "must be positive"));
    }
    let swing = call.opt_number("swing")?.unwrap_or(0.0);
    if !(0.0..=100.0).contains(&swing) {
        return Err(call.invalid("swing", "must be between 0 and 100"));
    }
    let subdivision = call.opt_count("subdivision")?.unwrap_or(DEFAULT_SUBDIVISION);
    if subdivision == 0 || subdivision > MAX_SUBDIVISION {
        return Err(call.invalid("subdivision", format!("must be between 1 and {MAX_SUBDIVISION}")));
    }

    let mut patterns = Vec::with_capacity(items.len());
    for item in items {
        let Value::Function(func) = item else {
            return Err(InterpreterError::TypeMismatch {
                call: call.name.clone(),
                param: "patterns".into(),
                expected: "function",
                found: item.kind(),
            });
        };
        let nested = func.to_call();
        if nested.name != "pattern" {
            return Err(call.invalid("patterns", format!("expected pattern(..), got {}(..)", nested.name)));
        }
        patterns.push(pattern(&nested)?);
    }

    cx.emit(
        Action::new(kinds::DRUM_BEAT)
            .with("bars", bars)
            .with_opt("tempo", tempo.map(number_to_json))
            .with("swing", number_to_json(swing))
            .with("subdivision", subdivision),
    );
    for action in patterns {
        cx.emit(action);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{Interpreter, Snapshot};
    use serde_json::json;

    fn run(source: &str) -> Vec<Action> {
        Interpreter::new(DrummerDomain)
            .interpret(source, &Snapshot::default())
            .expect("interpret")
            .actions
    }

    fn fails(source: &str) -> InterpreterError {
        Interpreter::new(DrummerDomain)
            .interpret(source, &Snapshot::default())
            .expect_err("should fail")
    }

    #[test]
    fn standalone_pattern() {
        let actions = run(r#"pattern(drum="kick", grid="x---x---x---x---")"#);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, kinds::DRUM_PATTERN);
        assert_eq!(actions[0].get("velocity"), Some(&json!(100)));
        assert_eq!(actions[0].get("humanize"), Some(&json!(0)));
    }

    #[test]
    fn beat_emits_settings_then_patterns() {
        let actions = run(
            r#"beat(patterns=[pattern("kick", "x---x---x---x---"), pattern("snare", "----x-------x---", velocity=110)], bars=2, tempo=124, swing=20)"#,
        );
        let kinds: Vec<&str> = actions.iter().map(|a| a.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![kinds::DRUM_BEAT, kinds::DRUM_PATTERN, kinds::DRUM_PATTERN]
        );
        assert_eq!(actions[0].get("bars"), Some(&json!(2)));
        assert_eq!(actions[0].get("tempo"), Some(&json!(124)));
        assert_eq!(actions[0].get("subdivision"), Some(&json!(16)));
        assert_eq!(actions[2].get("velocity"), Some(&json!(110)));
    }

    #[test]
    fn unknown_drum_is_invalid() {
        let err = fails(r#"pattern("cymbal", "x---")"#);
        assert!(matches!(err, InterpreterError::InvalidArgument { ref param, .. } if param == "drum"));
    }

    #[test]
    fn bad_grid_character_is_invalid() {
        let err = fails(r#"pattern("kick", "x-.-")"#);
        assert!(matches!(err, InterpreterError::InvalidArgument { ref param, .. } if param == "grid"));
    }

    #[test]
    fn beat_without_patterns_is_invalid() {
        let err = fails("beat(patterns=[])");
        assert!(matches!(err, InterpreterError::InvalidArgument { ref param, .. } if param == "patterns"));
    }

    #[test]
    fn beat_rejects_foreign_calls() {
        let err = fails(r#"beat([arpeggio("Em")])"#);
        assert!(matches!(err, InterpreterError::InvalidArgument { .. }));
    }

    #[test]
    fn payload_repeats_over_bars_and_sorts() {
        let actions = run(
            r#"beat([pattern("snare", "----x-------x---"), pattern("kick", "x---x---x---x---")], bars=2)"#,
        );
        let events = DrummerDomain.payload(&actions).expect("payload");
        assert_eq!(events.len(), 12);
        assert_eq!(events[0].pitch, 36);
        assert_eq!(events[1].start, 1.0);
        assert_eq!(events[1].pitch, 36);
        assert_eq!(events[2].pitch, 38);
        assert!(events.windows(2).all(|pair| pair[0].start <= pair[1].start));
        assert_eq!(events.last().map(|e| e.start), Some(7.0));
    }
}
