//! Structural domain: tracks, clips, and effects.

use serde_json::Value as JsonValue;

use super::action::{Action, kinds};
use super::ast::Call;
use super::engine::{Context, Domain, Target};
use super::snapshot::EntityKind;
use super::value::{Value, number_to_json};
use super::{InterpreterError, Result};

const METHODS: &[&str] = &[
    "track",
    "new_clip",
    "add_midi",
    "add_fx",
    "set_volume",
    "set_pan",
    "set_mute",
    "set_solo",
    "set_name",
    "set_selected",
    "delete",
    "delete_clip",
    "get_tracks",
    "get_fx_chain",
];

/// Default clip length in bars for `new_clip(bar=..)`.
const DEFAULT_LENGTH_BARS: usize = 4;
/// Default clip length in beats for `new_clip(position=..)`.
const DEFAULT_LENGTH_BEATS: f64 = 4.0;

/// Method table for track-level operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DawDomain;

impl Domain for DawDomain {
    fn name(&self) -> &'static str {
        "daw"
    }

    fn methods(&self) -> &'static [&'static str] {
        METHODS
    }

    fn apply(&self, cx: &mut Context<'_>, call: &Call) -> Result<()> {
        match call.name.as_str() {
            "track" => track(cx, call),
            "new_clip" => new_clip(cx, call),
            "add_midi" => add_midi(cx, call),
            "add_fx" => add_fx(cx, call),
            "set_volume" => {
                let volume = call.number(("volume_db", 0))?;
                set_property(cx, call, kinds::SET_TRACK_VOLUME, "volume_db", number_to_json(volume))
            }
            "set_pan" => {
                let pan = call.number(("pan", 0))?;
                set_property(cx, call, kinds::SET_TRACK_PAN, "pan", number_to_json(pan))
            }
            "set_mute" => {
                let mute = call.bool(("mute", 0))?;
                set_property(cx, call, kinds::SET_TRACK_MUTE, "mute", mute.into())
            }
            "set_solo" => {
                let solo = call.bool(("solo", 0))?;
                set_property(cx, call, kinds::SET_TRACK_SOLO, "solo", solo.into())
            }
            "set_name" => {
                let name = call.string(("name", 0))?;
                set_property(cx, call, kinds::SET_TRACK_NAME, "name", name.into())
            }
            "set_selected" => {
                let selected = call.bool(("selected", 0))?;
                set_property(cx, call, kinds::SET_TRACK_SELECTED, "selected", selected.into())
            }
            "delete" => {
                for target in track_targets(cx, call)? {
                    cx.emit(Action::new(kinds::DELETE_TRACK).with("track", target.track));
                }
                Ok(())
            }
            "delete_clip" => delete_clip(cx, call),
            "get_tracks" => {
                let tracks = cx.snapshot().track_entities();
                let state = cx.state_mut();
                state.store_collection("tracks", tracks);
                state.take_filtered();
                state.unbind();
                Ok(())
            }
            "get_fx_chain" => {
                let track = cx.bound(call)?;
                let fx = cx.snapshot().fx_entities(track);
                cx.state_mut().store_collection("fx_chain", fx);
                Ok(())
            }
            other => Err(InterpreterError::UnknownMethod {
                domain: "daw",
                call: other.to_string(),
            }),
        }
    }
}

/// `track(..)`: reference by id or selection, otherwise create.
fn track(cx: &mut Context<'_>, call: &Call) -> Result<()> {
    if let Some(id) = call.opt_count(("id", 0))? {
        cx.reference_entity(call, id)?;
        return Ok(());
    }
    if call.opt_bool("selected")? == Some(true) {
        cx.reference_selected(call)?;
        return Ok(());
    }
    let instrument = call.opt_string("instrument")?;
    let name = call.opt_string("name")?;
    let explicit = call.opt_count("index")?;
    let index = cx.create_entity(explicit);
    cx.emit(
        Action::new(kinds::CREATE_TRACK)
            .with("index", index)
            .with_opt("instrument", instrument)
            .with_opt("name", name),
    );
    Ok(())
}

fn new_clip(cx: &mut Context<'_>, call: &Call) -> Result<()> {
    if let Some(bar) = call.opt_count("bar")? {
        if bar == 0 {
            return Err(call.invalid("bar", "bars are 1-based"));
        }
        let length_bars = call.opt_count("length_bars")?.unwrap_or(DEFAULT_LENGTH_BARS);
        for target in cx.targets(call)? {
            cx.emit(
                Action::new(kinds::CREATE_CLIP_AT_BAR)
                    .with("track", target.track)
                    .with("bar", bar)
                    .with("length_bars", length_bars),
            );
        }
        return Ok(());
    }

    let position = match call.opt_number("position")? {
        Some(position) => position,
        None => call.opt_number("start")?.ok_or_else(|| {
            InterpreterError::MissingArgument {
                call: call.name.clone(),
                param: "bar|position".into(),
            }
        })?,
    };
    let length = call.opt_number("length")?.unwrap_or(DEFAULT_LENGTH_BEATS);
    for target in cx.targets(call)? {
        cx.emit(
            Action::new(kinds::CREATE_CLIP)
                .with("track", target.track)
                .with("position", number_to_json(position))
                .with("length", number_to_json(length)),
        );
    }
    Ok(())
}

fn add_midi(cx: &mut Context<'_>, call: &Call) -> Result<()> {
    let notes = call
        .opt_array("notes")?
        .map(|items| items.iter().map(Value::to_json).collect())
        .unwrap_or_default();
    let notes = JsonValue::Array(notes);
    for target in cx.targets(call)? {
        cx.emit(
            Action::new(kinds::ADD_MIDI)
                .with("track", target.track)
                .with("notes", notes.clone()),
        );
    }
    Ok(())
}

fn add_fx(cx: &mut Context<'_>, call: &Call) -> Result<()> {
    let (kind, fxname) = match call.opt_string(("fxname", 0))? {
        Some(fxname) => (kinds::ADD_TRACK_FX, fxname),
        None => match call.opt_string("instrument")? {
            Some(instrument) => (kinds::ADD_INSTRUMENT, instrument),
            None => {
                return Err(InterpreterError::MissingArgument {
                    call: call.name.clone(),
                    param: "fxname|instrument".into(),
                });
            }
        },
    };
    for target in cx.targets(call)? {
        cx.emit(
            Action::new(kind)
                .with("track", target.track)
                .with("fxname", fxname),
        );
    }
    Ok(())
}

fn set_property(
    cx: &mut Context<'_>,
    call: &Call,
    kind: &str,
    field: &str,
    value: JsonValue,
) -> Result<()> {
    for target in track_targets(cx, call)? {
        cx.emit(
            Action::new(kind)
                .with("track", target.track)
                .with(field, value.clone()),
        );
    }
    Ok(())
}

/// Targets for track-level setters. Filtered clips or effects are rejected
/// rather than resolved to their parent track.
fn track_targets(cx: &mut Context<'_>, call: &Call) -> Result<Vec<Target>> {
    let targets = cx.targets(call)?;
    if let Some(kind) = targets
        .iter()
        .filter_map(|target| target.entity.as_ref())
        .map(|entity| entity.kind)
        .find(|kind| *kind != EntityKind::Track)
    {
        return Err(call.invalid("target", format!("{} applies to tracks, not {}", call.name, kind.name())));
    }
    Ok(targets)
}

/// `delete_clip(clip|position|bar)`; against a filtered clip set, each
/// matched clip is deleted by index.
fn delete_clip(cx: &mut Context<'_>, call: &Call) -> Result<()> {
    let clip = call.opt_count("clip")?;
    let position = call.opt_number("position")?;
    let bar = call.opt_count("bar")?;
    for Target { track, entity } in cx.targets(call)? {
        let action = Action::new(kinds::DELETE_CLIP).with("track", track);
        let action = match (clip, position, bar, entity) {
            (Some(clip), _, _, _) => action.with("clip", clip),
            (None, Some(position), _, _) => action.with("position", number_to_json(position)),
            (None, None, Some(bar), _) => action.with("bar", bar),
            (None, None, None, Some(entity)) if entity.kind == EntityKind::Clip => {
                action.with("clip", entity.index)
            }
            _ => {
                return Err(InterpreterError::MissingArgument {
                    call: call.name.clone(),
                    param: "clip|position|bar".into(),
                });
            }
        };
        cx.emit(action);
    }
    Ok(())
}
