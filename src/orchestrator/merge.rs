//! Merging structural and content generator output into one action list.
//!
//! Structural actions pass through in generation order. Each content result
//! contributes its descriptive actions (tagged with the target track) after
//! every structural action, and its note payload as an `add_midi` attach
//! action: injected into an existing `add_midi` for the target, or
//! synthesized right after the last structural action touching the target.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::generator::{Capability, GeneratorResult};
use crate::interpreter::{Action, Snapshot, kinds};
use crate::theory::NoteEvent;

/// Merge output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Merged {
    /// Final action order.
    pub actions: Vec<Action>,
    /// Content capabilities whose payload had no container to attach to.
    pub unattached: Vec<Capability>,
}

/// Track that content should attach to.
///
/// The most recent structural `add_midi` wins, then the most recently created
/// or referenced track, then the snapshot's selected track, then its last
/// track.
pub fn resolve_target(structural: &[Action], snapshot: &Snapshot) -> Option<usize> {
    structural
        .iter()
        .rev()
        .find(|action| action.is_attach())
        .and_then(Action::target_track)
        .or_else(|| structural.iter().rev().find_map(Action::target_track))
        .or_else(|| snapshot.selected_track())
        .or_else(|| snapshot.last_track())
}

/// Encode a payload as the `notes` array of an attach action.
pub fn note_values(payload: &[NoteEvent]) -> Vec<JsonValue> {
    payload.iter().map(NoteEvent::to_json).collect()
}

/// Inject `payload` into `actions` for `target`, returning the position of the
/// attach action that received it.
///
/// Reuses the last `add_midi` for the target when there is one; otherwise
/// inserts a new one after the last action touching the target (or at the end
/// when nothing touches it).
pub fn attach(actions: &mut Vec<Action>, target: usize, payload: &[NoteEvent]) -> usize {
    if let Some(position) = actions
        .iter()
        .rposition(|action| action.is_attach() && action.target_track() == Some(target))
    {
        actions[position].append_notes(note_values(payload));
        return position;
    }
    let position = actions
        .iter()
        .rposition(|action| action.target_track() == Some(target))
        .map_or(actions.len(), |last| last + 1);
    let mut attach = Action::new(kinds::ADD_MIDI).with("track", target as u64);
    attach.append_notes(note_values(payload));
    actions.insert(position, attach);
    position
}

/// Tag a content action with its container.
pub fn tag(mut action: Action, target: Option<usize>) -> Action {
    if let Some(target) = target {
        action.set("track", target as u64);
    }
    action
}

/// Merge one structural action list with content results.
///
/// `contents` is processed in capability order regardless of the order given.
pub fn merge(structural: &[Action], contents: &[&GeneratorResult], snapshot: &Snapshot) -> Merged {
    let mut actions = structural.to_vec();
    let target = resolve_target(structural, snapshot);
    let mut ordered: Vec<&GeneratorResult> = contents.to_vec();
    ordered.sort_by_key(|result| result.capability);

    let mut unattached = Vec::new();
    for result in &ordered {
        if result.payload.is_empty() {
            continue;
        }
        match target {
            Some(target) => {
                let position = attach(&mut actions, target, &result.payload);
                debug!(
                    capability = %result.capability,
                    track = target,
                    position,
                    notes = result.payload.len(),
                    "attached content"
                );
            }
            None => {
                warn!(
                    capability = %result.capability,
                    notes = result.payload.len(),
                    "no container to attach content to"
                );
                unattached.push(result.capability);
            }
        }
    }

    for result in &ordered {
        actions.extend(result.actions.iter().cloned().map(|action| tag(action, target)));
    }
    Merged {
        actions,
        unattached,
    }
}

/// Whether every attach action comes after the creation of its target, when
/// that target is created in the same list.
pub fn attach_follows_creation(actions: &[Action]) -> bool {
    actions.iter().enumerate().all(|(position, action)| {
        if !action.is_attach() {
            return true;
        }
        match action.target_track() {
            Some(target) => !actions[position..]
                .iter()
                .any(|later| later.is(kinds::CREATE_TRACK) && later.target_track() == Some(target)),
            None => true,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Diagnostics;
    use chrono::Utc;

    fn content(capability: Capability, actions: Vec<Action>, pitches: &[u8]) -> GeneratorResult {
        GeneratorResult {
            capability,
            actions,
            payload: pitches
                .iter()
                .enumerate()
                .map(|(i, &pitch)| NoteEvent {
                    pitch,
                    velocity: 100,
                    start: i as f64,
                    duration: 1.0,
                })
                .collect(),
            diagnostics: Diagnostics {
                capability,
                provider: "test".into(),
                model: "test".into(),
                dsl: String::new(),
                usage: None,
                notices: Vec::new(),
                elapsed_ms: 0,
                completed_at: Utc::now(),
                streamed: false,
                cancelled: false,
            },
        }
    }

    fn create(index: u64) -> Action {
        Action::new(kinds::CREATE_TRACK).with("index", index)
    }

    #[test]
    fn injects_into_existing_add_midi() {
        let structural = vec![
            create(0),
            Action::new(kinds::ADD_MIDI).with("track", 0).with("notes", JsonValue::Array(vec![])),
            Action::new(kinds::SET_TRACK_NAME).with("track", 0).with("name", "Keys"),
        ];
        let arp = content(Capability::Arranger, vec![Action::new(kinds::ARPEGGIO)], &[52, 55, 59]);
        let merged = merge(&structural, &[&arp], &Snapshot::default());
        assert_eq!(merged.actions.len(), 4);
        assert_eq!(merged.actions[1].note_count(), 3);
        assert!(merged.actions[3].is(kinds::ARPEGGIO));
        assert_eq!(merged.actions[3].target_track(), Some(0));
        assert!(attach_follows_creation(&merged.actions));
    }

    #[test]
    fn synthesizes_after_last_action_for_target() {
        let structural = vec![
            create(0),
            create(1),
            Action::new(kinds::CREATE_CLIP).with("track", 1).with("position", 0.0),
        ];
        let beat = content(Capability::Drummer, vec![Action::new(kinds::DRUM_PATTERN)], &[36, 36]);
        let arp = content(Capability::Arranger, vec![Action::new(kinds::ARPEGGIO)], &[60]);
        let merged = merge(&structural, &[&beat, &arp], &Snapshot::default());
        let kinds_in_order: Vec<&str> = merged.actions.iter().map(|a| a.kind.as_str()).collect();
        assert_eq!(
            kinds_in_order,
            vec!["create_track", "create_track", "create_clip", "add_midi", "arpeggio", "drum_pattern"]
        );
        assert_eq!(merged.actions[3].target_track(), Some(1));
        assert_eq!(merged.actions[3].note_count(), 3);
    }

    #[test]
    fn falls_back_to_snapshot_selection() {
        let snapshot = Snapshot::from_json(
            r#"{"tracks": [{"name": "A"}, {"name": "B", "selected": true}, {"name": "C"}]}"#,
        )
        .expect("snapshot");
        let chord = content(Capability::Arranger, vec![Action::new(kinds::CHORD)], &[48, 52, 55]);
        let merged = merge(&[], &[&chord], &snapshot);
        assert_eq!(merged.actions[0].target_track(), Some(1));
        assert!(merged.actions[0].is_attach());
        assert!(merged.unattached.is_empty());
    }

    #[test]
    fn unattachable_content_still_returns_descriptions() {
        let chord = content(Capability::Arranger, vec![Action::new(kinds::CHORD)], &[48]);
        let merged = merge(&[], &[&chord], &Snapshot::default());
        assert_eq!(merged.actions, vec![Action::new(kinds::CHORD)]);
        assert_eq!(merged.unattached, vec![Capability::Arranger]);
    }
}
