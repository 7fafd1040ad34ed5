use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Action kinds emitted by the built-in domains.
pub mod kinds {
    /// New track.
    pub const CREATE_TRACK: &str = "create_track";
    /// New clip at a bar position.
    pub const CREATE_CLIP_AT_BAR: &str = "create_clip_at_bar";
    /// New clip at a beat position.
    pub const CREATE_CLIP: &str = "create_clip";
    /// Attach MIDI content to a track.
    pub const ADD_MIDI: &str = "add_midi";
    /// Insert an effect.
    pub const ADD_TRACK_FX: &str = "add_track_fx";
    /// Insert an instrument.
    pub const ADD_INSTRUMENT: &str = "add_instrument";
    /// Fader change.
    pub const SET_TRACK_VOLUME: &str = "set_track_volume";
    /// Pan change.
    pub const SET_TRACK_PAN: &str = "set_track_pan";
    /// Mute toggle.
    pub const SET_TRACK_MUTE: &str = "set_track_mute";
    /// Solo toggle.
    pub const SET_TRACK_SOLO: &str = "set_track_solo";
    /// Rename.
    pub const SET_TRACK_NAME: &str = "set_track_name";
    /// Selection toggle.
    pub const SET_TRACK_SELECTED: &str = "set_track_selected";
    /// Remove a track.
    pub const DELETE_TRACK: &str = "delete_track";
    /// Remove a clip.
    pub const DELETE_CLIP: &str = "delete_clip";
    /// Arpeggiated chord.
    pub const ARPEGGIO: &str = "arpeggio";
    /// Sustained chord.
    pub const CHORD: &str = "chord";
    /// Chord sequence.
    pub const PROGRESSION: &str = "progression";
    /// Beat-level drum settings.
    pub const DRUM_BEAT: &str = "drum_beat";
    /// One drum voice's grid.
    pub const DRUM_PATTERN: &str = "drum_pattern";
}

/// A flat, behaviorless record describing one operation for the host.
///
/// Serializes as `{"kind": "...", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Operation kind, e.g. `create_track`.
    pub kind: String,
    /// Domain fields.
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl Action {
    /// Action with no fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Builder-style setter that skips `None`.
    pub fn with_opt<T: Into<JsonValue>>(mut self, key: &str, value: Option<T>) -> Self {
        if let Some(value) = value {
            self.set(key, value);
        }
        self
    }

    /// Set a field.
    pub fn set(&mut self, key: &str, value: impl Into<JsonValue>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Read a field.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    /// Read a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(JsonValue::as_str)
    }

    /// Read a numeric field.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(JsonValue::as_f64)
    }

    /// Whether this action is of the given kind.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Container the action creates or targets: the `index` of a
    /// `create_track`, otherwise the `track` field.
    pub fn target_track(&self) -> Option<usize> {
        let key = if self.is(kinds::CREATE_TRACK) {
            "index"
        } else {
            "track"
        };
        self.get(key)
            .and_then(JsonValue::as_u64)
            .map(|idx| idx as usize)
    }

    /// Whether the action attaches content to a container.
    pub fn is_attach(&self) -> bool {
        self.is(kinds::ADD_MIDI)
    }

    /// Append note events to an attach action's `notes` array.
    pub fn append_notes(&mut self, notes: impl IntoIterator<Item = JsonValue>) {
        let entry = self
            .fields
            .entry("notes".to_string())
            .or_insert_with(|| JsonValue::Array(Vec::new()));
        if !entry.is_array() {
            *entry = JsonValue::Array(Vec::new());
        }
        if let JsonValue::Array(existing) = entry {
            existing.extend(notes);
        }
    }

    /// Number of notes carried by an attach action.
    pub fn note_count(&self) -> usize {
        self.get("notes")
            .and_then(JsonValue::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_flat_with_kind() {
        let action = Action::new(kinds::SET_TRACK_NAME)
            .with("track", 0)
            .with("name", "Bass");
        assert_eq!(
            serde_json::to_value(&action).expect("json"),
            json!({"kind": "set_track_name", "track": 0, "name": "Bass"})
        );
    }

    #[test]
    fn create_track_targets_its_index() {
        let action = Action::new(kinds::CREATE_TRACK).with("index", 3);
        assert_eq!(action.target_track(), Some(3));
        let action = Action::new(kinds::ADD_MIDI).with("track", 1);
        assert_eq!(action.target_track(), Some(1));
    }

    #[test]
    fn append_notes_extends_existing_array() {
        let mut action = Action::new(kinds::ADD_MIDI)
            .with("track", 0)
            .with("notes", json!([{"pitch": 36}]));
        action.append_notes(vec![json!({"pitch": 38})]);
        assert_eq!(action.note_count(), 2);
    }
}
