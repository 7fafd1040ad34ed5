//! Read-only entity snapshot supplied by the caller.
//!
//! The snapshot describes the current session (tracks, their clips and
//! effects). Interpreters consult it to resolve references and to seed
//! the named collections that `filter` and friends operate on; it is
//! never mutated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::value::Value;

/// Current state of the host session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Tracks in display order.
    #[serde(default)]
    pub tracks: Vec<TrackState>,
}

/// One track of the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    /// 0-based index; defaults to the track's position when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Mute flag.
    #[serde(default)]
    pub muted: bool,
    /// Solo flag.
    #[serde(default)]
    pub soloed: bool,
    /// Selection flag.
    #[serde(default)]
    pub selected: bool,
    /// Fader level in dB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_db: Option<f64>,
    /// Pan position, -1.0 (left) to 1.0 (right).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pan: Option<f64>,
    /// Effects chain.
    #[serde(default)]
    pub fx: Vec<FxState>,
    /// Clips on the track.
    #[serde(default)]
    pub clips: Vec<ClipState>,
    /// Host-specific properties, usable in predicates.
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// One effect in a track's chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FxState {
    /// Plugin name.
    pub name: String,
    /// Whether the effect is active.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

/// One clip on a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipState {
    /// 0-based index within the track; defaults to position in the list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Start position in beats.
    #[serde(default)]
    pub position: f64,
    /// Length in beats.
    #[serde(default)]
    pub length: f64,
    /// Selection flag.
    #[serde(default)]
    pub selected: bool,
    /// Host-specific properties.
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// Kind of entity held in a named collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A track (container).
    Track,
    /// A clip on a track.
    Clip,
    /// An effect on a track.
    Fx,
}

impl EntityKind {
    /// Singular name, accepted as a predicate variable for this kind.
    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Track => "track",
            EntityKind::Clip => "clip",
            EntityKind::Fx => "fx",
        }
    }
}

/// Entity descriptor: a flat property view over a snapshot element.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// What the descriptor describes.
    pub kind: EntityKind,
    /// Index of the entity within its parent (or session, for tracks).
    pub index: usize,
    /// Index of the owning track.
    pub track: usize,
    /// Properties available to predicates.
    pub fields: BTreeMap<String, Value>,
}

impl Entity {
    /// Look up a property.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Snapshot {
    /// Parse a snapshot from JSON. Accepts the bare object or one wrapped
    /// as `{"state": {...}}`.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let raw: JsonValue = serde_json::from_str(text)?;
        Self::from_value(raw)
    }

    /// Convert an already-parsed JSON value.
    pub fn from_value(raw: JsonValue) -> serde_json::Result<Self> {
        let inner = match raw {
            JsonValue::Object(mut map) if map.contains_key("state") && !map.contains_key("tracks") => {
                map.remove("state").unwrap_or(JsonValue::Null)
            }
            other => other,
        };
        if inner.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(inner)
    }

    /// Tracks paired with their effective index.
    pub fn indexed_tracks(&self) -> impl Iterator<Item = (usize, &TrackState)> {
        self.tracks
            .iter()
            .enumerate()
            .map(|(pos, track)| (track.index.unwrap_or(pos), track))
    }

    /// Whether any container exists.
    pub fn has_tracks(&self) -> bool {
        !self.tracks.is_empty()
    }

    /// Number of tracks.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Whether a track with the given 0-based index exists.
    pub fn contains_track(&self, index: usize) -> bool {
        self.indexed_tracks().any(|(idx, _)| idx == index)
    }

    /// Look up a track by 0-based index.
    pub fn track(&self, index: usize) -> Option<&TrackState> {
        self.indexed_tracks()
            .find(|(idx, _)| *idx == index)
            .map(|(_, track)| track)
    }

    /// Index of the first selected track.
    pub fn selected_track(&self) -> Option<usize> {
        self.indexed_tracks()
            .find(|(_, track)| track.selected)
            .map(|(idx, _)| idx)
    }

    /// Index one past the highest existing track index.
    pub fn next_track_index(&self) -> usize {
        self.indexed_tracks()
            .map(|(idx, _)| idx.saturating_add(1))
            .max()
            .unwrap_or(0)
    }

    /// Index of the last track in display order.
    pub fn last_track(&self) -> Option<usize> {
        self.indexed_tracks().last().map(|(idx, _)| idx)
    }

    /// Track descriptors for the `tracks` collection.
    pub fn track_entities(&self) -> Vec<Entity> {
        self.indexed_tracks()
            .map(|(index, track)| {
                let mut fields = extra_fields(&track.extra);
                fields.insert("index".into(), Value::from(index));
                fields.insert("name".into(), Value::from(track.name.as_str()));
                fields.insert("muted".into(), Value::Bool(track.muted));
                fields.insert("soloed".into(), Value::Bool(track.soloed));
                fields.insert("selected".into(), Value::Bool(track.selected));
                if let Some(volume) = track.volume_db {
                    fields.insert("volume_db".into(), Value::Number(volume));
                }
                if let Some(pan) = track.pan {
                    fields.insert("pan".into(), Value::Number(pan));
                }
                fields.insert(
                    "fx".into(),
                    Value::Array(track.fx.iter().map(|fx| Value::from(fx.name.as_str())).collect()),
                );
                fields.insert("clip_count".into(), Value::from(track.clips.len()));
                Entity {
                    kind: EntityKind::Track,
                    index,
                    track: index,
                    fields,
                }
            })
            .collect()
    }

    /// Clip descriptors for the `clips` collection, each carrying its parent
    /// track index in the `track` field.
    pub fn clip_entities(&self) -> Vec<Entity> {
        let mut clips = Vec::new();
        for (track_index, track) in self.indexed_tracks() {
            for (pos, clip) in track.clips.iter().enumerate() {
                let index = clip.index.unwrap_or(pos);
                let mut fields = extra_fields(&clip.extra);
                fields.insert("index".into(), Value::from(index));
                fields.insert("track".into(), Value::from(track_index));
                fields.insert("position".into(), Value::Number(clip.position));
                fields.insert("length".into(), Value::Number(clip.length));
                fields.insert("selected".into(), Value::Bool(clip.selected));
                clips.push(Entity {
                    kind: EntityKind::Clip,
                    index,
                    track: track_index,
                    fields,
                });
            }
        }
        clips
    }

    /// Effect descriptors for one track.
    pub fn fx_entities(&self, track_index: usize) -> Vec<Entity> {
        let Some(track) = self.track(track_index) else {
            return Vec::new();
        };
        track
            .fx
            .iter()
            .enumerate()
            .map(|(index, fx)| {
                let mut fields = BTreeMap::new();
                fields.insert("index".into(), Value::from(index));
                fields.insert("track".into(), Value::from(track_index));
                fields.insert("name".into(), Value::from(fx.name.as_str()));
                fields.insert("enabled".into(), Value::Bool(fx.enabled));
                Entity {
                    kind: EntityKind::Fx,
                    index,
                    track: track_index,
                    fields,
                }
            })
            .collect()
    }
}

fn extra_fields(extra: &BTreeMap<String, JsonValue>) -> BTreeMap<String, Value> {
    extra
        .iter()
        .map(|(key, value)| (key.clone(), Value::from_json(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = r##"{
        "state": {
            "tracks": [
                {"name": "Drums", "muted": true, "fx": [{"name": "ReaEQ"}],
                 "clips": [{"position": 0.0, "length": 16.0}]},
                {"name": "Bass", "selected": true, "color": "#ff0000"}
            ]
        }
    }"##;

    #[test]
    fn accepts_wrapped_state() {
        let snapshot = Snapshot::from_json(SESSION).expect("snapshot");
        assert_eq!(snapshot.track_count(), 2);
        assert_eq!(snapshot.selected_track(), Some(1));
        assert_eq!(snapshot.next_track_index(), 2);
    }

    #[test]
    fn track_entities_expose_flags_and_extras() {
        let snapshot = Snapshot::from_json(SESSION).expect("snapshot");
        let tracks = snapshot.track_entities();
        assert_eq!(tracks[0].field("muted"), Some(&Value::Bool(true)));
        assert_eq!(
            tracks[0].field("fx"),
            Some(&Value::Array(vec![Value::from("ReaEQ")]))
        );
        assert_eq!(tracks[1].field("color"), Some(&Value::from("#ff0000")));
    }

    #[test]
    fn clip_entities_carry_parent_track() {
        let snapshot = Snapshot::from_json(SESSION).expect("snapshot");
        let clips = snapshot.clip_entities();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].track, 0);
        assert_eq!(clips[0].field("length"), Some(&Value::Number(16.0)));
    }

    #[test]
    fn null_state_is_empty() {
        let snapshot = Snapshot::from_json(r#"{"state": null}"#).expect("snapshot");
        assert!(!snapshot.has_tracks());
    }
}
