//! End-to-end interpreter behavior: documented scenarios, all-or-nothing
//! failure, and property tests for determinism and filter idempotence.

use cadenza::interpreter::{
    ArrangerDomain, DawDomain, Domain, DrummerDomain, Interpreter, InterpreterError, Notice, Snapshot, TrackState,
    kinds,
};
use proptest::prelude::*;
use serde_json::json;

fn three_tracks(muted: [bool; 3]) -> Snapshot {
    Snapshot {
        tracks: ["Drums", "Bass", "Keys"]
            .iter()
            .zip(muted)
            .map(|(name, muted)| TrackState {
                name: name.to_string(),
                muted,
                ..TrackState::default()
            })
            .collect(),
    }
}

#[test]
fn create_track_with_instrument() {
    let interpretation = Interpreter::new(DawDomain)
        .interpret(r#"track(instrument="Piano")"#, &Snapshot::default())
        .expect("interpret");
    assert_eq!(interpretation.actions.len(), 1);
    let action = &interpretation.actions[0];
    assert_eq!(action.kind, kinds::CREATE_TRACK);
    assert_eq!(action.get("instrument"), Some(&json!("Piano")));
    assert_eq!(action.get("index"), Some(&json!(0)));
}

#[test]
fn rename_by_one_based_id() {
    let snapshot = Snapshot::from_json(r#"{"tracks": [{"name": "Track 1"}]}"#).expect("snapshot");
    let interpretation = Interpreter::new(DawDomain)
        .interpret(r#"track(id=1).set_name(name="Bass")"#, &snapshot)
        .expect("interpret");
    assert_eq!(interpretation.actions.len(), 1);
    let action = &interpretation.actions[0];
    assert_eq!(action.kind, kinds::SET_TRACK_NAME);
    assert_eq!(action.get("track"), Some(&json!(0)));
    assert_eq!(action.get("name"), Some(&json!("Bass")));
}

#[test]
fn filtered_unmute_hits_each_muted_track() {
    let interpretation = Interpreter::new(DawDomain)
        .interpret(
            "filter(tracks, track.muted == true).set_mute(mute=false)",
            &three_tracks([true, false, true]),
        )
        .expect("interpret");
    let targets: Vec<Option<usize>> = interpretation.actions.iter().map(|a| a.target_track()).collect();
    assert_eq!(targets, vec![Some(0), Some(2)]);
    for action in &interpretation.actions {
        assert_eq!(action.kind, kinds::SET_TRACK_MUTE);
        assert_eq!(action.get("mute"), Some(&json!(false)));
    }
}

#[test]
fn failure_discards_every_action() {
    let err = Interpreter::new(DawDomain)
        .interpret(
            "track(name=\"A\")\ntrack(name=\"B\")\ntrack(id=9).set_mute(mute=true)",
            &Snapshot::default(),
        )
        .expect_err("unresolved id");
    assert!(matches!(err, InterpreterError::UnresolvedReference { .. }));
}

#[test]
fn zero_match_filter_alone_is_an_empty_result() {
    let err = Interpreter::new(DawDomain)
        .interpret(
            "filter(tracks, track.name == \"Strings\").set_solo(solo=true)",
            &three_tracks([false; 3]),
        )
        .expect_err("nothing emitted");
    assert_eq!(err, InterpreterError::EmptyResult);
}

#[test]
fn zero_match_filter_next_to_other_work_is_a_notice() {
    let interpretation = Interpreter::new(DawDomain)
        .interpret(
            "filter(tracks, track.name == \"Strings\").set_solo(solo=true)\ntrack(id=1).set_volume(volume_db=-6)",
            &three_tracks([false; 3]),
        )
        .expect("interpret");
    assert_eq!(interpretation.actions.len(), 1);
    assert!(matches!(
        interpretation.notices.as_slice(),
        [Notice::EmptyFilter { collection, .. }] if collection == "tracks"
    ));
}

#[test]
fn calls_outside_the_domain_are_not_dsl() {
    let err = Interpreter::new(ArrangerDomain)
        .interpret("track(name=\"Keys\")", &Snapshot::default())
        .expect_err("daw call in arranger");
    assert!(matches!(err, InterpreterError::UnknownMethod { domain: "arranger", .. }));
}

#[test]
fn content_domains_render_payloads() {
    let arranger = Interpreter::new(ArrangerDomain);
    let arpeggio = arranger
        .interpret(r#"arpeggio("Em", length=3)"#, &Snapshot::default())
        .expect("arpeggio");
    let notes = arranger.domain().payload(&arpeggio.actions).expect("payload");
    assert_eq!(notes.iter().map(|n| n.pitch).collect::<Vec<_>>(), vec![52, 55, 59]);
    assert_eq!(notes.iter().map(|n| n.start).collect::<Vec<_>>(), vec![0.0, 1.0, 2.0]);

    let drummer = Interpreter::new(DrummerDomain);
    let beat = drummer
        .interpret(
            r#"beat(patterns=[pattern(drum="kick", grid="x---x---x---x---"), pattern(drum="hat", grid="--x---x---x---x-")], bars=2)"#,
            &Snapshot::default(),
        )
        .expect("beat");
    assert_eq!(beat.actions[0].kind, kinds::DRUM_BEAT);
    let notes = drummer.domain().payload(&beat.actions).expect("payload");
    assert_eq!(notes.iter().filter(|n| n.pitch == 36).count(), 8);
    assert_eq!(notes.iter().filter(|n| n.pitch == 42).count(), 8);
    assert!(notes.windows(2).all(|pair| pair[0].start <= pair[1].start));
}

#[test]
fn unknown_collection_is_reported_by_name() {
    let err = Interpreter::new(DawDomain)
        .interpret("filter(widgets, widget.name == \"x\").set_mute(mute=true)", &three_tracks([false; 3]))
        .expect_err("no such collection");
    assert!(matches!(err, InterpreterError::UnknownCollection { ref collection } if collection == "widgets"));
}

#[test]
fn oversized_counts_are_invalid_arguments() {
    let err = Interpreter::new(DawDomain)
        .interpret("track(index=100000000000000000000000)", &Snapshot::default())
        .expect_err("index too large");
    assert!(matches!(err, InterpreterError::InvalidArgument { ref param, .. } if param == "index"));

    let err = Interpreter::new(ArrangerDomain)
        .interpret(r#"arpeggio("Em", repeat=1000000000)"#, &Snapshot::default())
        .expect_err("repeat too large");
    assert!(matches!(err, InterpreterError::InvalidArgument { ref param, .. } if param == "repeat"));

    let err = Interpreter::new(DrummerDomain)
        .interpret(r#"beat(patterns=[pattern(drum="kick", grid="x---")], bars=4294967295)"#, &Snapshot::default())
        .expect_err("bars too large");
    assert!(matches!(err, InterpreterError::InvalidArgument { ref param, .. } if param == "bars"));
}

#[test]
fn maximal_snapshot_index_does_not_overflow() {
    let snapshot = Snapshot::from_json(r#"{"tracks": [{"name": "Edge", "index": 18446744073709551615}]}"#)
        .expect("snapshot");
    let interpretation = Interpreter::new(DawDomain)
        .interpret("track()", &snapshot)
        .expect("interpret");
    assert_eq!(interpretation.actions[0].kind, kinds::CREATE_TRACK);
}

fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    prop::collection::vec(
        (prop::sample::select(vec!["Drums", "Bass", "Keys", "Pad"]), any::<bool>(), any::<bool>()),
        0..8,
    )
    .prop_map(|tracks| Snapshot {
        tracks: tracks
            .into_iter()
            .map(|(name, muted, selected)| TrackState {
                name: name.to_string(),
                muted,
                selected,
                ..TrackState::default()
            })
            .collect(),
    })
}

proptest! {
    #[test]
    fn interpretation_is_deterministic(snapshot in snapshot_strategy(), name in "[A-Za-z]{1,8}") {
        let source = format!(
            "filter(tracks, track.muted == true).set_mute(mute=false)\ntrack(name=\"{name}\").new_clip(bar=1)"
        );
        let interpreter = Interpreter::new(DawDomain);
        let first = interpreter.interpret(&source, &snapshot);
        let second = interpreter.interpret(&source, &snapshot);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn repeated_filter_matches_the_same_set(snapshot in snapshot_strategy(), name in prop::sample::select(vec!["Drums", "Bass", "Keys", "Pad"])) {
        let statement = format!("filter(tracks, track.name == \"{name}\").set_selected(selected=true)");
        let source = format!("{statement}\n{statement}\ntrack(name=\"marker\")");
        let interpretation = Interpreter::new(DawDomain)
            .interpret(&source, &snapshot)
            .expect("marker statement always emits");
        let selections: Vec<_> = interpretation
            .actions
            .iter()
            .filter(|action| action.kind == kinds::SET_TRACK_SELECTED)
            .map(|action| action.target_track())
            .collect();
        prop_assert_eq!(selections.len() % 2, 0);
        let (first, second) = selections.split_at(selections.len() / 2);
        prop_assert_eq!(first, second);
    }
}
