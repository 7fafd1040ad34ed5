//! Orchestrator runs against scripted providers: classification outcomes,
//! partial and total failure, cancellation, merge ordering, and streaming.

use std::sync::Arc;
use std::time::Duration;

use cadenza::config::CadenzaConfig;
use cadenza::error::OrchestratorError;
use cadenza::generator::{CancelSignal, Capability};
use cadenza::interpreter::{Action, Notice, Snapshot, kinds};
use cadenza::orchestrator::{FALLBACK_SCHEMA, Orchestrator, Tier, attach_follows_creation};
use cadenza::provider::{Script, ScriptedProvider};
use parking_lot::Mutex;

const DRUM_REQUEST: &str = "create a drum track and add a four on the floor kick pattern";

fn orchestrator(provider: ScriptedProvider) -> (Orchestrator, Arc<ScriptedProvider>) {
    let provider = Arc::new(provider);
    let orchestrator = Orchestrator::new(&CadenzaConfig::default(), provider.clone()).expect("orchestrator");
    (orchestrator, provider)
}

fn kinds_of(actions: &[Action]) -> Vec<&str> {
    actions.iter().map(|action| action.kind.as_str()).collect()
}

fn drum_provider() -> ScriptedProvider {
    ScriptedProvider::new()
        .with(
            "daw_dsl",
            Script::text("track(name=\"Drums\").new_clip(bar=1, length_bars=1)\ntrack(id=1).add_midi()"),
        )
        .with(
            "drummer_dsl",
            Script::text("beat(patterns=[pattern(drum=\"kick\", grid=\"x---x---x---x---\")], bars=1)"),
        )
}

#[tokio::test]
async fn drum_track_request_creates_then_patterns() {
    let (orchestrator, _) = orchestrator(drum_provider());
    let result = orchestrator
        .generate_actions(DRUM_REQUEST, &Snapshot::default())
        .await
        .expect("drum request");

    assert_eq!(result.capabilities, vec![Capability::Daw, Capability::Drummer]);
    assert!(!result.is_partial());
    let creates: Vec<usize> = result
        .actions
        .iter()
        .enumerate()
        .filter(|(_, action)| action.is(kinds::CREATE_TRACK))
        .map(|(position, _)| position)
        .collect();
    assert_eq!(creates.len(), 1);
    let first_pattern = result
        .actions
        .iter()
        .position(|action| action.is(kinds::DRUM_PATTERN))
        .expect("drum pattern present");
    assert!(creates[0] < first_pattern);
    assert!(attach_follows_creation(&result.actions));

    let attach = result
        .actions
        .iter()
        .find(|action| action.is_attach())
        .expect("attach action");
    assert_eq!(attach.target_track(), Some(0));
    assert_eq!(attach.note_count(), 4);
    assert_eq!(
        kinds_of(&result.actions),
        vec!["create_track", "create_clip_at_bar", "add_midi", "drum_beat", "drum_pattern"]
    );
}

#[tokio::test]
async fn unrelated_request_is_out_of_scope() {
    let (orchestrator, provider) = orchestrator(ScriptedProvider::new().with(
        FALLBACK_SCHEMA,
        Script::text(r#"{"daw": false, "arranger": false, "drummer": false}"#),
    ));
    let err = orchestrator
        .generate_actions("bake me a cake", &Snapshot::default())
        .await
        .expect_err("out of scope");
    assert!(matches!(err, OrchestratorError::OutOfScope));
    assert!(err.is_user_facing());
    assert_eq!(provider.calls_for(FALLBACK_SCHEMA), 1);
    assert_eq!(provider.requests().len(), 1, "no generator was launched");
}

#[tokio::test]
async fn fallback_adds_content_to_keyword_match() {
    let (orchestrator, _) = orchestrator(
        ScriptedProvider::new()
            .with(
                FALLBACK_SCHEMA,
                Script::text(r#"{"daw": true, "arranger": true, "drummer": false}"#),
            )
            .with("daw_dsl", Script::text("track(id=1).new_clip(bar=1)"))
            .with("arranger_dsl", Script::text("progression(chords=[\"Am\", \"F\", \"C\", \"G\"])")),
    );
    let snapshot = Snapshot::from_json(r#"{"tracks": [{"name": "Keys"}]}"#).expect("snapshot");
    let result = orchestrator
        .generate_actions("add a vibe to the track", &snapshot)
        .await
        .expect("result");
    assert_eq!(result.tier, Tier::Fallback);
    assert_eq!(
        kinds_of(&result.actions),
        vec!["create_clip_at_bar", "add_midi", "progression"]
    );
    assert_eq!(result.actions[2].target_track(), Some(0));
}

#[tokio::test]
async fn partial_failure_keeps_successful_output() {
    let (orchestrator, _) = orchestrator(
        ScriptedProvider::new()
            .with("daw_dsl", Script::text("track(name=\"Drums\")"))
            .with("drummer_dsl", Script::fail("model overloaded")),
    );
    let result = orchestrator
        .generate_actions(DRUM_REQUEST, &Snapshot::default())
        .await
        .expect("partial result");
    assert!(result.is_partial());
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].capability, Capability::Drummer);
    assert!(!result.failures[0].cancelled);
    assert_eq!(kinds_of(&result.actions), vec!["create_track"]);
}

#[tokio::test]
async fn total_failure_reports_every_task() {
    let (orchestrator, _) = orchestrator(
        ScriptedProvider::new()
            .with("daw_dsl", Script::text("this is not dsl"))
            .with("drummer_dsl", Script::fail("model overloaded")),
    );
    let err = orchestrator
        .generate_actions(DRUM_REQUEST, &Snapshot::default())
        .await
        .expect_err("total failure");
    match err {
        OrchestratorError::TotalFailure { failures } => {
            let mut failed: Vec<Capability> = failures.iter().map(|f| f.capability).collect();
            failed.sort();
            assert_eq!(failed, vec![Capability::Daw, Capability::Drummer]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn existing_tracks_skip_the_structural_generator() {
    let (orchestrator, provider) = orchestrator(
        ScriptedProvider::new().with("arranger_dsl", Script::text("arpeggio(\"Em/G\", direction=\"updown\")")),
    );
    let snapshot = Snapshot::from_json(r#"{"tracks": [{"name": "Lead", "selected": true}, {"name": "Pad"}]}"#)
        .expect("snapshot");
    let result = orchestrator
        .generate_actions("make an e minor arpeggio", &snapshot)
        .await
        .expect("result");
    assert_eq!(result.capabilities, vec![Capability::Arranger]);
    assert_eq!(provider.calls_for("daw_dsl"), 0);
    assert_eq!(kinds_of(&result.actions), vec!["add_midi", "arpeggio"]);
    assert_eq!(result.actions[0].target_track(), Some(0));
}

#[tokio::test]
async fn deadline_cancels_slow_generators() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with("daw_dsl", Script::text("track()").delayed(Duration::from_secs(5)))
            .with("drummer_dsl", Script::text("pattern(\"kick\", \"x---\")").delayed(Duration::from_secs(5))),
    );
    let config = CadenzaConfig {
        request_timeout_secs: Some(0),
        ..CadenzaConfig::default()
    };
    let orchestrator = Orchestrator::new(&config, provider).expect("orchestrator");
    let err = tokio::time::timeout(
        Duration::from_secs(2),
        orchestrator.generate_actions(DRUM_REQUEST, &Snapshot::default()),
    )
    .await
    .expect("deadline should end the run")
    .expect_err("cancelled");
    assert!(matches!(err, OrchestratorError::Cancelled));
}

#[tokio::test]
async fn external_cancel_stops_the_run() {
    let (orchestrator, _) = orchestrator(
        ScriptedProvider::new()
            .with("daw_dsl", Script::text("track()").delayed(Duration::from_secs(5)))
            .with("drummer_dsl", Script::text("pattern(\"kick\", \"x---\")").delayed(Duration::from_secs(5))),
    );
    let cancel = CancelSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let err = orchestrator
        .generate_actions_with_cancel(DRUM_REQUEST, &Snapshot::default(), &cancel)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, OrchestratorError::Cancelled));
}

#[tokio::test]
async fn streaming_emits_structure_first_and_attaches_once_ready() {
    let (orchestrator, _) = orchestrator(drum_provider());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let result = orchestrator
        .generate_actions_stream(DRUM_REQUEST, &Snapshot::default(), move |action: &Action| {
            sink.lock().push(action.clone())
        })
        .await
        .expect("stream");

    let seen = seen.lock();
    assert_eq!(*seen, result.actions);
    assert_eq!(
        kinds_of(&seen),
        vec!["create_track", "create_clip_at_bar", "add_midi", "drum_beat", "drum_pattern"]
    );
    assert_eq!(seen[2].note_count(), 4);
    assert!(attach_follows_creation(&seen));
}

#[tokio::test]
async fn streaming_without_structural_task_attaches_to_snapshot() {
    let (orchestrator, _) =
        orchestrator(ScriptedProvider::new().with("arranger_dsl", Script::text("chord(\"Cmaj7\", length=8)")));
    let snapshot = Snapshot::from_json(r#"{"tracks": [{"name": "Keys"}, {"name": "Strings"}]}"#)
        .expect("snapshot");
    let count = Arc::new(Mutex::new(0usize));
    let counter = count.clone();
    let result = orchestrator
        .generate_actions_stream("play a C major chord", &snapshot, move |_: &Action| {
            *counter.lock() += 1
        })
        .await
        .expect("stream");
    assert_eq!(*count.lock(), result.actions.len());
    assert_eq!(kinds_of(&result.actions), vec!["add_midi", "chord"]);
    assert_eq!(result.actions[0].target_track(), Some(1));
    assert_eq!(result.actions[0].note_count(), 4);
}

#[tokio::test]
async fn streamed_structure_failing_late_keeps_its_emitted_prefix() {
    let (orchestrator, _) = orchestrator(
        ScriptedProvider::new()
            .with(
                "daw_dsl",
                Script::text("track(name=\"A\")\ntrack(id=9).set_mute(mute=true)"),
            )
            .with(
                "drummer_dsl",
                Script::text("beat(patterns=[pattern(drum=\"kick\", grid=\"x---x---x---x---\")], bars=1)"),
            ),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let result = orchestrator
        .generate_actions_stream(DRUM_REQUEST, &Snapshot::default(), move |action: &Action| {
            sink.lock().push(action.clone())
        })
        .await
        .expect("stream");

    assert!(result.failures.is_empty());
    assert_eq!(*seen.lock(), result.actions);
    assert_eq!(
        kinds_of(&result.actions),
        vec!["create_track", "add_midi", "drum_beat", "drum_pattern"]
    );
    let daw = result
        .diagnostics
        .iter()
        .find(|diagnostics| diagnostics.capability == Capability::Daw)
        .expect("daw diagnostics");
    assert!(matches!(daw.notices.as_slice(), [Notice::Truncated { emitted: 1, .. }]));
}
