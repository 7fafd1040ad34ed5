//! Request orchestration.
//!
//! The orchestrator classifies a request, launches one generator task per
//! selected capability on a `JoinSet`, tolerates partial failure, and merges
//! the results so that content always lands after the container it attaches
//! to. The streaming variant forwards structural actions as they are
//! interpreted and releases content through a dependency buffer.

/// Two-tier request classification.
pub mod classifier;
/// Capability keyword tables.
pub mod keywords;
/// Pure merge of generator results.
pub mod merge;
/// Streaming dependency buffer.
pub mod stream;

pub use crate::generator::Capability;
pub use classifier::{Classification, Classifier, Detection, FALLBACK_SCHEMA, Tier};
pub use keywords::{DEFAULT_KEYWORDS, KeywordSet, KeywordTable};
pub use merge::{Merged, attach_follows_creation, merge, resolve_target};
pub use stream::{ActionSink, StreamBuffer};

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::CadenzaConfig;
use crate::error::{ConfigResult, OrchestratorError, TaskFailure};
use crate::generator::{CancelSignal, Diagnostics, DslGenerator, Generator, GeneratorError, GeneratorResult};
use crate::interpreter::{Action, Snapshot};
use crate::provider::ContentProvider;

/// Outcome of one orchestrated request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorResult {
    /// Request id carried on the tracing span.
    pub request_id: Uuid,
    /// Final ordered actions.
    pub actions: Vec<Action>,
    /// Capabilities that were launched.
    pub capabilities: Vec<Capability>,
    /// Tier that decided the classification.
    pub tier: Tier,
    /// Tasks that failed. Non-empty means a partial failure.
    pub failures: Vec<TaskFailure>,
    /// Content whose payload found no container.
    pub unattached: Vec<Capability>,
    /// Per-generator diagnostics of the successful tasks.
    pub diagnostics: Vec<Diagnostics>,
}

impl OrchestratorResult {
    /// Whether some but not all tasks failed.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// What one task produced.
type TaskOutput = (Capability, Result<GeneratorResult, TaskFailure>);

/// Classifies requests and runs generators concurrently.
pub struct Orchestrator {
    classifier: Classifier,
    generators: BTreeMap<Capability, Arc<dyn Generator>>,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("classifier", &self.classifier)
            .field("generators", &self.generators.keys().collect::<Vec<_>>())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Orchestrator {
    /// Orchestrator with the three built-in generators sharing `provider`.
    pub fn new(config: &CadenzaConfig, provider: Arc<dyn ContentProvider>) -> ConfigResult<Self> {
        let table = config.keyword_table()?;
        let model = config.provider.model.clone();
        let classifier = Classifier::new(table, provider.clone(), config.provider.classifier_model.clone());
        let generators: Vec<Arc<dyn Generator>> = vec![
            Arc::new(DslGenerator::daw(provider.clone(), model.clone())),
            Arc::new(DslGenerator::arranger(provider.clone(), model.clone())),
            Arc::new(DslGenerator::drummer(provider, model)),
        ];
        Ok(Self::with_generators(classifier, generators, config.request_timeout()))
    }

    /// Orchestrator over caller-supplied generators. A later generator for
    /// the same capability replaces an earlier one.
    pub fn with_generators(
        classifier: Classifier,
        generators: impl IntoIterator<Item = Arc<dyn Generator>>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            classifier,
            generators: generators
                .into_iter()
                .map(|generator| (generator.capability(), generator))
                .collect(),
            request_timeout,
        }
    }

    /// The classifier.
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Replace the keyword table with the one at `path`.
    pub fn reload_keywords(&mut self, path: &Path) -> ConfigResult<()> {
        let table = KeywordTable::load(path)?;
        self.classifier.set_table(table);
        Ok(())
    }

    /// Classify a request without running generators.
    pub async fn classify(&self, request: &str) -> Result<Classification, OrchestratorError> {
        self.classifier.classify(request).await
    }

    /// Run a request and return the merged actions.
    pub async fn generate_actions(
        &self,
        request: &str,
        snapshot: &Snapshot,
    ) -> Result<OrchestratorResult, OrchestratorError> {
        self.generate_actions_with_cancel(request, snapshot, &CancelSignal::new())
            .await
    }

    /// [`Orchestrator::generate_actions`] with an external cancellation signal.
    pub async fn generate_actions_with_cancel(
        &self,
        request: &str,
        snapshot: &Snapshot,
        cancel: &CancelSignal,
    ) -> Result<OrchestratorResult, OrchestratorError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", %request_id);
        self.run(request_id, request, snapshot, cancel, None)
            .instrument(span)
            .await
    }

    /// Run a request, invoking `on_action` once per action as soon as its
    /// dependencies allow. The result holds every emitted action in order.
    pub async fn generate_actions_stream<F>(
        &self,
        request: &str,
        snapshot: &Snapshot,
        on_action: F,
    ) -> Result<OrchestratorResult, OrchestratorError>
    where
        F: FnMut(&Action) + Send + 'static,
    {
        self.generate_actions_stream_with_cancel(request, snapshot, &CancelSignal::new(), on_action)
            .await
    }

    /// [`Orchestrator::generate_actions_stream`] with an external
    /// cancellation signal.
    pub async fn generate_actions_stream_with_cancel<F>(
        &self,
        request: &str,
        snapshot: &Snapshot,
        cancel: &CancelSignal,
        on_action: F,
    ) -> Result<OrchestratorResult, OrchestratorError>
    where
        F: FnMut(&Action) + Send + 'static,
    {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", %request_id, streaming = true);
        self.run(request_id, request, snapshot, cancel, Some(Box::new(on_action)))
            .instrument(span)
            .await
    }

    /// Capabilities to launch for a classification.
    fn select(&self, classification: &Classification, snapshot: &Snapshot) -> BTreeSet<Capability> {
        let mut selected = classification.capabilities.clone();
        let wants_content = selected.iter().any(|capability| capability.is_content());
        if wants_content && !snapshot.has_tracks() && selected.insert(Capability::Daw) {
            info!("content requested with no tracks; enabling daw");
        }
        selected
    }

    async fn run(
        &self,
        request_id: Uuid,
        request: &str,
        snapshot: &Snapshot,
        cancel: &CancelSignal,
        sink: Option<ActionSink>,
    ) -> Result<OrchestratorResult, OrchestratorError> {
        let started = Instant::now();
        info!(%request, tracks = snapshot.track_count(), "request started");
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let classification = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            classification = self.classifier.classify(request) => classification?,
        };
        let selected = self.select(&classification, snapshot);
        let mut generators = Vec::with_capacity(selected.len());
        for capability in &selected {
            let generator = self
                .generators
                .get(capability)
                .ok_or(OrchestratorError::MissingGenerator(*capability))?;
            generators.push(generator.clone());
        }
        info!(capabilities = ?selected, tier = ?classification.tier, "launching generators");

        let deadline = self.request_timeout.map(|timeout| cancel.cancel_after(timeout));
        let buffer = sink.map(|sink| {
            StreamBuffer::new(
                snapshot.clone(),
                selected.contains(&Capability::Daw),
                selected.iter().copied().filter(|capability| capability.is_content()),
                sink,
            )
        });

        let request: Arc<str> = Arc::from(request);
        let shared_snapshot = Arc::new(snapshot.clone());
        let mut tasks = JoinSet::new();
        for generator in generators {
            let task = run_task(
                generator,
                request.clone(),
                shared_snapshot.clone(),
                cancel.clone(),
                buffer.clone(),
            );
            tasks.spawn(task.in_current_span());
        }

        let mut successes: BTreeMap<Capability, GeneratorResult> = BTreeMap::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((capability, Ok(result))) => {
                    successes.insert(capability, result);
                }
                Ok((_, Err(failure))) => failures.push(failure),
                Err(err) => warn!(error = %err, "generator task aborted"),
            }
        }
        if let Some(deadline) = deadline {
            deadline.abort();
        }

        if successes.is_empty() {
            if let Some(buffer) = &buffer {
                buffer.flush();
            }
            if !failures.is_empty() && failures.iter().all(|failure| failure.cancelled) {
                warn!("every generator was cancelled");
                return Err(OrchestratorError::Cancelled);
            }
            warn!(failed = failures.len(), "every generator failed");
            return Err(OrchestratorError::TotalFailure { failures });
        }
        if !failures.is_empty() {
            warn!(
                failed = ?failures.iter().map(|failure| failure.capability).collect::<Vec<_>>(),
                succeeded = successes.len(),
                "partial failure; continuing with successful generators"
            );
        }

        let (actions, unattached) = match &buffer {
            Some(buffer) => {
                buffer.flush();
                (buffer.emitted(), buffer.unattached())
            }
            None => {
                let structural = successes
                    .get(&Capability::Daw)
                    .map(|result| result.actions.as_slice())
                    .unwrap_or_default();
                let contents: Vec<&GeneratorResult> = successes
                    .values()
                    .filter(|result| result.capability.is_content())
                    .collect();
                let merged = merge(structural, &contents, snapshot);
                (merged.actions, merged.unattached)
            }
        };

        info!(
            actions = actions.len(),
            failed = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request finished"
        );
        Ok(OrchestratorResult {
            request_id,
            actions,
            capabilities: selected.into_iter().collect(),
            tier: classification.tier,
            failures,
            unattached,
            diagnostics: successes.into_values().map(|result| result.diagnostics).collect(),
        })
    }
}

/// Body of one generator task. Panics are caught and reported as failures so
/// the capability is never lost.
async fn run_task(
    generator: Arc<dyn Generator>,
    request: Arc<str>,
    snapshot: Arc<Snapshot>,
    cancel: CancelSignal,
    buffer: Option<StreamBuffer>,
) -> TaskOutput {
    let capability = generator.capability();
    let work = async {
        match &buffer {
            Some(buffer) if capability.is_structural() => {
                let mut forward = |action: Action| buffer.push_structural(action);
                generator
                    .produce_stream(&request, &snapshot, &cancel, &mut forward)
                    .await
            }
            _ => generator.produce(&request, &snapshot, &cancel).await,
        }
    };
    let outcome: Result<GeneratorResult, TaskFailure> = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => {
            log_failure(&err);
            Err(TaskFailure::from_error(&err))
        }
        Err(_) => {
            warn!(%capability, "generator panicked");
            Err(TaskFailure {
                capability,
                message: format!("{capability}: generator panicked"),
                cancelled: false,
            })
        }
    };

    if let Some(buffer) = &buffer {
        if capability.is_structural() {
            buffer.finish_structural();
        } else {
            buffer.finish_content(capability, outcome.as_ref().ok().cloned());
        }
    }
    (capability, outcome)
}

fn log_failure(err: &GeneratorError) {
    match err {
        GeneratorError::Cancelled { capability } => debug!(%capability, "generator cancelled"),
        other => warn!(capability = %other.capability(), error = %other, "generator failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Script, ScriptedProvider};

    fn orchestrator(provider: ScriptedProvider) -> Orchestrator {
        Orchestrator::new(&CadenzaConfig::default(), Arc::new(provider)).expect("orchestrator")
    }

    #[tokio::test]
    async fn content_without_tracks_enables_structural() {
        let provider = ScriptedProvider::new()
            .with("daw_dsl", Script::text("track(instrument=\"Piano\")"))
            .with("arranger_dsl", Script::text("chord(\"C\")"));
        let result = orchestrator(provider)
            .generate_actions("play a C major chord", &Snapshot::default())
            .await
            .expect("result");
        assert_eq!(result.capabilities, vec![Capability::Daw, Capability::Arranger]);
        let kinds: Vec<&str> = result.actions.iter().map(|a| a.kind.as_str()).collect();
        assert_eq!(kinds, vec!["create_track", "add_midi", "chord"]);
        assert!(attach_follows_creation(&result.actions));
    }

    #[tokio::test]
    async fn missing_generator_is_reported() {
        let provider: Arc<dyn ContentProvider> = Arc::new(ScriptedProvider::new());
        let classifier = Classifier::new(KeywordTable::embedded(), provider, "mini");
        let orchestrator = Orchestrator::with_generators(classifier, Vec::new(), None);
        let err = orchestrator
            .generate_actions("mute track 1", &Snapshot::default())
            .await
            .expect_err("no generators");
        assert!(matches!(err, OrchestratorError::MissingGenerator(Capability::Daw)));
    }

    #[tokio::test]
    async fn pre_cancelled_request_launches_nothing() {
        let provider = Arc::new(ScriptedProvider::new());
        let orchestrator = Orchestrator::new(&CadenzaConfig::default(), provider.clone()).expect("orchestrator");
        let cancel = CancelSignal::new();
        cancel.cancel();
        let err = orchestrator
            .generate_actions_with_cancel("mute track 1", &Snapshot::default(), &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, OrchestratorError::Cancelled));
        assert!(provider.requests().is_empty());
    }
}
