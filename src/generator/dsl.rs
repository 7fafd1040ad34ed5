use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::prompts::{DomainPrompt, prompt_for};
use super::{CancelSignal, Capability, Diagnostics, Generator, GeneratorError, GeneratorResult, Result};
use crate::interpreter::{
    Action, ArrangerDomain, DawDomain, Domain, DrummerDomain, Interpretation, Interpreter, Notice,
    Snapshot,
};
use crate::provider::{ContentProvider, Message, ProviderRequest, StreamEvent, Usage};

/// Generator backed by a content provider and one interpreter domain.
pub struct DslGenerator<D> {
    capability: Capability,
    interpreter: Interpreter<D>,
    provider: Arc<dyn ContentProvider>,
    model: String,
    prompt: &'static DomainPrompt,
}

impl<D> std::fmt::Debug for DslGenerator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DslGenerator")
            .field("capability", &self.capability)
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

impl DslGenerator<DawDomain> {
    /// Structural generator.
    pub fn daw(provider: Arc<dyn ContentProvider>, model: impl Into<String>) -> Self {
        Self::new(Capability::Daw, DawDomain, provider, model)
    }
}

impl DslGenerator<ArrangerDomain> {
    /// Musical-content generator.
    pub fn arranger(provider: Arc<dyn ContentProvider>, model: impl Into<String>) -> Self {
        Self::new(Capability::Arranger, ArrangerDomain, provider, model)
    }
}

impl DslGenerator<DrummerDomain> {
    /// Drum generator.
    pub fn drummer(provider: Arc<dyn ContentProvider>, model: impl Into<String>) -> Self {
        Self::new(Capability::Drummer, DrummerDomain, provider, model)
    }
}

impl<D: Domain> DslGenerator<D> {
    /// Pair a domain with a provider.
    pub fn new(
        capability: Capability,
        domain: D,
        provider: Arc<dyn ContentProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            capability,
            interpreter: Interpreter::new(domain),
            provider,
            model: model.into(),
            prompt: prompt_for(capability),
        }
    }

    /// The interpreter used for provider output.
    pub fn interpreter(&self) -> &Interpreter<D> {
        &self.interpreter
    }

    /// Provider request for a user request. Structural generators also see the
    /// session state.
    pub fn provider_request(&self, request: &str, snapshot: &Snapshot) -> Result<ProviderRequest> {
        let mut input = vec![Message::user(request)];
        if self.capability.is_structural() && snapshot.has_tracks() {
            let state = serde_json::to_string(snapshot).map_err(|source| GeneratorError::Snapshot {
                capability: self.capability,
                source,
            })?;
            input.push(Message::developer(format!("Current session state: {state}")));
        }
        Ok(ProviderRequest {
            model: self.model.clone(),
            instructions: self.prompt.instructions.to_string(),
            input,
            output: self.prompt.output_format(),
        })
    }

    fn provider_error(&self, source: crate::provider::ProviderError) -> GeneratorError {
        GeneratorError::Provider {
            capability: self.capability,
            source,
        }
    }

    fn interpret(&self, dsl: &str, snapshot: &Snapshot) -> Result<Interpretation> {
        self.interpreter
            .interpret(dsl, snapshot)
            .map_err(|source| GeneratorError::Interpret {
                capability: self.capability,
                dsl: dsl.to_string(),
                source,
            })
    }

    fn finish(&self, run: Run, interpretation: Interpretation) -> Result<GeneratorResult> {
        let payload = self
            .interpreter
            .domain()
            .payload(&interpretation.actions)
            .map_err(|source| GeneratorError::Payload {
                capability: self.capability,
                source,
            })?;
        let elapsed_ms = run.started.elapsed().as_millis() as u64;
        info!(
            capability = %self.capability,
            actions = interpretation.actions.len(),
            notes = payload.len(),
            elapsed_ms,
            cancelled = run.cancelled,
            "generator finished"
        );
        Ok(GeneratorResult {
            capability: self.capability,
            actions: interpretation.actions,
            payload,
            diagnostics: Diagnostics {
                capability: self.capability,
                provider: self.provider.name().to_string(),
                model: self.model.clone(),
                dsl: run.dsl,
                usage: run.usage,
                notices: interpretation.notices,
                elapsed_ms,
                completed_at: Utc::now(),
                streamed: run.streamed,
                cancelled: run.cancelled,
            },
        })
    }
}

/// Bookkeeping carried from the provider call into the result.
struct Run {
    started: Instant,
    dsl: String,
    usage: Option<Usage>,
    streamed: bool,
    cancelled: bool,
}

/// Strip code fences a model may wrap around the DSL.
fn clean_dsl(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim().to_string()
}

#[async_trait]
impl<D: Domain> Generator for DslGenerator<D> {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn produce(
        &self,
        request: &str,
        snapshot: &Snapshot,
        cancel: &CancelSignal,
    ) -> Result<GeneratorResult> {
        let started = Instant::now();
        let provider_request = self.provider_request(request, snapshot)?;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(GeneratorError::Cancelled { capability: self.capability });
            }
            response = self.provider.generate(&provider_request) => {
                response.map_err(|err| self.provider_error(err))?
            }
        };
        let dsl = clean_dsl(&response.text);
        debug!(capability = %self.capability, %dsl, "provider output");
        let interpretation = self.interpret(&dsl, snapshot)?;
        self.finish(
            Run {
                started,
                dsl,
                usage: response.usage,
                streamed: false,
                cancelled: false,
            },
            interpretation,
        )
    }

    async fn produce_stream(
        &self,
        request: &str,
        snapshot: &Snapshot,
        cancel: &CancelSignal,
        sink: &mut (dyn FnMut(Action) + Send),
    ) -> Result<GeneratorResult> {
        let started = Instant::now();
        let provider_request = self.provider_request(request, snapshot)?;
        let mut events = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(GeneratorError::Cancelled { capability: self.capability });
            }
            events = self.provider.stream(&provider_request) => {
                events.map_err(|err| self.provider_error(err))?
            }
        };

        let mut text = String::new();
        let mut sent: Vec<Action> = Vec::new();
        let mut usage = None;
        let mut completed = None;
        let mut cancelled = false;
        let mut stream_error = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = events.next() => next,
            };
            match next {
                Some(Ok(StreamEvent::Delta(chunk))) => {
                    text.push_str(&chunk);
                    if let Some(actions) = self.interpreter.interpret_prefix(&text, snapshot) {
                        for action in actions.into_iter().skip(sent.len()) {
                            debug!(capability = %self.capability, kind = %action.kind, "stream action");
                            sink(action.clone());
                            sent.push(action);
                        }
                    }
                }
                Some(Ok(StreamEvent::Completed { text: full, usage: reported })) => {
                    usage = reported;
                    completed = Some(full);
                    break;
                }
                Some(Err(err)) if !sent.is_empty() => {
                    warn!(
                        capability = %self.capability,
                        error = %err,
                        emitted = sent.len(),
                        "provider stream failed; keeping emitted actions"
                    );
                    stream_error = Some(err.to_string());
                    break;
                }
                Some(Err(err)) => return Err(self.provider_error(err)),
                None => break,
            }
        }

        let dsl = clean_dsl(completed.as_deref().unwrap_or(&text));
        let run = Run {
            started,
            dsl,
            usage,
            streamed: true,
            cancelled,
        };

        if completed.is_none() {
            // Cut short by cancellation or a stream error: keep what was emitted.
            if sent.is_empty() {
                return Err(GeneratorError::Cancelled {
                    capability: self.capability,
                });
            }
            let notices = stream_error
                .map(|reason| {
                    vec![Notice::Truncated {
                        emitted: sent.len(),
                        reason,
                    }]
                })
                .unwrap_or_default();
            return self.finish(run, Interpretation { actions: sent, notices });
        }

        // Emitted actions cannot be recalled; a late failure keeps the prefix.
        let interpretation = match self.interpret(&run.dsl, snapshot) {
            Ok(interpretation) => interpretation,
            Err(err) if !sent.is_empty() => {
                warn!(
                    capability = %self.capability,
                    error = %err,
                    emitted = sent.len(),
                    "streamed program failed after emitting; keeping emitted actions"
                );
                let notices = vec![Notice::Truncated {
                    emitted: sent.len(),
                    reason: err.to_string(),
                }];
                return self.finish(run, Interpretation { actions: sent, notices });
            }
            Err(err) => return Err(err),
        };
        for action in interpretation.actions.iter().skip(sent.len()) {
            sink(action.clone());
        }
        self.finish(run, interpretation)
    }
}
