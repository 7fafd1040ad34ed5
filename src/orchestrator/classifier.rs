use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::keywords::KeywordTable;
use crate::error::OrchestratorError;
use crate::generator::Capability;
use crate::provider::{ContentProvider, Message, OutputFormat, ProviderRequest, ProviderResult};

/// Schema name of the fallback classification call.
pub const FALLBACK_SCHEMA: &str = "capability_classification";

const FALLBACK_INSTRUCTIONS: &str = "Decide which music production assistants a request \
needs. daw: creating, editing, mixing, or deleting tracks, clips, and effects. arranger: \
chords, arpeggios, progressions, melodies, and other pitched musical content. drummer: \
drum beats and percussion patterns. Answer false for all three when the request has \
nothing to do with music production.";

/// Fast-path outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    /// Capabilities with a direct keyword match.
    pub capabilities: Vec<Capability>,
    /// Capabilities with a hint-term match.
    pub hints: Vec<Capability>,
    /// Whether the fallback classifier must be consulted.
    pub fallback: bool,
}

/// Which tier decided a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Keyword matches alone.
    Keywords,
    /// Keyword matches combined with the fallback call.
    Fallback,
    /// The fallback call failed; keyword matches were kept.
    KeywordsAfterFallbackError,
}

/// Final classification of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Selected capabilities.
    pub capabilities: BTreeSet<Capability>,
    /// Deciding tier.
    pub tier: Tier,
}

impl Classification {
    /// Whether a capability was selected.
    pub fn contains(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Answer shape of the fallback call.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct FallbackAnswer {
    #[serde(default)]
    daw: bool,
    #[serde(default)]
    arranger: bool,
    #[serde(default)]
    drummer: bool,
}

impl FallbackAnswer {
    fn selected(self) -> Vec<Capability> {
        [
            (Capability::Daw, self.daw),
            (Capability::Arranger, self.arranger),
            (Capability::Drummer, self.drummer),
        ]
        .into_iter()
        .filter_map(|(capability, on)| on.then_some(capability))
        .collect()
    }
}

/// Two-tier request classifier.
pub struct Classifier {
    table: KeywordTable,
    provider: Arc<dyn ContentProvider>,
    model: String,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("terms", &self.table.term_count())
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

impl Classifier {
    /// Classifier over a keyword table, using `model` for the fallback call.
    pub fn new(table: KeywordTable, provider: Arc<dyn ContentProvider>, model: impl Into<String>) -> Self {
        Self {
            table,
            provider,
            model: model.into(),
        }
    }

    /// Current keyword table.
    pub fn table(&self) -> &KeywordTable {
        &self.table
    }

    /// Swap the keyword table.
    pub fn set_table(&mut self, table: KeywordTable) {
        self.table = table;
    }

    /// Keyword tier only. Never calls the provider.
    pub fn detect(&self, request: &str) -> Detection {
        let capabilities = self.table.matches(request);
        let hints = self.table.hinted(request);
        let fallback = match capabilities.as_slice() {
            [] => true,
            [only] => hints.iter().any(|hinted| hinted != only),
            _ => false,
        };
        Detection {
            capabilities,
            hints,
            fallback,
        }
    }

    /// Full classification.
    pub async fn classify(&self, request: &str) -> Result<Classification, OrchestratorError> {
        let detection = self.detect(request);
        debug!(?detection, "keyword detection");
        let mut capabilities: BTreeSet<Capability> = detection.capabilities.iter().copied().collect();

        if !detection.fallback {
            return Ok(Classification {
                capabilities,
                tier: Tier::Keywords,
            });
        }

        let tier = match self.fallback(request).await {
            Ok(selected) => {
                info!(?selected, "fallback classification");
                capabilities.extend(selected);
                Tier::Fallback
            }
            Err(err) if !capabilities.is_empty() => {
                warn!(error = %err, "fallback classification failed; keeping keyword matches");
                Tier::KeywordsAfterFallbackError
            }
            Err(err) => return Err(OrchestratorError::Classification(err)),
        };

        if capabilities.is_empty() {
            info!("request is out of scope");
            return Err(OrchestratorError::OutOfScope);
        }
        Ok(Classification { capabilities, tier })
    }

    /// Provider request for the fallback tier.
    pub fn fallback_request(&self, request: &str) -> ProviderRequest {
        let flag = json!({"type": "boolean"});
        ProviderRequest {
            model: self.model.clone(),
            instructions: FALLBACK_INSTRUCTIONS.to_string(),
            input: vec![Message::user(request)],
            output: OutputFormat::JsonSchema {
                name: FALLBACK_SCHEMA.to_string(),
                schema: json!({
                    "type": "object",
                    "properties": {"daw": flag, "arranger": flag, "drummer": flag},
                    "required": ["daw", "arranger", "drummer"],
                    "additionalProperties": false,
                }),
            },
        }
    }

    async fn fallback(&self, request: &str) -> ProviderResult<Vec<Capability>> {
        let response = self.provider.generate(&self.fallback_request(request)).await?;
        let answer: FallbackAnswer = serde_json::from_str(response.text.trim())?;
        Ok(answer.selected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Script, ScriptedProvider};

    fn classifier(provider: ScriptedProvider) -> (Classifier, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let classifier = Classifier::new(KeywordTable::embedded(), provider.clone(), "mini");
        (classifier, provider)
    }

    #[test]
    fn hint_for_another_capability_triggers_fallback() {
        let (classifier, _) = classifier(ScriptedProvider::new());
        let detection = classifier.detect("add a vibe to the track");
        assert_eq!(detection.capabilities, vec![Capability::Daw]);
        assert!(detection.hints.contains(&Capability::Arranger));
        assert!(detection.fallback);
        assert!(!classifier.detect("add reverb to track 1").fallback);
    }

    #[tokio::test]
    async fn fallback_answer_is_merged_with_keywords() {
        let (classifier, provider) = classifier(ScriptedProvider::new().with(
            FALLBACK_SCHEMA,
            Script::text(r#"{"daw": false, "arranger": true, "drummer": false}"#),
        ));
        let classification = classifier
            .classify("add a vibe to the track")
            .await
            .expect("classified");
        assert_eq!(classification.tier, Tier::Fallback);
        assert!(classification.contains(Capability::Daw));
        assert!(classification.contains(Capability::Arranger));
        assert_eq!(provider.calls_for(FALLBACK_SCHEMA), 1);
        assert_eq!(provider.requests()[0].model, "mini");
    }

    #[tokio::test]
    async fn fallback_error_keeps_keyword_matches() {
        let (classifier, _) =
            classifier(ScriptedProvider::new().with(FALLBACK_SCHEMA, Script::fail("overloaded")));
        let classification = classifier
            .classify("add a vibe to the track")
            .await
            .expect("keywords kept");
        assert_eq!(classification.tier, Tier::KeywordsAfterFallbackError);
        assert_eq!(classification.capabilities.len(), 1);
    }

    #[tokio::test]
    async fn fallback_error_without_keywords_is_a_classification_error() {
        let (classifier, _) =
            classifier(ScriptedProvider::new().with(FALLBACK_SCHEMA, Script::text("not json")));
        let err = classifier.classify("bake me a cake").await.expect_err("no answer");
        assert!(matches!(err, OrchestratorError::Classification(_)));
        assert!(!err.is_user_facing());
    }
}
