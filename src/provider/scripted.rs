use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;

use super::{
    ContentProvider, ProviderError, ProviderRequest, ProviderResponse, ProviderResult,
    ProviderStream, StreamEvent,
};

/// Key used for requests with free-text output.
pub const TEXT_KEY: &str = "text";

/// One canned answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    /// Output text, or the failure message to report.
    pub outcome: Result<String, String>,
    /// Delay before answering (and between streamed lines).
    pub delay: Option<Duration>,
}

impl Script {
    /// Answer with `text`.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            outcome: Ok(text.into()),
            delay: None,
        }
    }

    /// Fail with `message`.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            delay: None,
        }
    }

    /// Wait before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Text(String),
    Full {
        #[serde(default)]
        output: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        delay_ms: u64,
    },
}

impl From<ScriptEntry> for Script {
    fn from(entry: ScriptEntry) -> Self {
        match entry {
            ScriptEntry::Text(text) => Script::text(text),
            ScriptEntry::Full {
                output,
                error,
                delay_ms,
            } => Script {
                outcome: match error {
                    Some(message) => Err(message),
                    None => Ok(output.unwrap_or_default()),
                },
                delay: (delay_ms > 0).then(|| Duration::from_millis(delay_ms)),
            },
        }
    }
}

/// Provider answering from a table keyed by tool or schema name.
///
/// Requests are recorded so tests can inspect what was sent.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    scripts: HashMap<String, Script>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    /// Empty table; every call fails with [`ProviderError::Unscripted`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, key: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(key.into(), script);
        self
    }

    /// Load a replay table: `{"daw_dsl": "track()", "arranger_dsl": {"error": "boom"}}`.
    pub fn from_json(text: &str) -> ProviderResult<Self> {
        let entries: HashMap<String, ScriptEntry> = serde_json::from_str(text)?;
        Ok(Self {
            scripts: entries
                .into_iter()
                .map(|(key, entry)| (key, entry.into()))
                .collect(),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests that asked for `key`.
    pub fn calls_for(&self, key: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.output.key().unwrap_or(TEXT_KEY) == key)
            .count()
    }

    fn lookup(&self, request: &ProviderRequest) -> ProviderResult<Script> {
        self.requests.lock().push(request.clone());
        let key = request.output.key().unwrap_or(TEXT_KEY);
        self.scripts
            .get(key)
            .cloned()
            .ok_or_else(|| ProviderError::Unscripted(key.to_string()))
    }
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let script = self.lookup(request)?;
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        let text = script.outcome.map_err(ProviderError::Scripted)?;
        Ok(ProviderResponse {
            model: request.model.clone(),
            text,
            usage: None,
        })
    }

    /// Streams the scripted text one line at a time.
    async fn stream(&self, request: &ProviderRequest) -> ProviderResult<ProviderStream> {
        let script = self.lookup(request)?;
        let text = script.outcome.map_err(ProviderError::Scripted)?;
        let delay = script.delay;
        let mut events: Vec<StreamEvent> = text
            .split_inclusive('\n')
            .map(|line| StreamEvent::Delta(line.to_string()))
            .collect();
        events.push(StreamEvent::Completed { text, usage: None });
        Ok(stream::iter(events)
            .then(move |event| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, ProviderError>(event)
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Message, OutputFormat};

    fn request(key: &str) -> ProviderRequest {
        ProviderRequest {
            model: "test".into(),
            instructions: String::new(),
            input: vec![Message::user("hi")],
            output: OutputFormat::JsonSchema {
                name: key.into(),
                schema: serde_json::json!({}),
            },
        }
    }

    #[tokio::test]
    async fn answers_by_key_and_records_requests() {
        let provider = ScriptedProvider::new().with("a", Script::text("one"));
        let response = provider.generate(&request("a")).await.expect("scripted");
        assert_eq!(response.text, "one");
        assert_eq!(provider.calls_for("a"), 1);
        let err = provider.generate(&request("b")).await.expect_err("unscripted");
        assert!(matches!(err, ProviderError::Unscripted(ref key) if key == "b"));
    }

    #[tokio::test]
    async fn streams_line_by_line() {
        let provider = ScriptedProvider::new().with("a", Script::text("x()\ny()"));
        let events: Vec<_> = provider
            .stream(&request("a"))
            .await
            .expect("stream")
            .collect()
            .await;
        let events: Vec<StreamEvent> = events.into_iter().map(|e| e.expect("event")).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("x()\n".into()),
                StreamEvent::Delta("y()".into()),
                StreamEvent::Completed {
                    text: "x()\ny()".into(),
                    usage: None
                },
            ]
        );
    }

    #[test]
    fn replay_table_from_json() {
        let provider = ScriptedProvider::from_json(
            r#"{"a": "track()", "b": {"error": "down", "delay_ms": 5}}"#,
        )
        .expect("json");
        assert_eq!(provider.scripts["a"], Script::text("track()"));
        assert_eq!(
            provider.scripts["b"],
            Script::fail("down").delayed(Duration::from_millis(5))
        );
    }
}
