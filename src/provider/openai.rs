use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use super::{
    ContentProvider, OutputFormat, ProviderError, ProviderRequest, ProviderResponse,
    ProviderResult, ProviderSettings, ProviderStream, StreamEvent, Usage,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_LIMIT: usize = 1000;

/// Client for the OpenAI Responses API (`POST {endpoint}/responses`).
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("endpoint", &self.settings.endpoint)
            .field("model", &self.settings.model)
            .field("api_key", &self.settings.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl OpenAiProvider {
    /// Build a client from settings. A missing API key is reported when a
    /// call is made, not here.
    pub fn new(settings: ProviderSettings) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client, settings })
    }

    /// Settings in use.
    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn url(&self) -> String {
        format!("{}/responses", self.settings.endpoint.trim_end_matches('/'))
    }

    fn api_key(&self) -> ProviderResult<&str> {
        self.settings
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProviderError::MissingApiKey)
    }

    /// Request body for the Responses API.
    pub fn request_body(&self, request: &ProviderRequest, stream: bool) -> JsonValue {
        let mut body = json!({
            "model": request.model,
            "instructions": request.instructions,
            "input": request.input,
            "stream": stream,
        });
        if let Some(max) = self.settings.max_output_tokens {
            body["max_output_tokens"] = json!(max);
        }
        if supports_reasoning(&request.model) {
            if let Some(effort) = &self.settings.reasoning_effort {
                body["reasoning"] = json!({ "effort": effort });
            }
        } else if let Some(temperature) = self.settings.temperature {
            body["temperature"] = json!(temperature);
        }
        match &request.output {
            OutputFormat::Text => {}
            OutputFormat::Grammar {
                tool_name,
                description,
                syntax,
                definition,
            } => {
                body["tools"] = json!([{
                    "type": "custom",
                    "name": tool_name,
                    "description": description,
                    "format": {
                        "type": "grammar",
                        "syntax": syntax,
                        "definition": definition,
                    },
                }]);
                body["tool_choice"] = json!("required");
                body["parallel_tool_calls"] = json!(false);
            }
            OutputFormat::JsonSchema { name, schema } => {
                body["text"] = json!({
                    "format": {
                        "type": "json_schema",
                        "name": name,
                        "schema": schema,
                        "strict": true,
                    }
                });
            }
        }
        body
    }

    async fn send(&self, request: &ProviderRequest, stream: bool) -> ProviderResult<reqwest::Response> {
        let key = self.api_key()?;
        let body = self.request_body(request, stream);
        debug!(model = %request.model, stream, output = ?request.output.key(), "provider request");
        let response = self
            .client
            .post(self.url())
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(ERROR_BODY_LIMIT);
            return Err(ProviderError::Status { status, body });
        }
        Ok(response)
    }
}

fn supports_reasoning(model: &str) -> bool {
    model.starts_with("gpt-5") || model.starts_with('o')
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    model: String,
    #[serde(default)]
    output: Vec<OutputItem>,
    usage: Option<Usage>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    CustomToolCall {
        #[serde(default)]
        input: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    OutputText {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl ResponseBody {
    /// Tool-call input wins over message text.
    fn text(&self) -> Option<String> {
        let tool = self.output.iter().find_map(|item| match item {
            OutputItem::CustomToolCall { input } if !input.is_empty() => Some(input.clone()),
            _ => None,
        });
        tool.or_else(|| {
            let text: String = self
                .output
                .iter()
                .filter_map(|item| match item {
                    OutputItem::Message { content } => Some(content),
                    _ => None,
                })
                .flatten()
                .filter_map(|part| match part {
                    ContentPart::OutputText { text } => Some(text.as_str()),
                    ContentPart::Other => None,
                })
                .collect();
            (!text.is_empty()).then_some(text)
        })
    }
}

#[async_trait]
impl ContentProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let timeout = self.settings.timeout();
        let call = async {
            let response = self.send(request, false).await?;
            let body: ResponseBody = response.json().await?;
            if let Some(error) = body.error.as_ref().filter(|e| !e.message.is_empty()) {
                return Err(ProviderError::Remote(error.message.clone()));
            }
            let text = body
                .text()
                .ok_or_else(|| ProviderError::Malformed("response has no output text".into()))?;
            Ok(ProviderResponse {
                model: if body.model.is_empty() {
                    request.model.clone()
                } else {
                    body.model.clone()
                },
                text,
                usage: body.usage,
            })
        };
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout(timeout))?
    }

    async fn stream(&self, request: &ProviderRequest) -> ProviderResult<ProviderStream> {
        let timeout = self.settings.timeout();
        let response = tokio::time::timeout(timeout, self.send(request, true))
            .await
            .map_err(|_| ProviderError::Timeout(timeout))??;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(sse_events(body))
    }
}

/// Incremental decoder for Responses API server-sent events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    text: String,
    completed: bool,
}

impl SseDecoder {
    /// Feed raw bytes and collect the events they complete.
    pub fn push(&mut self, chunk: &[u8]) -> ProviderResult<Vec<StreamEvent>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim_end().strip_prefix("data:") else {
                continue;
            };
            if let Some(event) = self.handle(data.trim())? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Whether a completion event was seen.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Text accumulated from deltas so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    fn handle(&mut self, data: &str) -> ProviderResult<Option<StreamEvent>> {
        if data.is_empty() || data == "[DONE]" {
            return Ok(None);
        }
        let event: JsonValue = serde_json::from_str(data)?;
        let kind = event.get("type").and_then(JsonValue::as_str).unwrap_or_default();
        match kind {
            "response.output_text.delta" | "response.custom_tool_call_input.delta" => {
                let delta = event
                    .get("delta")
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                if delta.is_empty() {
                    return Ok(None);
                }
                self.text.push_str(&delta);
                Ok(Some(StreamEvent::Delta(delta)))
            }
            "response.completed" => {
                self.completed = true;
                let body = event
                    .get("response")
                    .cloned()
                    .map(serde_json::from_value::<ResponseBody>)
                    .transpose()?;
                let usage = body.as_ref().and_then(|body| body.usage);
                let text = body
                    .and_then(|body| body.text())
                    .unwrap_or_else(|| self.text.clone());
                Ok(Some(StreamEvent::Completed { text, usage }))
            }
            "error" | "response.failed" => {
                let message = event
                    .pointer("/error/message")
                    .or_else(|| event.pointer("/response/error/message"))
                    .or_else(|| event.get("message"))
                    .and_then(JsonValue::as_str)
                    .unwrap_or("unknown provider error");
                Err(ProviderError::Remote(message.to_string()))
            }
            _ => Ok(None),
        }
    }
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

fn sse_events(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> ProviderStream {
    let state = SseState {
        body,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                    Ok(events) => state.pending.extend(events),
                    Err(err) => {
                        state.finished = true;
                        return Some((Err(err), state));
                    }
                },
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    state.finished = true;
                    if !state.decoder.is_completed() {
                        warn!("provider stream ended without a completion event");
                        state.pending.push_back(StreamEvent::Completed {
                            text: state.decoder.text().to_string(),
                            usage: None,
                        });
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(ProviderSettings {
            api_key: Some("sk-test".into()),
            max_output_tokens: Some(512),
            ..ProviderSettings::default()
        })
        .expect("client")
    }

    fn request(output: OutputFormat) -> ProviderRequest {
        ProviderRequest {
            model: "gpt-5.1".into(),
            instructions: "emit DSL".into(),
            input: vec![Message::user("make a track")],
            output,
        }
    }

    #[test]
    fn grammar_output_uses_custom_tool() {
        let body = provider().request_body(
            &request(OutputFormat::Grammar {
                tool_name: "daw_dsl".into(),
                description: "structural DSL".into(),
                syntax: "lark".into(),
                definition: "start: \"track()\"".into(),
            }),
            true,
        );
        assert_eq!(body["tools"][0]["type"], "custom");
        assert_eq!(body["tools"][0]["format"]["syntax"], "lark");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_output_tokens"], 512);
        assert_eq!(body["reasoning"]["effort"], "none");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn schema_output_uses_text_format() {
        let body = provider().request_body(
            &request(OutputFormat::JsonSchema {
                name: "capabilities".into(),
                schema: json!({"type": "object"}),
            }),
            false,
        );
        assert_eq!(body["text"]["format"]["type"], "json_schema");
        assert_eq!(body["text"]["format"]["name"], "capabilities");
    }

    #[test]
    fn response_text_prefers_tool_input() {
        let body: ResponseBody = serde_json::from_value(json!({
            "model": "gpt-5.1",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [{"type": "output_text", "text": "ignored"}]},
                {"type": "custom_tool_call", "input": "track()"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 3, "total_tokens": 13}
        }))
        .expect("body");
        assert_eq!(body.text().as_deref(), Some("track()"));
        assert_eq!(body.usage.map(|u| u.total_tokens), Some(13));
    }

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        let first = decoder
            .push(b"event: x\ndata: {\"type\":\"response.custom_tool_call_input.delta\",\"delta\":\"track(\"}\n\ndata: {\"type\":\"response.output_")
            .expect("first chunk");
        assert_eq!(first, vec![StreamEvent::Delta("track(".into())]);
        let second = decoder
            .push(b"text.delta\",\"delta\":\")\"}\n\ndata: {\"type\":\"response.completed\",\"response\":{\"output\":[]}}\n\n")
            .expect("second chunk");
        assert_eq!(
            second,
            vec![
                StreamEvent::Delta(")".into()),
                StreamEvent::Completed {
                    text: "track()".into(),
                    usage: None
                }
            ]
        );
        assert!(decoder.is_completed());
    }

    #[test]
    fn decoder_surfaces_error_events() {
        let mut decoder = SseDecoder::default();
        let err = decoder
            .push(b"data: {\"type\":\"error\",\"error\":{\"message\":\"rate limited\"}}\n")
            .expect_err("error event");
        assert!(matches!(err, ProviderError::Remote(ref msg) if msg == "rate limited"));
    }

    #[tokio::test]
    async fn missing_key_fails_at_call_time() {
        let provider = OpenAiProvider::new(ProviderSettings::default()).expect("client");
        let err = provider
            .generate(&request(OutputFormat::Text))
            .await
            .expect_err("no key");
        assert!(matches!(err, ProviderError::MissingApiKey));
    }
}
