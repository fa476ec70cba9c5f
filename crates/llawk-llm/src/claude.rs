use std::fmt;

use eventsource_stream::Eventsource;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::backend::{LlmBackend, TextStream};
use crate::error::LlmError;
use crate::request::Request;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl fmt::Debug for ClaudeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaudeBackend")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ClaudeBackend {
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String, max_tokens: u32) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url,
            model,
            max_tokens,
        }
    }

    /// Build a backend from `ANTHROPIC_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Dial`] when the API key is not set.
    pub fn dial(model: &str, max_tokens: u32) -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| LlmError::Dial {
            provider: "claude",
            reason: "ANTHROPIC_API_KEY is not set".into(),
        })?;
        Ok(Self::new(
            api_key,
            DEFAULT_BASE_URL.to_owned(),
            model.to_owned(),
            max_tokens,
        ))
    }
}

impl LlmBackend for ClaudeBackend {
    async fn invoke(&self, request: &Request) -> Result<TextStream, LlmError> {
        let system = request.system_prompt();
        let user = request.user_prompt();

        let body = MessageRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &system,
            messages: &[ApiMessage {
                role: "user",
                content: &user,
            }],
            temperature: 0.0,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("Claude API error {status}: {text}");
            return Err(LlmError::Api {
                provider: "claude",
                status,
            });
        }

        Ok(sse_to_stream(response))
    }

    fn name(&self) -> &'static str {
        "claude"
    }
}

fn sse_to_stream(response: reqwest::Response) -> TextStream {
    let events = response.bytes_stream().eventsource();
    let mapped = events.filter_map(|event| match event {
        Ok(event) => parse_sse_event(&event.data, &event.event),
        Err(e) => Some(Err(LlmError::SseParse(e.to_string()))),
    });
    Box::pin(mapped)
}

fn parse_sse_event(data: &str, event_type: &str) -> Option<Result<String, LlmError>> {
    match event_type {
        "content_block_delta" => match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => {
                if let Some(delta) = event.delta
                    && delta.delta_type == "text_delta"
                    && !delta.text.is_empty()
                {
                    return Some(Ok(delta.text));
                }
                None
            }
            Err(e) => Some(Err(LlmError::SseParse(format!(
                "failed to parse SSE data: {e}"
            )))),
        },
        "error" => match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => {
                if let Some(err) = event.error {
                    Some(Err(LlmError::SseParse(format!(
                        "Claude stream error ({}): {}",
                        err.error_type, err.message
                    ))))
                } else {
                    Some(Err(LlmError::SseParse(format!(
                        "Claude stream error: {data}"
                    ))))
                }
            }
            Err(_) => Some(Err(LlmError::SseParse(format!(
                "Claude stream error: {data}"
            )))),
        },
        _ => None,
    }
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ApiMessage<'a>],
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::OutputFormat;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_backend(base_url: String) -> ClaudeBackend {
        ClaudeBackend::new(
            "sk-ant-test".into(),
            base_url,
            "claude-sonnet-4-5".into(),
            8192,
        )
    }

    fn text_request() -> Request {
        Request {
            instruct: "Echo the input".into(),
            input: "hello".into(),
            input_name: "<stdin>".into(),
            format: OutputFormat::Text,
            output_name: "<stdout>".into(),
            verbose: false,
        }
    }

    #[test]
    fn debug_redacts_api_key() {
        let backend = test_backend("http://127.0.0.1:1".into());
        let debug = format!("{backend:?}");
        assert!(!debug.contains("sk-ant-test"));
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("claude-sonnet-4-5"));
    }

    #[test]
    fn name_returns_claude() {
        assert_eq!(test_backend("http://127.0.0.1:1".into()).name(), "claude");
    }

    #[test]
    fn message_request_serialization() {
        let messages = [ApiMessage {
            role: "user",
            content: "hi",
        }];
        let body = MessageRequest {
            model: "claude-sonnet-4-5",
            max_tokens: 8192,
            system: "be brief",
            messages: &messages,
            temperature: 0.0,
            stream: true,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"model\":\"claude-sonnet-4-5\""));
        assert!(json.contains("\"max_tokens\":8192"));
        assert!(json.contains("\"system\":\"be brief\""));
        assert!(json.contains("\"temperature\":0.0"));
        assert!(json.contains("\"stream\":true"));
    }

    #[test]
    fn parse_sse_event_text_delta() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        assert_eq!(
            parse_sse_event(data, "content_block_delta").unwrap().unwrap(),
            "Hello"
        );
    }

    #[test]
    fn parse_sse_event_empty_text_delta() {
        let data =
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":""}}"#;
        assert!(parse_sse_event(data, "content_block_delta").is_none());
    }

    #[test]
    fn parse_sse_event_non_text_delta() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{}"}}"#;
        assert!(parse_sse_event(data, "content_block_delta").is_none());
    }

    #[test]
    fn parse_sse_event_error() {
        let data = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = parse_sse_event(data, "error").unwrap().unwrap_err();
        assert!(err.to_string().contains("overloaded_error"));
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn parse_sse_event_lifecycle_events_skipped() {
        assert!(parse_sse_event(r#"{"type":"message_start","message":{}}"#, "message_start").is_none());
        assert!(parse_sse_event(r#"{"type":"message_stop"}"#, "message_stop").is_none());
        assert!(parse_sse_event("{}", "ping").is_none());
    }

    #[test]
    fn parse_sse_event_invalid_json() {
        let err = parse_sse_event("not json", "content_block_delta")
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("failed to parse SSE data"));
    }

    #[tokio::test]
    async fn invoke_streams_text_deltas() {
        let server = MockServer::start().await;
        let sse = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-sonnet-4-5",
                "max_tokens": 8192,
                "temperature": 0.0,
                "stream": true,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = test_backend(server.uri());
        let mut stream = backend.invoke(&text_request()).await.unwrap();

        let mut fragments = Vec::new();
        while let Some(fragment) = stream.next().await {
            fragments.push(fragment.unwrap());
        }
        assert_eq!(fragments, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn invoke_surfaces_api_status_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let backend = test_backend(server.uri());
        let err = match backend.invoke(&text_request()).await {
            Ok(_) => panic!("expected invoke to fail"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            LlmError::Api {
                provider: "claude",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invoke_unreachable_endpoint_errors() {
        let backend = test_backend("http://127.0.0.1:1".into());
        let err = match backend.invoke(&text_request()).await {
            Ok(_) => panic!("expected invoke to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, LlmError::Http(_)));
    }

    #[tokio::test]
    #[ignore = "requires ANTHROPIC_API_KEY env var"]
    async fn integration_claude_invoke() {
        let backend = ClaudeBackend::dial("claude-haiku-4-5", 256).unwrap();
        let mut request = text_request();
        request.instruct = "Reply with exactly: pong".into();

        let mut stream = backend.invoke(&request).await.unwrap();
        let mut out = String::new();
        while let Some(fragment) = stream.next().await {
            out.push_str(&fragment.unwrap());
        }
        assert!(out.to_lowercase().contains("pong"));
    }
}
