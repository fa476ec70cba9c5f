use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use crate::backend::{LlmBackend, TextStream};
use crate::error::LlmError;
use crate::request::{OutputFormat, Request};

const DEFAULT_HOST: &str = "http://localhost:11434";

/// Registry prefix routing a model name to this backend. The prefix is
/// stripped before dialing.
pub const MODEL_PREFIX: &str = "ollama:";

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    #[must_use]
    pub fn new(host: &str, model: String) -> Self {
        let host = host.trim_end_matches('/');
        let base_url = if host.contains("://") {
            host.to_owned()
        } else {
            format!("http://{host}")
        };
        Self {
            client: crate::http::default_client(),
            base_url,
            model,
        }
    }

    /// Build a backend from `OLLAMA_HOST` (default `http://localhost:11434`),
    /// stripping the `ollama:` registry prefix from the model name.
    #[must_use]
    pub fn dial(model: &str) -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_owned());
        let model = model.strip_prefix(MODEL_PREFIX).unwrap_or(model);
        Self::new(&host, model.to_owned())
    }
}

impl LlmBackend for OllamaBackend {
    async fn invoke(&self, request: &Request) -> Result<TextStream, LlmError> {
        let system = request.system_prompt();
        let user = request.user_prompt();
        let messages = [
            ApiMessage {
                role: "system",
                content: &system,
            },
            ApiMessage {
                role: "user",
                content: &user,
            },
        ];

        let format = match &request.format {
            OutputFormat::Text => None,
            OutputFormat::Json => Some(serde_json::Value::String("json".into())),
            OutputFormat::JsonSchema(text) => Some(
                serde_json::from_str(text).map_err(|e| LlmError::InvalidSchema(e.to_string()))?,
            ),
        };

        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            stream: true,
            options: Options { temperature: 0.0 },
            format,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("Ollama API error {status}: {text}");
            return Err(LlmError::Api {
                provider: "ollama",
                status,
            });
        }

        Ok(ndjson_to_stream(response))
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

/// Ollama streams one chat-response JSON object per line.
fn ndjson_to_stream(response: reqwest::Response) -> TextStream {
    let reader = StreamReader::new(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other)),
    );
    let lines = FramedRead::new(reader, LinesCodec::new());
    let mapped = lines.filter_map(|line| match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => parse_chat_line(&line),
        Err(e) => Some(Err(LlmError::Other(format!(
            "Ollama stream read failed: {e}"
        )))),
    });
    Box::pin(mapped)
}

fn parse_chat_line(line: &str) -> Option<Result<String, LlmError>> {
    match serde_json::from_str::<ChatResponse>(line) {
        Ok(resp) => {
            if let Some(error) = resp.error {
                return Some(Err(LlmError::Other(format!("Ollama stream error: {error}"))));
            }
            let content = resp.message.map(|m| m.content).unwrap_or_default();
            if content.is_empty() {
                None
            } else {
                Some(Ok(content))
            }
        }
        Err(e) => Some(Err(LlmError::Other(format!(
            "failed to parse Ollama response line: {e}"
        )))),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    stream: bool,
    options: Options,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Options {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}
