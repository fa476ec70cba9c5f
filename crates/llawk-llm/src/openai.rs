use std::fmt;

use eventsource_stream::Eventsource;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::backend::{LlmBackend, TextStream};
use crate::error::LlmError;
use crate::request::{OutputFormat, Request};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model names whose API rejects an explicit temperature. Upstream constraint,
/// kept verbatim.
const NO_TEMPERATURE_MODELS: [&str; 2] = ["o4-mini", "o3"];

pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    org_id: Option<String>,
    base_url: String,
    model: String,
    stream: bool,
}

impl fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("org_id", &self.org_id.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("stream", &self.stream)
            .finish()
    }
}

impl OpenAiBackend {
    #[must_use]
    pub fn new(
        api_key: String,
        org_id: Option<String>,
        mut base_url: String,
        model: String,
        stream: bool,
    ) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            org_id,
            base_url,
            model,
            stream,
        }
    }

    /// Build a backend from `OPENAI_API_KEY` and optional `OPENAI_ORG_ID`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Dial`] when the API key is not set.
    pub fn dial(model: &str, stream: bool) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| LlmError::Dial {
            provider: "openai",
            reason: "OPENAI_API_KEY is not set".into(),
        })?;
        let org_id = std::env::var("OPENAI_ORG_ID").ok();
        Ok(Self::new(
            api_key,
            org_id,
            DEFAULT_BASE_URL.to_owned(),
            model.to_owned(),
            stream,
        ))
    }

    fn temperature(&self) -> Option<f32> {
        if NO_TEMPERATURE_MODELS.contains(&self.model.as_str()) {
            None
        } else {
            Some(0.0)
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if let Some(ref org_id) = self.org_id {
            builder = builder.header("OpenAI-Organization", org_id);
        }

        let response = builder.json(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("OpenAI API error {status}: {text}");
            return Err(LlmError::Api {
                provider: "openai",
                status,
            });
        }

        Ok(response)
    }
}

impl LlmBackend for OpenAiBackend {
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

        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            temperature: self.temperature(),
            response_format: response_format(&request.format)?,
            stream: self.stream,
        };

        let response = self.send(&body).await?;

        if self.stream {
            Ok(sse_to_stream(response))
        } else {
            let text = response.text().await.map_err(LlmError::Http)?;
            let resp: ChatResponse = serde_json::from_str(&text)?;
            let content = resp
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or(LlmError::EmptyResponse { provider: "openai" })?;
            Ok(Box::pin(tokio_stream::once(Ok(content))))
        }
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

fn response_format(format: &OutputFormat) -> Result<Option<ResponseFormat>, LlmError> {
    match format {
        OutputFormat::Text => Ok(None),
        OutputFormat::Json => Ok(Some(ResponseFormat::JsonObject)),
        OutputFormat::JsonSchema(text) => {
            let schema: serde_json::Value =
                serde_json::from_str(text).map_err(|e| LlmError::InvalidSchema(e.to_string()))?;
            Ok(Some(ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat {
                    name: "Output",
                    schema,
                    strict: true,
                },
            }))
        }
    }
}

fn sse_to_stream(response: reqwest::Response) -> TextStream {
    let events = response.bytes_stream().eventsource();
    let mapped = events.filter_map(|event| match event {
        Ok(event) => parse_sse_event(&event.data),
        Err(e) => Some(Err(LlmError::SseParse(e.to_string()))),
    });
    Box::pin(mapped)
}

fn parse_sse_event(data: &str) -> Option<Result<String, LlmError>> {
    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref())
                .unwrap_or_default();

            if content.is_empty() {
                None
            } else {
                Some(Ok(content.to_owned()))
            }
        }
        Err(e) => Some(Err(LlmError::SseParse(format!(
            "failed to parse SSE data: {e}"
        )))),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat {
    JsonObject,
    JsonSchema { json_schema: JsonSchemaFormat },
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
