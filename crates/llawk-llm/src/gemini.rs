use std::collections::BTreeMap;
use std::fmt;

use eventsource_stream::Eventsource;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::backend::{LlmBackend, TextStream};
use crate::error::LlmError;
use crate::request::{OutputFormat, Request};
use crate::schema::SchemaNode;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The one model variant whose API rejects the code-execution tool. Upstream
/// constraint, kept verbatim.
const NO_CODE_EXECUTION_MODEL: &str = "gemini-2.0-flash-lite";

pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiBackend {
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url,
            model,
        }
    }

    /// Build a backend from `GEMINI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Dial`] when the API key is not set.
    pub fn dial(model: &str) -> Result<Self, LlmError> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| LlmError::Dial {
            provider: "gemini",
            reason: "GEMINI_API_KEY is not set".into(),
        })?;
        Ok(Self::new(
            api_key,
            DEFAULT_BASE_URL.to_owned(),
            model.to_owned(),
        ))
    }

    fn tools(&self) -> Option<Vec<Tool>> {
        if self.model == NO_CODE_EXECUTION_MODEL {
            None
        } else {
            Some(vec![Tool {
                code_execution: CodeExecution {},
            }])
        }
    }
}

impl LlmBackend for GeminiBackend {
    async fn invoke(&self, request: &Request) -> Result<TextStream, LlmError> {
        let system = request.system_prompt();
        let user = request.user_prompt();

        let (response_mime_type, response_schema) = match &request.format {
            OutputFormat::Text => ("text/plain", None),
            OutputFormat::Json => ("application/json", None),
            OutputFormat::JsonSchema(text) => {
                let node = SchemaNode::parse(text)?;
                ("application/json", Some(translate(&node)))
            }
        };

        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: &system }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &user }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type,
                response_schema,
            },
            tools: self.tools(),
        };

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("Gemini API error {status}: {text}");
            return Err(LlmError::Api {
                provider: "gemini",
                status,
            });
        }

        Ok(sse_to_stream(response))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Translate a vendor-neutral schema node into the Gemini schema dialect.
/// Pure structural recursion; unrecognized type tags map to
/// `TYPE_UNSPECIFIED` and `required` is copied verbatim.
pub(crate) fn translate(node: &SchemaNode) -> Schema {
    let schema_type = match node.type_tag.as_str() {
        "string" => SchemaType::String,
        "number" => SchemaType::Number,
        "integer" => SchemaType::Integer,
        "boolean" => SchemaType::Boolean,
        "array" => SchemaType::Array,
        "object" => SchemaType::Object,
        _ => SchemaType::Unspecified,
    };

    Schema {
        schema_type,
        format: node.format.clone(),
        description: node.description.clone(),
        nullable: node.nullable,
        enum_values: node.enum_values.clone(),
        properties: node
            .properties
            .iter()
            .map(|(name, child)| (name.clone(), translate(child)))
            .collect(),
        required: node.required.clone(),
        items: node.items.as_deref().map(|items| Box::new(translate(items))),
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
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let text: String = chunk
                .candidates
                .into_iter()
                .next()
                .and_then(|candidate| candidate.content)
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .filter_map(|part| part.text)
                        .collect::<Vec<_>>()
                        .concat()
                })
                .unwrap_or_default();

            if text.is_empty() {
                None
            } else {
                Some(Ok(text))
            }
        }
        Err(e) => Some(Err(LlmError::SseParse(format!(
            "failed to parse SSE data: {e}"
        )))),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Schema>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    code_execution: CodeExecution,
}

#[derive(Serialize)]
struct CodeExecution {}

/// Gemini's native schema representation.
#[derive(Debug, PartialEq, Serialize)]
pub(crate) struct Schema {
    #[serde(rename = "type")]
    schema_type: SchemaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    nullable: bool,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    enum_values: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, Schema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    required: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<Box<Schema>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum SchemaType {
    #[serde(rename = "TYPE_UNSPECIFIED")]
    Unspecified,
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}
