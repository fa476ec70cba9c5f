//! The immutable per-invocation request and its rendered prompts.

use chrono::{SecondsFormat, Utc};

const SYSTEM_TEMPLATE: &str = include_str!("../prompt/system.txt");
const USER_TEMPLATE: &str = include_str!("../prompt/user.txt");

/// Requested output shape. Exactly one variant holds per request; the schema
/// text lives inside its variant and is validated before dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    JsonSchema(String),
}

impl OutputFormat {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Text => "plain text",
            Self::Json => "JSON",
            Self::JsonSchema(_) => "JSON Schema",
        }
    }

    #[must_use]
    pub fn schema_text(&self) -> Option<&str> {
        match self {
            Self::JsonSchema(text) => Some(text),
            _ => None,
        }
    }
}

/// One invocation's worth of input. Built once by the CLI, never mutated.
#[derive(Clone, Debug)]
pub struct Request {
    pub instruct: String,
    pub input: String,
    pub input_name: String,
    pub format: OutputFormat,
    pub output_name: String,
    pub verbose: bool,
}

impl Request {
    /// Render the system prompt from the embedded template and the current
    /// wall-clock time.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        render(SYSTEM_TEMPLATE, &[("current_time", &now)])
    }

    /// Render the user prompt: instruction and input verbatim, plus a clause
    /// naming the requested output format.
    #[must_use]
    pub fn user_prompt(&self) -> String {
        let format_clause = match &self.format {
            OutputFormat::Text => "Respond in plain text.".to_owned(),
            OutputFormat::Json => "Respond with a single JSON document.".to_owned(),
            OutputFormat::JsonSchema(schema) => format!(
                "Respond with a single JSON document conforming to this JSON Schema:\n{schema}"
            ),
        };
        render(
            USER_TEMPLATE,
            &[
                ("instruction", &self.instruct),
                ("input_name", &self.input_name),
                ("input", &self.input),
                ("format_clause", &format_clause),
            ],
        )
    }
}

fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.strip_suffix('\n').unwrap_or(template).to_owned();
    for (key, value) in values {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}
