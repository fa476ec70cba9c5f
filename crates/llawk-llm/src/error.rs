#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{provider} API request failed (status {status})")]
    Api {
        provider: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("failed to dial {provider}: {reason}")]
    Dial {
        provider: &'static str,
        reason: String,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("SSE parse error: {0}")]
    SseParse(String),

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("unknown model: {0}\nUse --model list to see available models")]
    UnknownModel(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;
