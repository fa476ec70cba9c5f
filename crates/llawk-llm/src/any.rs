use crate::backend::{LlmBackend, TextStream};
use crate::claude::ClaudeBackend;
use crate::error::LlmError;
use crate::gemini::GeminiBackend;
use crate::ollama::OllamaBackend;
use crate::openai::OpenAiBackend;
use crate::request::Request;

/// Generates a match over all `AnyBackend` variants, binding the inner backend
/// and evaluating the given closure for each arm.
macro_rules! delegate_backend {
    ($self:expr, |$b:ident| $expr:expr) => {
        match $self {
            AnyBackend::OpenAi($b) => $expr,
            AnyBackend::Gemini($b) => $expr,
            AnyBackend::Ollama($b) => $expr,
            AnyBackend::Claude($b) => $expr,
        }
    };
}

#[derive(Debug)]
pub enum AnyBackend {
    OpenAi(OpenAiBackend),
    Gemini(GeminiBackend),
    Ollama(OllamaBackend),
    Claude(ClaudeBackend),
}

impl LlmBackend for AnyBackend {
    async fn invoke(&self, request: &Request) -> Result<TextStream, LlmError> {
        delegate_backend!(self, |b| b.invoke(request).await)
    }

    fn name(&self) -> &'static str {
        delegate_backend!(self, |b| b.name())
    }
}
