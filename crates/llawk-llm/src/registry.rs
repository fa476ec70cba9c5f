//! The static model catalog and its resolution into live backends.

use crate::any::AnyBackend;
use crate::claude::ClaudeBackend;
use crate::error::LlmError;
use crate::gemini::GeminiBackend;
use crate::ollama::{self, OllamaBackend};
use crate::openai::OpenAiBackend;

/// Built-in default, overridable with `LLAWK_MODEL`.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const CLAUDE_MAX_TOKENS: u32 = 8192;

/// Adapter family plus the per-entry configuration needed to dial it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    OpenAi { stream: bool },
    Gemini,
    Ollama,
    Claude { max_tokens: u32 },
}

#[derive(Debug)]
pub struct ModelEntry {
    pub name: &'static str,
    pub kind: BackendKind,
    matches: Option<fn(&str) -> bool>,
}

/// Declaration order matters: resolution takes the first entry whose name
/// equals the query or whose predicate accepts it.
pub static MODELS: &[ModelEntry] = &[
    ModelEntry {
        name: "gpt-4o",
        kind: BackendKind::OpenAi { stream: true },
        matches: None,
    },
    ModelEntry {
        name: "gpt-4o-mini",
        kind: BackendKind::OpenAi { stream: true },
        matches: None,
    },
    ModelEntry {
        name: "o1",
        kind: BackendKind::OpenAi { stream: false },
        matches: None,
    },
    ModelEntry {
        name: "gemini-1.5-flash",
        kind: BackendKind::Gemini,
        matches: None,
    },
    ModelEntry {
        name: "gemini-1.5-pro",
        kind: BackendKind::Gemini,
        matches: None,
    },
    ModelEntry {
        name: "gemini-2.0-flash-exp",
        kind: BackendKind::Gemini,
        matches: None,
    },
    ModelEntry {
        name: "claude-sonnet-4-5",
        kind: BackendKind::Claude {
            max_tokens: CLAUDE_MAX_TOKENS,
        },
        matches: None,
    },
    ModelEntry {
        name: "claude-haiku-4-5",
        kind: BackendKind::Claude {
            max_tokens: CLAUDE_MAX_TOKENS,
        },
        matches: None,
    },
    ModelEntry {
        name: "ollama:(model name)",
        kind: BackendKind::Ollama,
        matches: Some(|model| model.starts_with(ollama::MODEL_PREFIX)),
    },
];

/// Look up the catalog entry responsible for a model name.
///
/// # Errors
///
/// Returns [`LlmError::UnknownModel`] when no entry matches.
pub fn resolve(model: &str) -> Result<&'static ModelEntry, LlmError> {
    MODELS
        .iter()
        .find(|entry| entry.name == model || entry.matches.is_some_and(|matches| matches(model)))
        .ok_or_else(|| LlmError::UnknownModel(model.to_owned()))
}

/// The model used when `--model` is not given: `LLAWK_MODEL` if set, else the
/// built-in default. Read once at startup and passed explicitly thereafter.
#[must_use]
pub fn default_model() -> String {
    std::env::var("LLAWK_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned())
}

impl ModelEntry {
    /// Construct the live backend for a resolved model name.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Dial`] when the backend's credentials cannot be
    /// resolved from the environment.
    pub fn dial(&self, model: &str) -> Result<AnyBackend, LlmError> {
        match self.kind {
            BackendKind::OpenAi { stream } => {
                Ok(AnyBackend::OpenAi(OpenAiBackend::dial(model, stream)?))
            }
            BackendKind::Gemini => Ok(AnyBackend::Gemini(GeminiBackend::dial(model)?)),
            BackendKind::Ollama => Ok(AnyBackend::Ollama(OllamaBackend::dial(model))),
            BackendKind::Claude { max_tokens } => {
                Ok(AnyBackend::Claude(ClaudeBackend::dial(model, max_tokens)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LlmBackend;

    #[test]
    fn every_catalog_entry_resolves_to_itself() {
        for entry in MODELS {
            let resolved = resolve(entry.name).unwrap();
            assert_eq!(resolved.name, entry.name);
            assert_eq!(resolved.kind, entry.kind);
        }
    }

    #[test]
    fn ollama_prefix_resolves_regardless_of_suffix() {
        for model in ["ollama:llama3.2", "ollama:qwen2.5-coder:7b", "ollama:"] {
            let entry = resolve(model).unwrap();
            assert_eq!(entry.kind, BackendKind::Ollama, "model {model:?}");
        }
    }

    #[test]
    fn unknown_model_is_rejected() {
        let err = resolve("gpt-9000").unwrap_err();
        assert!(matches!(err, LlmError::UnknownModel(_)));
        assert!(err.to_string().contains("gpt-9000"));
    }

    #[test]
    fn bare_ollama_model_name_does_not_resolve() {
        assert!(resolve("llama3.2").is_err());
    }

    #[test]
    fn o1_uses_non_streaming_mode() {
        let entry = resolve("o1").unwrap();
        assert_eq!(entry.kind, BackendKind::OpenAi { stream: false });
    }

    #[test]
    fn default_model_is_in_catalog() {
        assert!(resolve(DEFAULT_MODEL).is_ok());
    }

    #[test]
    fn default_model_env_override() {
        unsafe { std::env::set_var("LLAWK_MODEL", "gemini-1.5-pro") };
        let model = default_model();
        unsafe { std::env::remove_var("LLAWK_MODEL") };
        assert_eq!(model, "gemini-1.5-pro");
    }

    #[test]
    fn dial_ollama_strips_prefix() {
        let entry = resolve("ollama:llama3.2").unwrap();
        let backend = entry.dial("ollama:llama3.2").unwrap();
        assert_eq!(backend.name(), "ollama");
    }
}
