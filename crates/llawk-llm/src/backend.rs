use std::pin::Pin;

use futures_core::Stream;

use crate::error::LlmError;
use crate::request::Request;

/// Response fragments in arrival order. Each fragment is yielded exactly once;
/// a fragment error terminates the invocation.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// The uniform backend contract: one system + user turn in, a text stream out.
///
/// A backend that has no streaming transport for a given configuration yields
/// the complete result as a single fragment.
pub trait LlmBackend: Send + Sync {
    /// Send the rendered prompts to the backend and stream the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema text cannot be parsed, the network call
    /// fails, or the backend reports a non-success status.
    fn invoke(
        &self,
        request: &Request,
    ) -> impl Future<Output = Result<TextStream, LlmError>> + Send;

    fn name(&self) -> &'static str;
}
