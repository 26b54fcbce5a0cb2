use async_trait::async_trait;

use super::types::{ProviderKind, Turn};

/// Outcome of a failed remote call.
///
/// The dispatch layer picks the user-visible reply by variant, so adapters must
/// classify provider failures here instead of stringifying them upstream.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// The provider refused to produce output (safety filter, recitation block, ...).
    #[error("content rejected: {reason}")]
    ContentRejected { reason: String },

    /// Any other transport or service failure.
    #[error("{0}")]
    Service(String),
}

/// Model client interface used by chat sessions.
///
/// Implementations are stateless with respect to conversations: the full
/// transcript (persona preamble included) is passed on every call and the last
/// turn is the new user message.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn provider(&self) -> ProviderKind;

    async fn generate(&self, history: &[Turn]) -> Result<String, ModelError>;
}
