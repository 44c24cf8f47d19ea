use async_trait::async_trait;
use charla_common::Result;
use serde::{Deserialize, Serialize};

pub mod gemini;
pub use gemini::GeminiProvider;

/// Trait for LLM provider integrations.
///
/// The request shape is the assembled conversation context: an ordered list
/// of alternating user/model turns. Providers report quota exhaustion as
/// `Error::RateLimited` and every other failure as `Error::Provider`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g. "gemini").
    fn provider_id(&self) -> &str;

    /// Generate the assistant reply for the given context.
    async fn generate(&self, turns: &[ContextTurn]) -> Result<String>;

    /// Check if the provider is available and configured.
    async fn health_check(&self) -> Result<bool>;
}

/// One role-tagged unit of conversation text as sent to the provider.
/// Ephemeral: derived fresh per turn, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ContextTurn {
    pub fn user(text: impl Into<String>) -> Self {
        ContextTurn {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        ContextTurn {
            role: TurnRole::Model,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        }
    }
}
