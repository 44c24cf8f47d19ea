use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied input was rejected before any state changed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The LLM provider refused the request because of quota or rate limits.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// The LLM provider failed for any other reason (network, 5xx, parse).
    #[error("provider error: {0}")]
    Provider(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// True for the provider failure family that the turn orchestrator maps
    /// to an in-conversation fallback reply instead of surfacing.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::Provider(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_failures_are_classified() {
        assert!(Error::RateLimited("429".into()).is_provider_failure());
        assert!(Error::Provider("boom".into()).is_provider_failure());
        assert!(!Error::Validation("bad".into()).is_provider_failure());
        assert!(!Error::Database("locked".into()).is_provider_failure());
    }
}
