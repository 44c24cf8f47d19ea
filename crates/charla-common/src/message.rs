use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted conversation message. Created only by the history store on
/// append; immutable afterwards, deleted only in bulk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Globally monotonic id. For a fixed identity, ids grow with append
    /// order; this is the sole ordering guarantee.
    pub id: i64,
    pub identity: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Sender> {
        match value {
            "user" => Some(Sender::User),
            "assistant" => Some(Sender::Assistant),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_round_trips_through_str() {
        assert_eq!(Sender::parse(Sender::User.as_str()), Some(Sender::User));
        assert_eq!(
            Sender::parse(Sender::Assistant.as_str()),
            Some(Sender::Assistant)
        );
        assert_eq!(Sender::parse("ai"), None);
    }

    #[test]
    fn message_serializes_camel_case() {
        let msg = StoredMessage {
            id: 7,
            identity: "alice".to_string(),
            sender: Sender::Assistant,
            content: "hola".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["id"], 7);
        assert_eq!(json["sender"], "assistant");
        assert!(json.get("identity").is_some());
    }
}
