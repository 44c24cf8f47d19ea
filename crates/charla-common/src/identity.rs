use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Web usernames must fit the chat client's input constraints.
const WEB_USERNAME_MIN: usize = 2;
const WEB_USERNAME_MAX: usize = 20;

/// Prefix namespacing WhatsApp conversations away from web usernames, so the
/// same human reachable through both transports stays two identities.
const WHATSAPP_PREFIX: &str = "whatsapp_";

/// Canonical conversation identity plus the human-facing name substituted
/// into persona templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub key: String,
    pub display_name: String,
}

impl Identity {
    /// Resolve a web-chat identity from the chosen username.
    pub fn from_web(username: &str) -> Result<Identity> {
        let trimmed = username.trim();
        let len = trimmed.chars().count();
        if !(WEB_USERNAME_MIN..=WEB_USERNAME_MAX).contains(&len) {
            return Err(Error::Validation(format!(
                "username must be between {WEB_USERNAME_MIN} and {WEB_USERNAME_MAX} characters"
            )));
        }
        Ok(Identity {
            key: trimmed.to_string(),
            display_name: trimmed.to_string(),
        })
    }

    /// Resolve a WhatsApp identity from the inbound event. Always derivable:
    /// the contact's phone number when known, the chat id otherwise.
    pub fn from_whatsapp(number: Option<&str>, chat_id: &str, push_name: Option<&str>) -> Identity {
        let origin = number.filter(|n| !n.is_empty()).unwrap_or(chat_id);
        let display = push_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(origin)
            .to_string();
        Identity {
            key: format!("{WHATSAPP_PREFIX}{origin}"),
            display_name: display,
        }
    }

    pub fn is_whatsapp(&self) -> bool {
        self.key.starts_with(WHATSAPP_PREFIX)
    }
}
