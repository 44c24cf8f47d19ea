use serde::{Deserialize, Serialize};

/// Password the admin panel ships with until the operator changes it.
const DEFAULT_ADMIN_PASSWORD: &str = "SWzv95VBf6";

/// Single global settings record. Loaded from durable storage at startup,
/// mutated only through [`Settings::merge`], persisted after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub enable_group_messages: bool,
    /// Persona template; `{username}` is replaced with the display name.
    pub custom_prompt: Option<String>,
    pub gemini_api_key: Option<String>,
    /// Comma-separated substrings matched against identity keys.
    pub restricted_numbers: Option<String>,
    /// Alternate persona for identities matching `restricted_numbers`.
    pub restricted_prompt: Option<String>,
    pub admin_password: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            enable_group_messages: false,
            custom_prompt: None,
            gemini_api_key: None,
            restricted_numbers: None,
            restricted_prompt: None,
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
        }
    }
}

/// Partial update shape: absent fields keep their prior values. Optional
/// text fields are cleared by sending an empty string.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub enable_group_messages: Option<bool>,
    pub custom_prompt: Option<String>,
    pub gemini_api_key: Option<String>,
    pub restricted_numbers: Option<String>,
    pub restricted_prompt: Option<String>,
    pub admin_password: Option<String>,
}

fn normalize(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Settings {
    /// Merge the fields present in `patch`, leaving the rest untouched.
    pub fn merge(&mut self, patch: SettingsPatch) {
        if let Some(enabled) = patch.enable_group_messages {
            self.enable_group_messages = enabled;
        }
        if let Some(prompt) = patch.custom_prompt {
            self.custom_prompt = normalize(prompt);
        }
        if let Some(key) = patch.gemini_api_key {
            self.gemini_api_key = normalize(key);
        }
        if let Some(numbers) = patch.restricted_numbers {
            self.restricted_numbers = normalize(numbers);
        }
        if let Some(prompt) = patch.restricted_prompt {
            self.restricted_prompt = normalize(prompt);
        }
        if let Some(password) = patch.admin_password
            && !password.trim().is_empty()
        {
            self.admin_password = password;
        }
    }

    /// True iff any configured restricted-numbers entry is a substring of
    /// the identity key.
    pub fn is_restricted_identity(&self, identity_key: &str) -> bool {
        let Some(numbers) = &self.restricted_numbers else {
            return false;
        };
        numbers
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .any(|n| identity_key.contains(n))
    }
}
