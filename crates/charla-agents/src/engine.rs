use std::sync::Arc;
use std::time::Duration;

use charla_common::{Error, Identity, Result, Sender, StoredMessage};
use charla_db::{HistoryStore, SettingsHandle};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::persona::{assemble_context, resolve_persona};
use crate::providers::LlmProvider;

/// Reply persisted when the provider reports quota exhaustion.
pub const QUOTA_FALLBACK: &str =
    "Lo siento, he alcanzado mi límite de uso por ahora. Inténtalo de nuevo más tarde.";

/// Reply persisted for every other provider failure, including timeouts.
pub const UNAVAILABLE_FALLBACK: &str = "Lo siento, no pude generar una respuesta en este momento.";

const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Both sides of a completed turn, as persisted.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub user_message: StoredMessage,
    pub assistant_message: StoredMessage,
}

/// Per-message control flow: resolve identity (done by the caller), read
/// history, assemble context, invoke the provider, persist both sides.
///
/// Provider failures never abort the turn: they become a fixed Spanish
/// fallback reply so the conversation stays coherent and resumable.
pub struct ChatEngine {
    history: Arc<Mutex<HistoryStore>>,
    settings: Arc<SettingsHandle>,
    provider: Arc<dyn LlmProvider>,
    llm_timeout: Duration,
}

impl ChatEngine {
    pub fn new(
        history: Arc<Mutex<HistoryStore>>,
        settings: Arc<SettingsHandle>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            history,
            settings,
            provider,
            llm_timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub async fn handle_turn(&self, identity: &Identity, content: &str) -> Result<TurnOutcome> {
        if content.trim().is_empty() {
            return Err(Error::Validation("message content must not be empty".into()));
        }

        let settings = self.settings.current();
        let history = {
            let store = self.history.lock().await;
            store.read_all(&identity.key)
        };

        let persona = resolve_persona(&settings, identity);
        let context = assemble_context(content, &persona, &history);

        let reply = match tokio::time::timeout(self.llm_timeout, self.provider.generate(&context))
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("provider failure for '{}': {e}", identity.key);
                fallback_reply(&e).to_string()
            }
            Err(_) => {
                warn!(
                    "provider call for '{}' timed out after {:?}",
                    identity.key, self.llm_timeout
                );
                UNAVAILABLE_FALLBACK.to_string()
            }
        };

        let mut store = self.history.lock().await;
        let user_message = match store.last_message(&identity.key) {
            Some(last) if is_duplicate(Some(last), content) => {
                info!("skipping duplicate user line for '{}'", identity.key);
                last.clone()
            }
            _ => store.append(&identity.key, Sender::User, content),
        };
        let assistant_message = store.append(&identity.key, Sender::Assistant, &reply);

        Ok(TurnOutcome {
            user_message,
            assistant_message,
        })
    }
}

/// Deduplication guard: true iff the identity's most recent stored message
/// is the user's and its content is exactly equal. One-message lookback
/// only — deeper repeats are legitimate and must not be suppressed.
pub fn is_duplicate(last: Option<&StoredMessage>, content: &str) -> bool {
    matches!(last, Some(m) if m.sender == Sender::User && m.content == content)
}

fn fallback_reply(error: &Error) -> &'static str {
    match error {
        Error::RateLimited(_) => QUOTA_FALLBACK,
        _ => UNAVAILABLE_FALLBACK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{ACKNOWLEDGMENT, INSTRUCTION_HEADER};
    use crate::providers::ContextTurn;
    use async_trait::async_trait;
    use charla_common::{Settings, SettingsPatch};
    use charla_db::SettingsStore;
    use chrono::Utc;

    enum Behavior {
        Reply(&'static str),
        RateLimited,
        Unavailable,
        Slow(&'static str),
    }

    struct ScriptedProvider {
        behavior: Behavior,
        seen: std::sync::Mutex<Vec<Vec<ContextTurn>>>,
    }

    impl ScriptedProvider {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                seen: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn last_context(&self) -> Vec<ContextTurn> {
            self.seen.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_id(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, turns: &[ContextTurn]) -> Result<String> {
            self.seen.lock().unwrap().push(turns.to_vec());
            match &self.behavior {
                Behavior::Reply(text) => Ok(text.to_string()),
                Behavior::RateLimited => Err(Error::RateLimited("429".into())),
                Behavior::Unavailable => Err(Error::Provider("connection refused".into())),
                Behavior::Slow(text) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(text.to_string())
                }
            }
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn engine_with(
        provider: Arc<ScriptedProvider>,
    ) -> (ChatEngine, Arc<Mutex<HistoryStore>>, Arc<SettingsHandle>) {
        let history = Arc::new(Mutex::new(
            HistoryStore::in_memory().expect("in-memory history"),
        ));
        let settings = Arc::new(
            SettingsHandle::load(SettingsStore::in_memory().expect("in-memory settings"))
                .expect("settings handle"),
        );
        let engine = ChatEngine::new(Arc::clone(&history), Arc::clone(&settings), provider);
        (engine, history, settings)
    }

    fn alice() -> Identity {
        Identity::from_web("alice").expect("valid username")
    }

    #[tokio::test]
    async fn turn_appends_both_sides_in_order() {
        let provider = ScriptedProvider::new(Behavior::Reply("Hola, alice."));
        let (engine, history, _) = engine_with(Arc::clone(&provider));

        let outcome = engine.handle_turn(&alice(), "Hola").await.expect("turn");
        assert_eq!(outcome.user_message.content, "Hola");
        assert_eq!(outcome.user_message.sender, Sender::User);
        assert_eq!(outcome.assistant_message.content, "Hola, alice.");
        assert_eq!(outcome.assistant_message.id, outcome.user_message.id + 1);

        let store = history.lock().await;
        let messages = store.read_all("alice");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Hola");
        assert_eq!(messages[1].content, "Hola, alice.");
    }

    #[tokio::test]
    async fn rate_limit_persists_the_quota_fallback() {
        let provider = ScriptedProvider::new(Behavior::RateLimited);
        let (engine, history, _) = engine_with(provider);

        let outcome = engine.handle_turn(&alice(), "Hola").await.expect("turn");
        assert_eq!(outcome.assistant_message.content, QUOTA_FALLBACK);

        let store = history.lock().await;
        assert_eq!(store.read_all("alice").len(), 2);
    }

    #[tokio::test]
    async fn provider_failure_persists_the_generic_fallback() {
        let provider = ScriptedProvider::new(Behavior::Unavailable);
        let (engine, _, _) = engine_with(provider);

        let outcome = engine.handle_turn(&alice(), "Hola").await.expect("turn");
        assert_eq!(outcome.assistant_message.content, UNAVAILABLE_FALLBACK);
    }

    #[tokio::test]
    async fn slow_provider_times_out_into_the_generic_fallback() {
        let provider = ScriptedProvider::new(Behavior::Slow("tarde"));
        let (engine, _, _) = engine_with(provider);
        let engine = engine.with_llm_timeout(Duration::from_millis(10));

        let outcome = engine.handle_turn(&alice(), "Hola").await.expect("turn");
        assert_eq!(outcome.assistant_message.content, UNAVAILABLE_FALLBACK);
    }

    #[tokio::test]
    async fn duplicate_user_line_is_not_double_appended() {
        let provider = ScriptedProvider::new(Behavior::Reply("respuesta"));
        let (engine, history, _) = engine_with(provider);

        // The transport already persisted the user's line for this turn.
        let echoed_id = {
            let mut store = history.lock().await;
            store.append("alice", Sender::User, "Hola").id
        };

        let outcome = engine.handle_turn(&alice(), "Hola").await.expect("turn");
        assert_eq!(outcome.user_message.id, echoed_id);

        let store = history.lock().await;
        let messages = store.read_all("alice");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Hola");
        assert_eq!(messages[1].content, "respuesta");
    }

    #[tokio::test]
    async fn legitimate_repeated_messages_are_kept() {
        let provider = ScriptedProvider::new(Behavior::Reply("vale"));
        let (engine, history, _) = engine_with(provider);

        engine.handle_turn(&alice(), "ok").await.expect("first turn");
        engine.handle_turn(&alice(), "ok").await.expect("second turn");

        // The assistant reply sits between the repeats, so nothing dedups.
        let store = history.lock().await;
        assert_eq!(store.read_all("alice").len(), 4);
    }

    #[tokio::test]
    async fn empty_content_is_rejected_without_mutation() {
        let provider = ScriptedProvider::new(Behavior::Reply("nunca"));
        let (engine, history, _) = engine_with(provider);

        let err = engine
            .handle_turn(&alice(), "   ")
            .await
            .expect_err("should reject");
        assert!(matches!(err, Error::Validation(_)));

        let store = history.lock().await;
        assert!(store.read_all("alice").is_empty());
    }

    #[tokio::test]
    async fn context_carries_persona_pair_history_and_current_turn() {
        let provider = ScriptedProvider::new(Behavior::Reply("bien"));
        let (engine, history, _) = engine_with(Arc::clone(&provider));

        {
            let mut store = history.lock().await;
            store.append("alice", Sender::User, "Hola");
            store.append("alice", Sender::Assistant, "Hola, alice");
        }

        engine
            .handle_turn(&alice(), "¿cómo estás?")
            .await
            .expect("turn");

        let context = provider.last_context();
        assert_eq!(context.len(), 5);
        assert!(context[0].text.starts_with(INSTRUCTION_HEADER));
        assert_eq!(context[1].text, ACKNOWLEDGMENT);
        assert_eq!(context[2].text, "Hola");
        assert_eq!(context[3].text, "Hola, alice");
        assert_eq!(context[4].text, "¿cómo estás?");
    }

    #[tokio::test]
    async fn restricted_identity_resolves_the_restricted_persona() {
        let provider = ScriptedProvider::new(Behavior::Reply("sí"));
        let (engine, _, settings) = engine_with(Arc::clone(&provider));

        settings.update(SettingsPatch {
            custom_prompt: Some("C {username}".to_string()),
            restricted_prompt: Some("R {username}".to_string()),
            restricted_numbers: Some("5551234567".to_string()),
            ..SettingsPatch::default()
        });

        let restricted = Identity::from_whatsapp(Some("5551234567"), "x@c.us", Some("Eva"));
        engine.handle_turn(&restricted, "Hola").await.expect("turn");
        assert!(provider.last_context()[0].text.contains("R Eva"));

        engine.handle_turn(&alice(), "Hola").await.expect("turn");
        assert!(provider.last_context()[0].text.contains("C alice"));
    }

    #[test]
    fn dedup_guard_is_exact_and_one_deep() {
        let last = StoredMessage {
            id: 1,
            identity: "alice".to_string(),
            sender: Sender::User,
            content: "hi".to_string(),
            timestamp: Utc::now(),
        };
        assert!(is_duplicate(Some(&last), "hi"));
        assert!(!is_duplicate(Some(&last), "hi there"));
        assert!(!is_duplicate(None, "hi"));

        let assistant = StoredMessage {
            sender: Sender::Assistant,
            ..last
        };
        assert!(!is_duplicate(Some(&assistant), "hi"));
    }

    #[test]
    fn settings_defaults_feed_the_default_persona() {
        // Guards the engine's read path against settings drift.
        let settings = Settings::default();
        assert!(settings.custom_prompt.is_none());
        assert!(!settings.is_restricted_identity("alice"));
    }
}
