use charla_common::{Identity, Sender, Settings, StoredMessage};
use chrono::Local;

use crate::providers::ContextTurn;

/// Built-in persona used when no custom prompt is configured.
pub const DEFAULT_PERSONA: &str = "Eres un asistente de IA que SIEMPRE responde en español. \
Tu nombre es Asistente y te diriges al usuario como \"{username}\". Siempre menciona su nombre \
al menos una vez en cada respuesta de manera natural y amigable. Sin importar el idioma en que \
te escriban, siempre debes responder en español de manera natural y fluida.";

/// Marker prefixed to the assembled persona turn. The history filter keys on
/// it, so stale personas from earlier settings changes never re-enter the
/// context even when the operator's custom prompt is arbitrary text.
pub const INSTRUCTION_HEADER: &str = "[Instrucciones del asistente]";

/// Fixed confirmation paired with the persona turn. The provider interface
/// only accepts alternating user/model turns, so the persona travels as an
/// instruction-and-confirmation pair instead of a hidden system role.
pub const ACKNOWLEDGMENT: &str = "Entendido. Seguiré esas instrucciones en todas mis respuestas.";

/// Resolve the active persona text for an identity: restricted override
/// first, then the custom prompt, then the built-in default. `{username}`
/// is replaced with the identity's human-facing name, and a date/time clause
/// is appended so the model can answer temporal questions.
pub fn resolve_persona(settings: &Settings, identity: &Identity) -> String {
    let template = if settings.is_restricted_identity(&identity.key) {
        settings
            .restricted_prompt
            .as_deref()
            .or(settings.custom_prompt.as_deref())
            .unwrap_or(DEFAULT_PERSONA)
    } else {
        settings.custom_prompt.as_deref().unwrap_or(DEFAULT_PERSONA)
    };

    let persona = template.replace("{username}", &identity.display_name);
    let now = Local::now();
    format!(
        "{persona}\n\nFecha y hora actual: {}.",
        now.format("%d/%m/%Y %H:%M")
    )
}

/// Build the ordered turn sequence handed to the provider:
/// persona, acknowledgment, filtered history, current message.
/// No truncation is performed here; provider-side size limits surface as
/// external call errors.
pub fn assemble_context(
    current_message: &str,
    persona_text: &str,
    history: &[StoredMessage],
) -> Vec<ContextTurn> {
    let mut turns = Vec::with_capacity(history.len() + 3);
    turns.push(ContextTurn::user(format!(
        "{INSTRUCTION_HEADER}\n{persona_text}"
    )));
    turns.push(ContextTurn::model(ACKNOWLEDGMENT));

    for message in history {
        if is_scaffolding(&message.content) || message.content.trim().is_empty() {
            continue;
        }
        let turn = match message.sender {
            Sender::User => ContextTurn::user(message.content.clone()),
            Sender::Assistant => ContextTurn::model(message.content.clone()),
        };
        turns.push(turn);
    }

    turns.push(ContextTurn::user(current_message));
    turns
}

/// Persona-instruction and acknowledgment markers that must never re-enter
/// the assembled context from history.
fn is_scaffolding(content: &str) -> bool {
    content.starts_with(INSTRUCTION_HEADER) || content == ACKNOWLEDGMENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::TurnRole;
    use charla_common::Identity;
    use chrono::Utc;

    fn identity(name: &str) -> Identity {
        Identity::from_web(name).expect("valid username")
    }

    fn message(id: i64, sender: Sender, content: &str) -> StoredMessage {
        StoredMessage {
            id,
            identity: "alice".to_string(),
            sender,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn custom_prompt_substitutes_username() {
        let settings = Settings {
            custom_prompt: Some("Tu nombre es Bot y hablas con {username}.".to_string()),
            ..Settings::default()
        };
        let persona = resolve_persona(&settings, &identity("alice"));
        assert!(persona.contains("hablas con alice."));
        assert!(persona.contains("Fecha y hora actual:"));
    }

    #[test]
    fn prompt_without_placeholder_is_used_verbatim() {
        let settings = Settings {
            custom_prompt: Some("Responde siempre con refranes.".to_string()),
            ..Settings::default()
        };
        let persona = resolve_persona(&settings, &identity("alice"));
        assert!(persona.starts_with("Responde siempre con refranes."));
    }

    #[test]
    fn restricted_identity_gets_the_restricted_prompt() {
        let settings = Settings {
            custom_prompt: Some("C {username}".to_string()),
            restricted_prompt: Some("R {username}".to_string()),
            restricted_numbers: Some("5551234567".to_string()),
            ..Settings::default()
        };

        let restricted = Identity::from_whatsapp(Some("5551234567"), "x@c.us", Some("Eva"));
        let persona = resolve_persona(&settings, &restricted);
        assert!(persona.starts_with("R Eva"));

        let persona = resolve_persona(&settings, &identity("alice"));
        assert!(persona.starts_with("C alice"));
    }

    #[test]
    fn default_persona_applies_without_custom_prompt() {
        let persona = resolve_persona(&Settings::default(), &identity("alice"));
        assert!(persona.contains("Tu nombre es Asistente"));
        assert!(persona.contains("\"alice\""));
    }

    #[test]
    fn empty_history_context_is_exactly_three_turns() {
        let turns = assemble_context("Hola", "persona", &[]);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, TurnRole::User);
        assert!(turns[0].text.starts_with(INSTRUCTION_HEADER));
        assert_eq!(turns[1], ContextTurn::model(ACKNOWLEDGMENT));
        assert_eq!(turns[2], ContextTurn::user("Hola"));
    }

    #[test]
    fn history_maps_senders_and_preserves_order() {
        let history = vec![
            message(1, Sender::User, "Hola"),
            message(2, Sender::Assistant, "Hola, alice"),
        ];
        let turns = assemble_context("¿Qué día es hoy?", "persona", &history);
        assert_eq!(turns.len(), 5);
        assert_eq!(turns[2], ContextTurn::user("Hola"));
        assert_eq!(turns[3], ContextTurn::model("Hola, alice"));
        assert_eq!(turns[4], ContextTurn::user("¿Qué día es hoy?"));
    }

    #[test]
    fn stale_persona_markers_never_survive_the_filter() {
        let history = vec![
            message(1, Sender::User, &format!("{INSTRUCTION_HEADER}\nviejo persona")),
            message(2, Sender::Assistant, ACKNOWLEDGMENT),
            message(3, Sender::User, "Hola"),
            message(4, Sender::Assistant, "  "),
        ];
        let turns = assemble_context("sigo aquí", "persona", &history);
        assert_eq!(turns.len(), 4);
        assert!(
            turns[2..]
                .iter()
                .all(|t| !t.text.starts_with(INSTRUCTION_HEADER) && t.text != ACKNOWLEDGMENT)
        );
        assert_eq!(turns[2], ContextTurn::user("Hola"));
    }
}
