use std::sync::Arc;

use charla_agents::ChatEngine;
use charla_channels::whatsapp::{WhatsAppOnMessageFn, should_process};
use charla_common::Identity;
use charla_db::SettingsHandle;
use tracing::info;

/// Bridge the WhatsApp channel into the conversation engine.
///
/// Group messages are gated here, against the settings active at event
/// time: a gated event is dropped silently, mutating no history and sending
/// no reply. Everything that passes runs a full engine turn and replies
/// with the assistant text.
pub fn whatsapp_on_message(
    engine: Arc<ChatEngine>,
    settings: Arc<SettingsHandle>,
) -> WhatsAppOnMessageFn {
    Arc::new(move |event| {
        let engine = Arc::clone(&engine);
        let settings = Arc::clone(&settings);
        Box::pin(async move {
            if !should_process(&event, settings.current().enable_group_messages) {
                return Ok(None);
            }

            let identity =
                Identity::from_whatsapp(event.number.as_deref(), &event.from, event.name.as_deref());
            info!(
                "whatsapp message from {} ({} chars)",
                identity.key,
                event.text.len()
            );

            let outcome = engine.handle_turn(&identity, &event.text).await?;
            Ok(Some(outcome.assistant_message.content))
        })
    })
}
