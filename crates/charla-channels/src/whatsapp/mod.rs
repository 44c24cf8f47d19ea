use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use charla_common::Result;

pub mod web;
pub use web::WhatsAppWebChannel;

/// Inbound WhatsApp message as reported by the sidecar. `from` is the raw
/// chat id the reply must be addressed to; `number` is the contact's phone
/// number when the sidecar could derive one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhatsAppEvent {
    pub from: String,
    pub number: Option<String>,
    pub name: Option<String>,
    pub text: String,
    pub is_group: bool,
    pub mentioned_me: bool,
    pub quoted_from_me: bool,
}

/// Callback invoked per inbound message. Returns `Ok(Some(reply))` to send
/// a reply, `Ok(None)` to drop the event silently (no history mutation),
/// `Err` to log a handler failure.
pub type WhatsAppOnMessageFn = Arc<
    dyn Fn(WhatsAppEvent) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send>>
        + Send
        + Sync,
>;

/// Group gating policy: direct chats always proceed; group messages proceed
/// only when group replies are enabled AND the bot was mentioned or the
/// message quotes something the bot itself sent.
pub fn should_process(event: &WhatsAppEvent, enable_group_messages: bool) -> bool {
    if !event.is_group {
        return true;
    }
    enable_group_messages && (event.mentioned_me || event.quoted_from_me)
}
