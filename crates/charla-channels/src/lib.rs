pub mod traits;
pub mod whatsapp;

pub use traits::{Channel, ChannelStatus};
pub use whatsapp::{WhatsAppEvent, WhatsAppOnMessageFn, WhatsAppWebChannel};
