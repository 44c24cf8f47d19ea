pub mod error;
pub mod identity;
pub mod message;
pub mod settings;

pub use error::{Error, Result};
pub use identity::Identity;
pub use message::{Sender, StoredMessage};
pub use settings::{Settings, SettingsPatch};
