pub mod history_store;
pub mod settings_store;
pub mod user_store;

pub use history_store::HistoryStore;
pub use settings_store::{SettingsHandle, SettingsStore};
pub use user_store::{User, UserStore};
