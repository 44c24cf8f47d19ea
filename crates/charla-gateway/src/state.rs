use std::sync::Arc;

use charla_agents::ChatEngine;
use charla_channels::WhatsAppWebChannel;
use charla_db::{HistoryStore, SettingsHandle, UserStore};
use tokio::sync::Mutex;

/// Everything the HTTP handlers need, shared across requests.
pub struct AppState {
    pub history: Arc<Mutex<HistoryStore>>,
    pub users: Arc<Mutex<UserStore>>,
    pub settings: Arc<SettingsHandle>,
    pub engine: Arc<ChatEngine>,
    pub whatsapp: Arc<Mutex<WhatsAppWebChannel>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        history: Arc<Mutex<HistoryStore>>,
        users: Arc<Mutex<UserStore>>,
        settings: Arc<SettingsHandle>,
        engine: Arc<ChatEngine>,
        whatsapp: Arc<Mutex<WhatsAppWebChannel>>,
    ) -> SharedState {
        Arc::new(Self {
            history,
            users,
            settings,
            engine,
            whatsapp,
        })
    }
}
