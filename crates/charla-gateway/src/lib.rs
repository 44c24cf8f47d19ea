pub mod router;
pub mod state;
pub mod wiring;

pub use router::build_router;
pub use state::{AppState, SharedState};
pub use wiring::whatsapp_on_message;
