pub mod engine;
pub mod persona;
pub mod providers;

pub use engine::{ChatEngine, TurnOutcome};
pub use providers::{ContextTurn, GeminiProvider, LlmProvider, TurnRole};
