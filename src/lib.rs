//! Length-controlled text generation: keeps a language model talking until a
//! character floor is reached and trims the reply cleanly at a ceiling.

pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod prompt;
pub mod server;
pub mod text;

pub use config::AppConfig;
pub use engine::{EngineHandle, InferenceEngine};
pub use error::{EngineError, ServiceError};
pub use generation::{GenerationResult, Generator, GeneratorSettings, StrategyKind};
pub use prompt::{Message, Role};
pub use server::build_router;
