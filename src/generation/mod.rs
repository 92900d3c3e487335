mod orchestrator;
pub mod strategy;
mod types;

pub use orchestrator::{Generator, GeneratorSettings, SecondPass, first_pass_budget};
pub use strategy::{
    MinCharLengthAdjuster, StaticBias, StrategyKind, Suppression, SuppressionSettings,
    SuppressionState,
};
pub use types::{GenerationMeta, GenerationResult, LengthBounds, PassStop};
