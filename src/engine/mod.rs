//! The inference engine seam: what the generation core needs from a loaded
//! model, plus the lazily initialised handle that owns it.

mod handle;
mod incremental;
pub mod sampler;
#[cfg(feature = "tch-backend")]
pub mod torch;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub use handle::{EngineHandle, EngineLoader, LoadOptions, LoadedEngine};
pub use incremental::IncrementalText;

/// Sampling knobs forwarded to the engine on every decode session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: Option<usize>,
    pub min_p: Option<f64>,
    pub repeat_penalty: Option<f64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: None,
            min_p: None,
            repeat_penalty: None,
        }
    }
}

/// Mutates the vocabulary scores of one decode step before sampling.
pub trait ScoreAdjuster: Send + Sync {
    /// `history` holds the tokens generated so far in this session.
    fn adjust(&self, history: &[u32], scores: &mut [f32]);

    fn name(&self) -> &'static str;
}

/// How the engine treats its stop token during a session.
#[derive(Clone, Default)]
pub enum StopControl {
    /// Stop when the model emits its stop token.
    #[default]
    Natural,
    /// Never stop on the stop token; only the token budget ends the session.
    IgnoreEos,
    /// Run the adjuster over the scores of every step.
    Adjust(Arc<dyn ScoreAdjuster>),
}

impl StopControl {
    pub fn label(&self) -> &'static str {
        match self {
            StopControl::Natural => "natural",
            StopControl::IgnoreEos => "ignore_eos",
            StopControl::Adjust(adjuster) => adjuster.name(),
        }
    }
}

impl std::fmt::Debug for StopControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub prompt: String,
    pub max_new_tokens: usize,
    pub sampling: SamplingParams,
    pub stop: StopControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model chose its stop token.
    Stop,
    /// The token budget or context window ran out.
    Length,
}

/// One incremental decode step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamEvent {
    pub delta: String,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            ..Self::default()
        }
    }

    pub fn finished(reason: FinishReason, usage: Usage) -> Self {
        Self {
            delta: String::new(),
            usage: Some(usage),
            finish_reason: Some(reason),
        }
    }
}

/// Finite, non-restartable sequence of decode events, pulled by one consumer.
pub type EventStream<'a> = Box<dyn Iterator<Item = Result<StreamEvent, EngineError>> + 'a>;

pub trait InferenceEngine: Send + Sync {
    /// Identifier reported in generation metadata, usually the model path.
    fn model_id(&self) -> &str;

    /// The stop token, when the backend can resolve one.
    fn eos_token_id(&self) -> Option<u32>;

    /// Tokenizes without adding special tokens.
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, EngineError>;

    fn stream(&self, request: DecodeRequest) -> Result<EventStream<'_>, EngineError>;
}

/// The loader used by the binary: the TorchScript backend when compiled in.
pub fn default_loader() -> EngineLoader {
    #[cfg(feature = "tch-backend")]
    {
        Box::new(|options: &LoadOptions| {
            let engine = torch::TorchEngine::load(options)?;
            Ok(Arc::new(engine) as Arc<dyn InferenceEngine>)
        })
    }
    #[cfg(not(feature = "tch-backend"))]
    {
        Box::new(|_: &LoadOptions| {
            Err(EngineError::Load(
                "no inference backend compiled in; rebuild with --features tch-backend".into(),
            ))
        })
    }
}
