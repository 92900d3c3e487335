use serde::{Deserialize, Serialize};

use crate::{
    engine::{FinishReason, Usage},
    error::ServiceError,
    generation::StrategyKind,
};

/// A validated `min_len <= max_len` character window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBounds {
    pub min_len: usize,
    pub max_len: usize,
}

impl LengthBounds {
    pub fn new(min_len: usize, max_len: usize) -> Result<Self, ServiceError> {
        if min_len > max_len {
            return Err(ServiceError::InvalidConfig { min_len, max_len });
        }
        Ok(Self { min_len, max_len })
    }
}

/// Why the first pass stopped reading events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStop {
    MinLenReached,
    EndOfSequence,
    TokenBudget,
    StreamClosed,
}

impl From<FinishReason> for PassStop {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop => PassStop::EndOfSequence,
            FinishReason::Length => PassStop::TokenBudget,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMeta {
    pub model: String,
    pub strategy: StrategyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eos_bias: Option<f32>,
    pub second_pass_used: bool,
    pub min_len: usize,
    pub max_len: usize,
    pub first_pass_chars: usize,
    pub first_pass_stop: PassStop,
    pub generated_chars: usize,
    pub returned_chars: usize,
    /// True when the raw output, before truncation, fell short of `min_len`,
    /// meaning the floor was missed. Either the token budget ran out or the
    /// stop token could not be resolved. It does not report whether the stop
    /// token was masked; the name is kept for response compatibility.
    pub eos_suppressed: bool,
    pub eos_token_resolved: bool,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub meta: GenerationMeta,
}
