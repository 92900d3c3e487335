use std::{sync::Arc, time::Instant};

use tracing::{debug, info};

use crate::{
    config::AppConfig,
    engine::{
        DecodeRequest, EngineHandle, InferenceEngine, SamplingParams, StopControl, Usage,
    },
    error::ServiceError,
    generation::{
        GenerationMeta, GenerationResult, LengthBounds, PassStop, StrategyKind, Suppression,
        SuppressionSettings,
    },
    prompt::{Message, build_prompt},
    text::{BoundarySearch, count_chars, fit_to_max_len},
};

const MIN_FIRST_PASS_TOKENS: usize = 16;
const MAX_SECOND_PASS_TOKENS: usize = 128;

/// First-pass token budget: two thirds of `max_len`, as a rough
/// characters-per-token estimate, but never fewer than 16 tokens.
pub fn first_pass_budget(max_len: usize) -> usize {
    MIN_FIRST_PASS_TOKENS.max(max_len * 2 / 3)
}

/// Optional unconstrained continuation after the first pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecondPass {
    pub enabled: bool,
    pub tokens: usize,
}

impl SecondPass {
    /// Token budget of the second pass, clamped to `1..=128`, or `None` when
    /// the pass is off.
    pub fn budget(&self) -> Option<usize> {
        (self.enabled && self.tokens > 0).then(|| self.tokens.clamp(1, MAX_SECOND_PASS_TOKENS))
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub min_len: usize,
    pub max_len: usize,
    pub sampling: SamplingParams,
    pub suppression: SuppressionSettings,
    pub second_pass: SecondPass,
    pub boundary: BoundarySearch,
}

impl GeneratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_len: config.min_len,
            max_len: config.max_len,
            sampling: config.sampling.clone(),
            suppression: SuppressionSettings {
                kind: config.strategy,
                eos_bias: config.eos_bias,
                punctuation_bias: config.punctuation_bias,
            },
            second_pass: SecondPass {
                enabled: config.second_pass,
                tokens: config.second_pass_tokens,
            },
            boundary: config.trim_boundary,
        }
    }
}

struct PassOutput {
    text: String,
    usage: Option<Usage>,
    stop: PassStop,
}

/// Drives length-controlled generation against a shared engine.
pub struct Generator {
    engine: Arc<EngineHandle>,
    settings: GeneratorSettings,
}

impl Generator {
    pub fn new(engine: Arc<EngineHandle>, settings: GeneratorSettings) -> Self {
        Self { engine, settings }
    }

    pub fn strategy(&self) -> StrategyKind {
        self.settings.suppression.kind
    }

    /// Generates a reply whose length lands in the `min_len..=max_len` window.
    /// Missing bounds fall back to the configured defaults. Blocks until both
    /// passes have drained.
    pub fn generate(
        &self,
        messages: &[Message],
        min_len: Option<usize>,
        max_len: Option<usize>,
        model_override: Option<&str>,
    ) -> Result<GenerationResult, ServiceError> {
        let bounds = LengthBounds::new(
            min_len.unwrap_or(self.settings.min_len),
            max_len.unwrap_or(self.settings.max_len),
        )?;
        let prompt = build_prompt(messages);

        let loaded = self.engine.get(model_override)?;
        let engine = loaded.engine();
        let eos_token_id = engine.eos_token_id();
        let suppression = Suppression::build(
            &self.settings.suppression,
            eos_token_id,
            loaded.punctuation_ids(),
            bounds.min_len,
        );

        let started = Instant::now();
        let first = self.first_pass(engine, &prompt, &suppression, bounds)?;
        let first_pass_chars = count_chars(&first.text);
        debug!(chars = first_pass_chars, stop = ?first.stop, "first pass finished");

        let mut usage = first.usage;
        let mut text = first.text;
        let mut second_pass_used = false;
        if let Some(tokens) = self.settings.second_pass.budget() {
            second_pass_used = true;
            let request = DecodeRequest {
                prompt: format!("{prompt}{text}"),
                max_new_tokens: tokens,
                sampling: self.settings.sampling.clone(),
                stop: StopControl::Natural,
            };
            let second = drain(engine, request, None, |_| {})?;
            debug!(chars = count_chars(&second.text), stop = ?second.stop, "second pass finished");
            text.push_str(&second.text);
            usage = usage.or(second.usage);
        }

        let fixed = fit_to_max_len(&text, bounds.max_len, self.settings.boundary);
        let generated_chars = count_chars(&text);
        let returned_chars = count_chars(&fixed);

        info!(
            strategy = %suppression.kind(),
            generated_chars,
            returned_chars,
            second_pass_used,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation complete"
        );

        let meta = GenerationMeta {
            model: engine.model_id().to_string(),
            strategy: suppression.kind(),
            eos_bias: match &suppression {
                Suppression::StaticBias(_) => Some(self.settings.suppression.eos_bias),
                _ => None,
            },
            second_pass_used,
            min_len: bounds.min_len,
            max_len: bounds.max_len,
            first_pass_chars,
            first_pass_stop: first.stop,
            generated_chars,
            returned_chars,
            eos_suppressed: generated_chars < bounds.min_len,
            eos_token_resolved: eos_token_id.is_some(),
            usage,
        };
        Ok(GenerationResult { text: fixed, meta })
    }

    fn first_pass(
        &self,
        engine: &dyn InferenceEngine,
        prompt: &str,
        suppression: &Suppression,
        bounds: LengthBounds,
    ) -> Result<PassOutput, ServiceError> {
        let request = DecodeRequest {
            prompt: prompt.to_string(),
            max_new_tokens: first_pass_budget(bounds.max_len),
            sampling: self.settings.sampling.clone(),
            stop: suppression.stop_control(bounds.min_len),
        };
        debug!(
            strategy = %suppression.kind(),
            stop = ?request.stop,
            budget = request.max_new_tokens,
            min_len = bounds.min_len,
            max_len = bounds.max_len,
            "starting first pass"
        );
        // With a floor of 0 the coarse strategies stop after the first delta.
        let halt_at = suppression.halts_at_min_len().then_some(bounds.min_len);
        drain(engine, request, halt_at, |accumulated| suppression.observe(accumulated))
    }
}

/// Pulls one decode session to completion, or until the accumulated text
/// reaches `halt_at` characters. `observe` sees the full text after every
/// non-empty delta.
fn drain(
    engine: &dyn InferenceEngine,
    request: DecodeRequest,
    halt_at: Option<usize>,
    observe: impl Fn(&str),
) -> Result<PassOutput, ServiceError> {
    let mut text = String::new();
    let mut usage = None;
    let mut stop = PassStop::StreamClosed;

    for event in engine.stream(request)? {
        let event = event?;
        if usage.is_none() {
            usage = event.usage;
        }
        if let Some(reason) = event.finish_reason {
            stop = reason.into();
        }
        if event.delta.is_empty() {
            continue;
        }
        text.push_str(&event.delta);
        observe(&text);
        if let Some(min_len) = halt_at {
            if count_chars(&text) >= min_len {
                stop = PassStop::MinLenReached;
                break;
            }
        }
    }

    Ok(PassOutput { text, usage, stop })
}
