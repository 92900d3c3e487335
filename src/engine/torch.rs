//! TorchScript causal LM backend.

use std::sync::Arc;

use parking_lot::Mutex;
use tch::{Device, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;
use tracing::debug;

use crate::error::EngineError;

use super::{
    DecodeRequest, EventStream, FinishReason, IncrementalText, InferenceEngine, LoadOptions,
    StopControl, StreamEvent, Usage, sampler::Sampler,
};

/// Special tokens tried, in order, when resolving the stop token.
const EOS_CANDIDATES: [&str; 5] = ["</s>", "<|endoftext|>", "<|eot_id|>", "<eos>", "<|im_end|>"];

pub struct TorchEngine {
    model_id: String,
    tokenizer: Arc<Tokenizer>,
    device: Device,
    ctx_size: usize,
    eos_token_id: Option<u32>,
    module: Mutex<tch::CModule>,
}

impl TorchEngine {
    pub fn load(options: &LoadOptions) -> Result<Self, EngineError> {
        if !options.model_path.exists() {
            return Err(EngineError::Load(format!(
                "model artifact missing: {}",
                options.model_path.display()
            )));
        }
        let tokenizer = Tokenizer::from_file(options.tokenizer_path.as_path())
            .map_err(|e| EngineError::Tokenizer(e.to_string()))?;

        if options.n_threads > 0 {
            tch::set_num_threads(options.n_threads as i32);
        }
        let device = parse_device(&options.device);
        let mut module = tch::CModule::load_on_device(&options.model_path, device)
            .map_err(|e| EngineError::Load(e.to_string()))?;
        module.set_eval();

        let eos_token_id = resolve_eos(&tokenizer);
        debug!(?eos_token_id, ?device, "torchscript model loaded");

        Ok(Self {
            model_id: options.model_path.display().to_string(),
            tokenizer: Arc::new(tokenizer),
            device,
            ctx_size: options.ctx_size,
            eos_token_id,
            module: Mutex::new(module),
        })
    }

    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>, EngineError> {
        let encoding = self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Scores for the next token given the full sequence so far.
    fn next_scores(&self, input_ids: &[i64]) -> Result<Vec<f32>, EngineError> {
        no_grad(|| {
            let input = Tensor::from_slice(input_ids)
                .reshape([1, input_ids.len() as i64])
                .to(self.device);

            let output = self
                .module
                .lock()
                .forward_is(&[tch::IValue::Tensor(input)])
                .map_err(|e| EngineError::Decode(e.to_string()))?;

            // Traced models return either the logits or a (logits, past) tuple.
            let logits = match output {
                tch::IValue::Tensor(t) => t,
                tch::IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                    tch::IValue::Tensor(t) => t.shallow_clone(),
                    _ => {
                        return Err(EngineError::Decode(
                            "expected tensor as first tuple element".into(),
                        ));
                    }
                },
                _ => return Err(EngineError::Decode("unexpected model output format".into())),
            };

            let last = logits
                .select(1, -1)
                .squeeze()
                .to_kind(Kind::Float)
                .to(Device::Cpu);
            Vec::<f32>::try_from(&last).map_err(|e| EngineError::Decode(e.to_string()))
        })
    }
}

impl InferenceEngine for TorchEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>, EngineError> {
        self.encode(text, false)
    }

    fn stream(&self, request: DecodeRequest) -> Result<EventStream<'_>, EngineError> {
        let mut input_ids: Vec<i64> = self
            .encode(&request.prompt, true)?
            .into_iter()
            .map(i64::from)
            .collect();
        if input_ids.is_empty() {
            input_ids.push(0);
        }
        Ok(Box::new(TorchStream {
            engine: self,
            prompt_tokens: input_ids.len(),
            input_ids,
            generated: Vec::new(),
            emitted: IncrementalText::new(),
            remaining: request.max_new_tokens,
            stop: request.stop,
            sampler: Sampler::new(request.sampling),
            done: false,
        }))
    }
}

struct TorchStream<'a> {
    engine: &'a TorchEngine,
    input_ids: Vec<i64>,
    prompt_tokens: usize,
    generated: Vec<u32>,
    emitted: IncrementalText,
    remaining: usize,
    stop: StopControl,
    sampler: Sampler,
    done: bool,
}

impl TorchStream<'_> {
    fn finish(&mut self, reason: FinishReason) -> StreamEvent {
        self.done = true;
        StreamEvent::finished(reason, Usage::new(self.prompt_tokens, self.generated.len()))
    }

    fn step(&mut self) -> Result<StreamEvent, EngineError> {
        let context_full =
            self.engine.ctx_size > 0 && self.input_ids.len() >= self.engine.ctx_size;
        if self.remaining == 0 || context_full {
            return Ok(self.finish(FinishReason::Length));
        }
        self.remaining -= 1;

        let mut scores = self.engine.next_scores(&self.input_ids)?;
        let eos = self.engine.eos_token_id;
        match &self.stop {
            StopControl::Natural => {}
            StopControl::IgnoreEos => {
                if let Some(score) = eos.and_then(|id| scores.get_mut(id as usize)) {
                    *score = f32::NEG_INFINITY;
                }
            }
            StopControl::Adjust(adjuster) => adjuster.adjust(&self.generated, &mut scores),
        }

        let Some(token) = self.sampler.sample(&mut scores, &self.generated) else {
            return Err(EngineError::Decode("every token was masked out".into()));
        };
        if Some(token) == eos {
            return Ok(self.finish(FinishReason::Stop));
        }

        self.generated.push(token);
        self.input_ids.push(i64::from(token));

        // Re-decode the whole completion so multi-token characters come out whole.
        let text = self
            .engine
            .tokenizer
            .decode(&self.generated, true)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))?;
        Ok(StreamEvent::delta(self.emitted.advance(text)))
    }
}

impl Iterator for TorchStream<'_> {
    type Item = Result<StreamEvent, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let event = self.step();
        if event.is_err() {
            self.done = true;
        }
        Some(event)
    }
}

fn resolve_eos(tokenizer: &Tokenizer) -> Option<u32> {
    EOS_CANDIDATES
        .iter()
        .find_map(|candidate| tokenizer.token_to_id(candidate))
}

fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            return Device::Cuda(idx);
        }
    }
    Device::Cpu
}
