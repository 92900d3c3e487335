#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use bounded_generation_service::{
    EngineError, EngineHandle, Generator, GeneratorSettings, InferenceEngine, StrategyKind,
    engine::{
        DecodeRequest, EventStream, FinishReason, SamplingParams, StopControl, StreamEvent, Usage,
        sampler::argmax,
    },
    generation::{SecondPass, SuppressionSettings},
    text::BoundarySearch,
};

pub const EOS: u32 = 2;
const FIRST_PIECE_ID: u32 = 3;
const PIECE_SCORE: f32 = 5.0;
const EOS_WANTED: f32 = 10.0;
const EOS_UNWANTED: f32 = -5.0;

/// What one decode session was asked to do.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub prompt: String,
    pub max_new_tokens: usize,
    pub stop: String,
}

/// Deterministic stand-in for a model. Each step it favours the next piece of
/// its script, cycling, and after `stop_after` steps it prefers its stop token
/// strongly enough that only suppression keeps it going.
pub struct ScriptedEngine {
    pub pieces: Vec<String>,
    pub stop_after: usize,
    pub expose_eos: bool,
    pub usage_on_every_event: bool,
    pub fail_with: Option<String>,
    pub requests: Mutex<Vec<RecordedRequest>>,
    pub score_log: Mutex<Vec<Vec<f32>>>,
}

impl ScriptedEngine {
    pub fn new<S: Into<String>>(pieces: impl IntoIterator<Item = S>, stop_after: usize) -> Self {
        Self {
            pieces: pieces.into_iter().map(Into::into).collect(),
            stop_after,
            expose_eos: true,
            usage_on_every_event: false,
            fail_with: None,
            requests: Mutex::new(Vec::new()),
            score_log: Mutex::new(Vec::new()),
        }
    }

    /// `"A" * 40` followed by `mark`, streamed in 8-character chunks, then a
    /// natural stop.
    pub fn chunked_a40(mark: &str) -> Self {
        let text = format!("{}{}", "A".repeat(40), mark);
        let chars: Vec<char> = text.chars().collect();
        let pieces: Vec<String> = chars.chunks(8).map(|c| c.iter().collect()).collect();
        let steps = pieces.len();
        Self::new(pieces, steps)
    }

    pub fn without_eos(mut self) -> Self {
        self.expose_eos = false;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    fn vocab_size(&self) -> usize {
        FIRST_PIECE_ID as usize + self.pieces.len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

impl InferenceEngine for ScriptedEngine {
    fn model_id(&self) -> &str {
        "scripted"
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.expose_eos.then_some(EOS)
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>, EngineError> {
        Ok(self
            .pieces
            .iter()
            .position(|p| p == text)
            .map(|idx| vec![FIRST_PIECE_ID + idx as u32])
            .unwrap_or_default())
    }

    fn stream(&self, request: DecodeRequest) -> Result<EventStream<'_>, EngineError> {
        if let Some(message) = &self.fail_with {
            return Err(EngineError::Decode(message.clone()));
        }
        self.requests.lock().push(RecordedRequest {
            prompt: request.prompt.clone(),
            max_new_tokens: request.max_new_tokens,
            stop: request.stop.label().to_string(),
        });
        Ok(Box::new(ScriptedStream {
            engine: self,
            budget: request.max_new_tokens,
            stop: request.stop,
            step: 0,
            history: Vec::new(),
            prompt_tokens: request.prompt.chars().count(),
            done: false,
        }))
    }
}

struct ScriptedStream<'a> {
    engine: &'a ScriptedEngine,
    budget: usize,
    stop: StopControl,
    step: usize,
    history: Vec<u32>,
    prompt_tokens: usize,
    done: bool,
}

impl ScriptedStream<'_> {
    fn usage(&self) -> Usage {
        Usage::new(self.prompt_tokens, self.history.len())
    }
}

impl Iterator for ScriptedStream<'_> {
    type Item = Result<StreamEvent, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.step >= self.budget {
            self.done = true;
            return Some(Ok(StreamEvent::finished(FinishReason::Length, self.usage())));
        }

        let mut scores = vec![0.0f32; self.engine.vocab_size()];
        let piece = self.step % self.engine.pieces.len();
        scores[FIRST_PIECE_ID as usize + piece] = PIECE_SCORE;
        scores[EOS as usize] = if self.step >= self.engine.stop_after {
            EOS_WANTED
        } else {
            EOS_UNWANTED
        };

        match &self.stop {
            StopControl::Natural => {}
            StopControl::IgnoreEos => scores[EOS as usize] = f32::NEG_INFINITY,
            StopControl::Adjust(adjuster) => adjuster.adjust(&self.history, &mut scores),
        }
        self.engine.score_log.lock().push(scores.clone());
        self.step += 1;

        let token = argmax(&scores)?;
        if token == EOS {
            self.done = true;
            return Some(Ok(StreamEvent::finished(FinishReason::Stop, self.usage())));
        }
        self.history.push(token);
        let text = self.engine.pieces[(token - FIRST_PIECE_ID) as usize].clone();
        let mut event = StreamEvent::delta(text);
        if self.engine.usage_on_every_event {
            event.usage = Some(self.usage());
        }
        Some(Ok(event))
    }
}

pub fn settings(kind: StrategyKind) -> GeneratorSettings {
    GeneratorSettings {
        min_len: 16,
        max_len: 64,
        sampling: SamplingParams::default(),
        suppression: SuppressionSettings {
            kind,
            ..SuppressionSettings::default()
        },
        second_pass: SecondPass::default(),
        boundary: BoundarySearch::SnippetEdge,
    }
}

pub fn generator(engine: Arc<ScriptedEngine>, settings: GeneratorSettings) -> Generator {
    Generator::new(
        Arc::new(EngineHandle::from_engine(engine as Arc<dyn InferenceEngine>)),
        settings,
    )
}

pub const ALL_STRATEGIES: [StrategyKind; 3] = [
    StrategyKind::IgnoreEos,
    StrategyKind::LogitBias,
    StrategyKind::LogitsProcessor,
];
