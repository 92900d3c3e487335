use std::{path::PathBuf, sync::Arc};

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{config::AppConfig, error::EngineError, text::SENTENCE_END_CHARS};

use super::InferenceEngine;

/// Builds an engine from load options. Called at most once per handle.
pub type EngineLoader =
    Box<dyn Fn(&LoadOptions) -> Result<Arc<dyn InferenceEngine>, EngineError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub n_threads: usize,
    pub ctx_size: usize,
    pub device: String,
}

impl LoadOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model_path: config.model_path.clone(),
            tokenizer_path: config.tokenizer_path.clone(),
            n_threads: config.n_threads,
            ctx_size: config.ctx_size,
            device: config.device.clone(),
        }
    }
}

/// A loaded engine with the vocabulary lookups resolved at load time.
pub struct LoadedEngine {
    engine: Arc<dyn InferenceEngine>,
    punctuation_ids: Vec<u32>,
}

impl LoadedEngine {
    pub fn resolve(engine: Arc<dyn InferenceEngine>) -> Self {
        let mut punctuation_ids = Vec::with_capacity(SENTENCE_END_CHARS.len());
        for ch in SENTENCE_END_CHARS {
            match engine.tokenize(ch.encode_utf8(&mut [0u8; 4])) {
                Ok(ids) => {
                    if let Some(&id) = ids.first() {
                        if !punctuation_ids.contains(&id) {
                            punctuation_ids.push(id);
                        }
                    }
                }
                Err(err) => debug!(?ch, %err, "punctuation not tokenizable"),
            }
        }
        if engine.eos_token_id().is_none() {
            warn!(
                model = engine.model_id(),
                "stop token id unresolved; length floor is not enforced"
            );
        }
        Self {
            engine,
            punctuation_ids,
        }
    }

    pub fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }

    pub fn punctuation_ids(&self) -> &[u32] {
        &self.punctuation_ids
    }
}

/// Process-wide engine slot. The first caller loads the model under the
/// cell's guard; later callers read it without locking.
pub struct EngineHandle {
    options: LoadOptions,
    loader: EngineLoader,
    loaded: OnceCell<LoadedEngine>,
}

impl EngineHandle {
    pub fn new(options: LoadOptions, loader: EngineLoader) -> Self {
        Self {
            options,
            loader,
            loaded: OnceCell::new(),
        }
    }

    /// Wraps an engine that is already constructed.
    pub fn from_engine(engine: Arc<dyn InferenceEngine>) -> Self {
        let model_path = PathBuf::from(engine.model_id());
        Self {
            options: LoadOptions {
                tokenizer_path: model_path.clone(),
                model_path,
                n_threads: 1,
                ctx_size: 0,
                device: "cpu".into(),
            },
            loader: Box::new(|_: &LoadOptions| {
                Err(EngineError::Load("engine was provided pre-loaded".into()))
            }),
            loaded: OnceCell::with_value(LoadedEngine::resolve(engine)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Returns the engine, loading it on first use. `model_override` only
    /// takes effect for the call that performs the load.
    pub fn get(&self, model_override: Option<&str>) -> Result<&LoadedEngine, EngineError> {
        if let Some(loaded) = self.loaded.get() {
            if let Some(path) = model_override {
                if path != loaded.engine.model_id() {
                    debug!(
                        requested = path,
                        loaded = loaded.engine.model_id(),
                        "model override ignored; engine already initialised"
                    );
                }
            }
            return Ok(loaded);
        }

        self.loaded.get_or_try_init(|| {
            let mut options = self.options.clone();
            if let Some(path) = model_override {
                options.model_path = PathBuf::from(path);
            }
            info!(
                model = %options.model_path.display(),
                threads = options.n_threads,
                ctx = options.ctx_size,
                "loading inference engine"
            );
            let engine = (self.loader)(&options)?;
            Ok(LoadedEngine::resolve(engine))
        })
    }
}
