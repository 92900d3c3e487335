use std::{
    env, fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

use anyhow::Context;

use crate::{
    engine::SamplingParams,
    generation::{StrategyKind, strategy},
    text::BoundarySearch,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub n_threads: usize,
    pub ctx_size: usize,
    pub device: String,
    pub min_len: usize,
    pub max_len: usize,
    pub system_prompt: Option<String>,
    pub sampling: SamplingParams,
    pub strategy: StrategyKind,
    pub eos_bias: f32,
    pub punctuation_bias: f32,
    pub second_pass: bool,
    pub second_pass_tokens: usize,
    pub trim_boundary: BoundarySearch,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unparseable numbers fall back to
    /// their defaults; an unknown strategy or unreadable prompt file is an error.
    pub fn from_source<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<f64>().ok());

        let listen_addr = var("SERVER_ADDR")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000));

        let model_path = PathBuf::from(var("MODEL_PATH").unwrap_or_else(|| "model.ts".into()));
        let tokenizer_path = PathBuf::from(
            var("TOKENIZER_PATH").unwrap_or_else(|| "tokenizer.json".to_string()),
        );
        let n_threads = parse_or(&var, "N_THREADS", 4);
        let ctx_size = parse_or(&var, "CTX_SIZE", 4096);
        let device = var("DEVICE").unwrap_or_else(|| "cpu".into());

        let min_len = parse_or(&var, "MIN_LEN", 120);
        let max_len = parse_or(&var, "MAX_LEN", 240);

        let system_prompt = match var("SYSTEM_PROMPT_FILE") {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("reading SYSTEM_PROMPT_FILE {path}"))?;
                Some(raw.trim_end_matches('\n').to_string())
            }
            None => None,
        };

        let sampling = SamplingParams {
            temperature: parse_or(&var, "TEMPERATURE", 0.7),
            top_p: parse_or(&var, "TOP_P", 0.95),
            top_k: var("TOP_K").and_then(|v| v.trim().parse().ok()),
            min_p: parsed("MIN_P"),
            repeat_penalty: parsed("REPEAT_PENALTY"),
        };

        let strategy = match var("STRATEGY") {
            Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
            None => StrategyKind::LogitsProcessor,
        };
        let eos_bias = parse_or(&var, "EOS_BIAS", strategy::DEFAULT_EOS_BIAS);
        let punctuation_bias = parse_or(&var, "PUNCT_BIAS", strategy::DEFAULT_PUNCTUATION_BIAS);

        let second_pass = var("SECOND_PASS")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        let second_pass_tokens = parse_or(&var, "SECOND_PASS_TOKENS", 48);

        let trim_boundary = var("TRIM_BOUNDARY")
            .and_then(|v| BoundarySearch::parse(&v))
            .unwrap_or_default();

        Ok(Self {
            listen_addr,
            model_path,
            tokenizer_path,
            n_threads,
            ctx_size,
            device,
            min_len,
            max_len,
            system_prompt,
            sampling,
            strategy,
            eos_bias,
            punctuation_bias,
            second_pass,
            second_pass_tokens,
            trim_boundary,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
