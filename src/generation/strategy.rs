//! Strategies that keep the model from stopping before the length floor.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    engine::{ScoreAdjuster, StopControl},
    text::count_chars,
};

pub const DEFAULT_EOS_BIAS: f32 = -10.0;
pub const DEFAULT_PUNCTUATION_BIAS: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Disable stop-token handling for the whole first pass.
    IgnoreEos,
    /// Add a fixed penalty to the stop token's score.
    LogitBias,
    /// Mask the stop token per step until the floor is reached.
    LogitsProcessor,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::IgnoreEos => "ignore_eos",
            StrategyKind::LogitBias => "logit_bias",
            StrategyKind::LogitsProcessor => "logits_processor",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "ignore_eos" | "a" => Ok(StrategyKind::IgnoreEos),
            "logit_bias" | "b" => Ok(StrategyKind::LogitBias),
            "logits_processor" | "min_length" | "c" => Ok(StrategyKind::LogitsProcessor),
            other => Err(format!("unknown suppression strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuppressionSettings {
    pub kind: StrategyKind,
    /// Added to the stop token's score by the static bias strategy.
    pub eos_bias: f32,
    /// Added to punctuation scores once the adaptive strategy releases.
    pub punctuation_bias: f32,
}

impl Default for SuppressionSettings {
    fn default() -> Self {
        Self {
            kind: StrategyKind::LogitsProcessor,
            eos_bias: DEFAULT_EOS_BIAS,
            punctuation_bias: DEFAULT_PUNCTUATION_BIAS,
        }
    }
}

/// Fixed sparse score offsets applied on every step.
#[derive(Debug, Clone, Default)]
pub struct StaticBias {
    bias: HashMap<u32, f32>,
}

impl StaticBias {
    /// An empty map when the stop token is unknown.
    pub fn for_eos(eos_token_id: Option<u32>, bias: f32) -> Self {
        Self {
            bias: eos_token_id.map(|id| (id, bias)).into_iter().collect(),
        }
    }

    pub fn entries(&self) -> &HashMap<u32, f32> {
        &self.bias
    }

    pub fn is_empty(&self) -> bool {
        self.bias.is_empty()
    }
}

impl ScoreAdjuster for StaticBias {
    fn adjust(&self, _history: &[u32], scores: &mut [f32]) {
        for (&id, &bias) in &self.bias {
            if let Some(score) = scores.get_mut(id as usize) {
                *score += bias;
            }
        }
    }

    fn name(&self) -> &'static str {
        "static_bias"
    }
}

#[derive(Debug, Clone)]
pub struct SuppressionState {
    pub eos_token_id: Option<u32>,
    pub min_len: usize,
    pub chars: usize,
    pub released: bool,
    pub punctuation_ids: Vec<u32>,
    pub punctuation_bias: f32,
}

/// Masks the stop token until the accumulated text reaches `min_len`, then
/// nudges sentence-ending punctuation upwards.
pub struct MinCharLengthAdjuster {
    state: Mutex<SuppressionState>,
}

impl MinCharLengthAdjuster {
    pub fn new(
        eos_token_id: Option<u32>,
        min_len: usize,
        punctuation_ids: &[u32],
        punctuation_bias: f32,
    ) -> Self {
        let mut ids = punctuation_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Self {
            state: Mutex::new(SuppressionState {
                eos_token_id,
                min_len,
                chars: 0,
                released: min_len == 0,
                punctuation_ids: ids,
                punctuation_bias,
            }),
        }
    }

    /// Refreshes the character count from the full accumulated text.
    pub fn update_char_count(&self, accumulated: &str) {
        let chars = count_chars(accumulated);
        let mut state = self.state.lock();
        state.chars = chars;
        if !state.released && chars >= state.min_len {
            state.released = true;
        }
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    pub fn snapshot(&self) -> SuppressionState {
        self.state.lock().clone()
    }
}

impl ScoreAdjuster for MinCharLengthAdjuster {
    fn adjust(&self, _history: &[u32], scores: &mut [f32]) {
        let state = self.state.lock();
        if !state.released {
            if let Some(score) = state.eos_token_id.and_then(|id| scores.get_mut(id as usize)) {
                *score = f32::NEG_INFINITY;
            }
            return;
        }
        for &id in &state.punctuation_ids {
            if let Some(score) = scores.get_mut(id as usize) {
                *score += state.punctuation_bias;
            }
        }
    }

    fn name(&self) -> &'static str {
        "min_char_length"
    }
}

/// The suppression configured for one generation call.
pub enum Suppression {
    IgnoreEos,
    StaticBias(Arc<StaticBias>),
    Adaptive(Arc<MinCharLengthAdjuster>),
}

impl Suppression {
    pub fn build(
        settings: &SuppressionSettings,
        eos_token_id: Option<u32>,
        punctuation_ids: &[u32],
        min_len: usize,
    ) -> Self {
        match settings.kind {
            StrategyKind::IgnoreEos => Suppression::IgnoreEos,
            StrategyKind::LogitBias => Suppression::StaticBias(Arc::new(StaticBias::for_eos(
                eos_token_id,
                settings.eos_bias,
            ))),
            StrategyKind::LogitsProcessor => Suppression::Adaptive(Arc::new(
                MinCharLengthAdjuster::new(
                    eos_token_id,
                    min_len,
                    punctuation_ids,
                    settings.punctuation_bias,
                ),
            )),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Suppression::IgnoreEos => StrategyKind::IgnoreEos,
            Suppression::StaticBias(_) => StrategyKind::LogitBias,
            Suppression::Adaptive(_) => StrategyKind::LogitsProcessor,
        }
    }

    /// Stop control for the first pass. A floor of zero needs no suppression
    /// for the coarse strategies.
    pub fn stop_control(&self, min_len: usize) -> StopControl {
        match self {
            Suppression::IgnoreEos if min_len > 0 => StopControl::IgnoreEos,
            Suppression::StaticBias(bias) if min_len > 0 && !bias.is_empty() => {
                StopControl::Adjust(bias.clone())
            }
            Suppression::Adaptive(adjuster) => StopControl::Adjust(adjuster.clone()),
            _ => StopControl::Natural,
        }
    }

    /// Whether the first pass is cut as soon as the floor is reached. The
    /// adaptive strategy instead lets the model stop on its own once released.
    pub fn halts_at_min_len(&self) -> bool {
        !matches!(self, Suppression::Adaptive(_))
    }

    pub fn observe(&self, accumulated: &str) {
        if let Suppression::Adaptive(adjuster) = self {
            adjuster.update_char_count(accumulated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategy_names() {
        assert_eq!("ignore_eos".parse::<StrategyKind>(), Ok(StrategyKind::IgnoreEos));
        assert_eq!("Logit-Bias".parse::<StrategyKind>(), Ok(StrategyKind::LogitBias));
        assert_eq!(
            "logits_processor".parse::<StrategyKind>(),
            Ok(StrategyKind::LogitsProcessor)
        );
        assert!("beam".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn static_bias_penalises_known_eos() {
        let bias = StaticBias::for_eos(Some(2), -10.0);
        let mut scores = vec![1.0; 4];
        bias.adjust(&[], &mut scores);
        assert_eq!(scores, vec![1.0, 1.0, -9.0, 1.0]);
    }

    #[test]
    fn static_bias_is_empty_without_eos() {
        let bias = StaticBias::for_eos(None, -10.0);
        assert!(bias.entries().is_empty());
        let mut scores = vec![0.5; 3];
        bias.adjust(&[], &mut scores);
        assert_eq!(scores, vec![0.5; 3]);
    }

    #[test]
    fn static_bias_ignores_out_of_range_ids() {
        let bias = StaticBias::for_eos(Some(99), -10.0);
        let mut scores = vec![0.0; 3];
        bias.adjust(&[], &mut scores);
        assert_eq!(scores, vec![0.0; 3]);
    }

    #[test]
    fn adjuster_masks_eos_until_released() {
        let adjuster = MinCharLengthAdjuster::new(Some(5), 10, &[7], 0.5);
        let mut scores = vec![0.0; 10];
        adjuster.adjust(&[], &mut scores);
        assert_eq!(scores[5], f32::NEG_INFINITY);
        assert_eq!(scores[7], 0.0);

        adjuster.update_char_count("short");
        let mut scores = vec![0.0; 10];
        adjuster.adjust(&[], &mut scores);
        assert_eq!(scores[5], f32::NEG_INFINITY);
    }

    #[test]
    fn adjuster_biases_punctuation_after_release() {
        let adjuster = MinCharLengthAdjuster::new(Some(5), 3, &[7, 8], 0.5);
        adjuster.update_char_count("abc");
        assert!(adjuster.is_released());

        let mut scores = vec![1.0; 10];
        adjuster.adjust(&[], &mut scores);
        assert_eq!(scores[5], 1.0);
        assert_eq!(scores[7], 1.5);
        assert_eq!(scores[8], 1.5);
        assert_eq!(scores[0], 1.0);
    }

    #[test]
    fn release_is_one_way() {
        let adjuster = MinCharLengthAdjuster::new(Some(1), 4, &[], 0.3);
        adjuster.update_char_count("abcd");
        assert!(adjuster.is_released());
        adjuster.update_char_count("");
        assert!(adjuster.is_released());
        assert_eq!(adjuster.snapshot().chars, 0);
    }

    #[test]
    fn release_uses_composed_character_count() {
        let adjuster = MinCharLengthAdjuster::new(Some(1), 4, &[], 0.3);
        adjuster.update_char_count("cafe\u{301}");
        assert!(adjuster.is_released());
        assert_eq!(adjuster.snapshot().chars, 4);
    }

    #[test]
    fn zero_floor_starts_released() {
        let adjuster = MinCharLengthAdjuster::new(Some(2), 0, &[3], 0.3);
        assert!(adjuster.is_released());
        let mut scores = vec![0.0; 4];
        adjuster.adjust(&[], &mut scores);
        assert_eq!(scores[2], 0.0);
        assert!((scores[3] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn unknown_eos_never_masks_anything() {
        let adjuster = MinCharLengthAdjuster::new(None, 50, &[], 0.3);
        let mut scores = vec![0.25; 4];
        adjuster.adjust(&[], &mut scores);
        assert_eq!(scores, vec![0.25; 4]);
    }

    #[test]
    fn stop_control_follows_strategy_and_floor() {
        let settings = |kind| SuppressionSettings {
            kind,
            ..SuppressionSettings::default()
        };

        let ignore = Suppression::build(&settings(StrategyKind::IgnoreEos), Some(2), &[], 16);
        assert!(matches!(ignore.stop_control(16), StopControl::IgnoreEos));
        assert!(matches!(ignore.stop_control(0), StopControl::Natural));

        let bias = Suppression::build(&settings(StrategyKind::LogitBias), None, &[], 16);
        assert!(matches!(bias.stop_control(16), StopControl::Natural));

        let adaptive =
            Suppression::build(&settings(StrategyKind::LogitsProcessor), Some(2), &[], 0);
        assert!(matches!(adaptive.stop_control(0), StopControl::Adjust(_)));
        assert!(!adaptive.halts_at_min_len());
        assert_eq!(adaptive.kind(), StrategyKind::LogitsProcessor);
    }
}
