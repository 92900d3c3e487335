//! Token sampling over a host-side score vector.

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::SamplingParams;

pub struct Sampler {
    params: SamplingParams,
    rng: StdRng,
}

impl Sampler {
    pub fn new(params: SamplingParams) -> Self {
        Self {
            params,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(params: SamplingParams, seed: u64) -> Self {
        Self {
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Picks the next token. Returns `None` when every score is masked out.
    pub fn sample(&mut self, scores: &mut [f32], history: &[u32]) -> Option<u32> {
        if let Some(penalty) = self.params.repeat_penalty {
            apply_repeat_penalty(scores, history, penalty as f32);
        }

        if self.params.temperature <= 0.0 {
            return argmax(scores);
        }
        let temperature = self.params.temperature as f32;
        if temperature != 1.0 {
            scores.iter_mut().for_each(|s| *s /= temperature);
        }

        let mut probs = softmax(scores)?;
        if let Some(k) = self.params.top_k.filter(|&k| k > 0) {
            keep_top_k(&mut probs, k);
        }
        if self.params.top_p < 1.0 {
            keep_top_p(&mut probs, self.params.top_p as f32);
        }
        if let Some(min_p) = self.params.min_p.filter(|&p| p > 0.0) {
            keep_min_p(&mut probs, min_p as f32);
        }
        self.draw(&probs)
    }

    fn draw(&mut self, probs: &[(usize, f32)]) -> Option<u32> {
        let total: f32 = probs.iter().map(|(_, p)| p).sum();
        if probs.is_empty() || total <= 0.0 {
            return None;
        }
        let target = self.rng.gen_range(0.0..total);
        let mut acc = 0.0;
        for &(idx, p) in probs {
            acc += p;
            if target < acc {
                return Some(idx as u32);
            }
        }
        probs.last().map(|(idx, _)| *idx as u32)
    }
}

pub fn argmax(scores: &[f32]) -> Option<u32> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_nan() && **s != f32::NEG_INFINITY)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx as u32)
}

fn apply_repeat_penalty(scores: &mut [f32], history: &[u32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let mut seen = history.to_vec();
    seen.sort_unstable();
    seen.dedup();
    for token in seen {
        if let Some(score) = scores.get_mut(token as usize) {
            if *score > 0.0 {
                *score /= penalty;
            } else {
                *score *= penalty;
            }
        }
    }
}

/// Probabilities of every finite score, sorted most likely first.
fn softmax(scores: &[f32]) -> Option<Vec<(usize, f32)>> {
    let max = scores
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .max_by(|a, b| a.total_cmp(b))?;
    let mut probs: Vec<(usize, f32)> = scores
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .map(|(idx, s)| (idx, (s - max).exp()))
        .collect();
    let sum: f32 = probs.iter().map(|(_, p)| p).sum();
    probs.iter_mut().for_each(|(_, p)| *p /= sum);
    probs.sort_by(|a, b| b.1.total_cmp(&a.1));
    Some(probs)
}

fn keep_top_k(probs: &mut Vec<(usize, f32)>, k: usize) {
    probs.truncate(k.max(1));
}

fn keep_top_p(probs: &mut Vec<(usize, f32)>, top_p: f32) {
    let mut acc = 0.0;
    let mut cutoff = probs.len();
    for (i, (_, p)) in probs.iter().enumerate() {
        acc += p;
        if acc >= top_p {
            cutoff = i + 1;
            break;
        }
    }
    probs.truncate(cutoff.max(1));
}

fn keep_min_p(probs: &mut Vec<(usize, f32)>, min_p: f32) {
    let Some(&(_, best)) = probs.first() else {
        return;
    };
    let floor = best * min_p;
    probs.retain(|(_, p)| *p >= floor);
}
