//! Sampling utilities for generation.
//!
//! Implements top-k filtering, temperature scaling and multinomial sampling.
//!
//! Ties are broken by lowest token id everywhere: top-k keeps the lower ids when several
//! logits share the k-th value, and arg-max returns the lowest id among equal maxima. A top-k of
//! one therefore always selects the arg-max.

use std::cmp::Ordering;

use rand::Rng;

use crate::error::{GptError, Result};

/// Reject top-k of zero and negative or non-finite temperatures.
///
/// # Errors
/// Returns [`GptError::Sampling`] describing the offending parameter.
pub fn validate_sampling(top_k: Option<usize>, temperature: f32) -> Result<()> {
    if top_k == Some(0) {
        return Err(GptError::Sampling("top_k must be positive".to_string()));
    }
    if !temperature.is_finite() || temperature < 0.0 {
        return Err(GptError::Sampling(format!(
            "temperature must be a finite non-negative number, got {temperature}"
        )));
    }
    Ok(())
}

/// Sample a token ID from a logits vector.
///
/// `top_k` filtering is applied first. With `temperature == 0` the arg-max of the filtered
/// logits is returned and `rng` is not used; otherwise the filtered logits are shifted by their
/// maximum, divided by `temperature`, softmaxed and sampled.
///
/// Parameters are assumed valid (see [`validate_sampling`]).
#[must_use]
pub fn sample_from_logits<R: Rng + ?Sized>(
    logits: &[f32],
    temperature: f32,
    top_k: Option<usize>,
    rng: &mut R,
) -> u32 {
    let mut filtered = logits.to_vec();

    if let Some(k) = top_k {
        top_k_filter_in_place(&mut filtered, k);
    }

    if temperature <= 0.0 {
        return argmax(&filtered);
    }

    // Best logit becomes 0, so no temperature can overflow it to +inf.
    let max_logit = filtered
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max_logit.is_finite() {
        return argmax(&filtered);
    }
    for v in &mut filtered {
        *v = (*v - max_logit) / temperature;
    }

    let probs = softmax(&filtered);
    if probs.iter().all(|p| *p == 0.0) {
        return argmax(&filtered);
    }

    sample_multinomial(&probs, rng)
}

/// Index of the largest logit, lowest index on ties. NaN entries are skipped; if no entry
/// beats negative infinity, returns 0.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn argmax(logits: &[f32]) -> u32 {
    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &v) in logits.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = idx;
        }
    }
    best_idx as u32
}

/// Descending by value, NaN last. `sort_by` is stable, so equal values keep index order.
fn descending(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a)
        .unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}

/// Keep exactly the `k` highest logits and set the rest to negative infinity.
pub fn top_k_filter_in_place(logits: &mut [f32], k: usize) {
    if k >= logits.len() {
        return;
    }

    let mut order: Vec<usize> = (0..logits.len()).collect();
    order.sort_by(|&a, &b| descending(logits[a], logits[b]));

    for &idx in &order[k..] {
        logits[idx] = f32::NEG_INFINITY;
    }
}

#[must_use]
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);

    if !max_logit.is_finite() {
        return vec![0.0; logits.len()];
    }

    let mut exps = Vec::with_capacity(logits.len());
    let mut sum = 0.0_f32;
    for &v in logits {
        let e = if v.is_finite() {
            (v - max_logit).exp()
        } else {
            0.0
        };
        sum += e;
        exps.push(e);
    }

    if sum == 0.0 {
        return vec![0.0; logits.len()];
    }

    exps.into_iter().map(|e| e / sum).collect()
}

#[must_use]
#[allow(clippy::cast_possible_truncation)]
fn sample_multinomial<R: Rng + ?Sized>(probs: &[f32], rng: &mut R) -> u32 {
    let r: f32 = rng.r#gen();
    let mut cum = 0.0_f32;
    for (idx, &p) in probs.iter().enumerate() {
        cum += p;
        if r < cum {
            return idx as u32;
        }
    }
    // Numerical edge case: return last non-zero prob, else 0.
    probs.iter().rposition(|p| *p > 0.0).unwrap_or(0) as u32
}
