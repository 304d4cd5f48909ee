use crate::Embedding;
use serde::Serialize;
use thiserror::Error;

/// Decimal places kept in a reported [`MatchResult`].
pub const SCORE_DECIMALS: i32 = 4;

#[derive(Debug, Error, PartialEq)]
pub enum ScoreError {
    #[error("embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("embeddings are empty")]
    Empty,

    #[error("embedding contains a non-finite value")]
    NonFinite,
}

/// Similarity of two face embeddings.
///
/// `score` is a linear rescaling of `cosine_similarity` from [-1, 1] to
/// [0, 1]. It is not a calibrated match probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub cosine_similarity: f64,
    pub score: f64,
}

/// Map a cosine similarity in [-1, 1] onto [0, 1].
pub fn cosine_to_unit_score(cosine: f64) -> f64 {
    (cosine + 1.0) / 2.0
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Score two embeddings.
///
/// Both embeddings must be L2-normalised: the dot product is taken as the
/// cosine similarity without renormalising. Products accumulate in `f64`
/// and the result is clamped to [-1, 1] to absorb rounding drift. Both
/// reported values are rounded to [`SCORE_DECIMALS`] places after the
/// full-precision computation.
pub fn score(a: &Embedding, b: &Embedding) -> Result<MatchResult, ScoreError> {
    if a.len() != b.len() {
        return Err(ScoreError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(ScoreError::Empty);
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum();
    if !dot.is_finite() {
        return Err(ScoreError::NonFinite);
    }
    if dot.abs() > 1.0 + 1e-3 {
        log::warn!("dot product {dot:.6} outside [-1, 1], embeddings are not unit-norm");
    }

    let cosine = dot.clamp(-1.0, 1.0);
    Ok(MatchResult {
        cosine_similarity: round_to(cosine, SCORE_DECIMALS),
        score: round_to(cosine_to_unit_score(cosine), SCORE_DECIMALS),
    })
}
