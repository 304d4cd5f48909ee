//! Selfie vs. identity-document verification.
//!
//! Transport-neutral form of the `/verify` and `/health` endpoints: inputs
//! are raw upload bytes, outputs are serialisable bodies plus an HTTP-style
//! status code for failures.

use std::fmt;
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use facematch_vision::{decode_image, model::MODEL_NAME, FaceAnalyzer, FaceDetector};
use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::scorer::{self, MatchResult, ScoreError};
use crate::selector;
use crate::Embedding;

static SHARED: OnceCell<Verifier> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Selfie,
    Ine,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRole::Selfie => f.write_str("selfie"),
            ImageRole::Ine => f.write_str("INE photo"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("no face detected in the {0}")]
    NoFace(ImageRole),

    #[error("invalid embeddings: {0}")]
    InvalidInput(#[from] ScoreError),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl VerifyError {
    /// 422 when an image has no usable face, 500 for everything else.
    pub fn status_code(&self) -> u16 {
        match self {
            VerifyError::NoFace(_) => 422,
            VerifyError::InvalidInput(_) | VerifyError::Internal(_) => 500,
        }
    }

    pub fn to_body(&self) -> ErrorResponse {
        ErrorResponse {
            status: "error",
            detail: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerifyResponse {
    pub status: &'static str,
    pub score: f64,
    pub cosine_similarity: f64,
    pub model: &'static str,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub is_match: Option<bool>,
}

impl VerifyResponse {
    fn new(result: MatchResult, threshold: Option<f64>) -> Self {
        Self {
            status: "ok",
            score: result.score,
            cosine_similarity: result.cosine_similarity,
            model: MODEL_NAME,
            is_match: threshold.map(|t| result.score >= t),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthResponse {
    pub ok: bool,
}

pub fn health() -> HealthResponse {
    HealthResponse { ok: true }
}

/// Runs decode → detect → select → score for an image pair.
///
/// The detector is locked per image. Selection and scoring run outside the
/// lock.
pub struct Verifier {
    detector: Mutex<Box<dyn FaceDetector>>,
    threshold: Option<f64>,
}

impl Verifier {
    pub fn new(detector: Box<dyn FaceDetector>, threshold: Option<f64>) -> Self {
        Self {
            detector: Mutex::new(detector),
            threshold,
        }
    }

    /// Build a verifier backed by the ONNX models named in `cfg`.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        cfg.validate()?;
        let analyzer = FaceAnalyzer::new(
            &cfg.detector_path(),
            &cfg.recognizer_path(),
            cfg.analyzer_options(),
        )
        .context("Failed to initialize face analysis models")?;
        info!(
            "Loaded models from {} (det_size {})",
            cfg.model_dir.display(),
            cfg.det_size
        );
        Ok(Self::new(Box::new(analyzer), cfg.threshold))
    }

    /// Process-wide verifier. Models load on the first call and stay resident
    /// for the life of the process; later calls ignore `cfg`.
    pub fn shared(cfg: &Config) -> anyhow::Result<&'static Verifier> {
        SHARED.get_or_try_init(|| Self::from_config(cfg))
    }

    pub fn verify(&self, selfie: &[u8], ine: &[u8]) -> Result<VerifyResponse, VerifyError> {
        let selfie_emb = self.main_embedding(selfie, ImageRole::Selfie)?;
        let ine_emb = self.main_embedding(ine, ImageRole::Ine)?;

        let result = scorer::score(&selfie_emb, &ine_emb)?;
        info!(
            "Match score: {:.4} (cosine {:.4})",
            result.score, result.cosine_similarity
        );
        Ok(VerifyResponse::new(result, self.threshold))
    }

    fn main_embedding(&self, bytes: &[u8], role: ImageRole) -> Result<Embedding, VerifyError> {
        let img = decode_image(bytes).with_context(|| format!("reading {role}"))?;
        let faces = {
            let mut detector = self
                .detector
                .lock()
                .map_err(|_| anyhow!("face detector lock poisoned"))?;
            detector
                .detect(&img)
                .with_context(|| format!("analyzing {role}"))?
        };
        debug!("{role}: {} face(s) detected", faces.len());

        selector::select_main_face(&faces)
            .cloned()
            .ok_or(VerifyError::NoFace(role))
    }
}
