use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use std::path::Path;

use crate::face::{self, DetectedFace, Detection, Embedding, ALIGNED_FACE_SIZE};

/// Produces the full detection set for one image: every face with its embedding.
///
/// Implementations may hold stateful inference sessions, hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<DetectedFace>>;
}

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerOptions {
    /// Square detector input edge in pixels, a multiple of 32.
    pub det_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            det_size: 640,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces → align → encode
pub struct FaceAnalyzer {
    pub detector: Session,
    pub encoder: Session,
    options: AnalyzerOptions,
}

impl FaceAnalyzer {
    pub fn new(detector_model: &Path, recognizer_model: &Path, options: AnalyzerOptions) -> Result<Self> {
        face::check_det_size(options.det_size)?;
        Ok(Self {
            detector: crate::model::detector_session(detector_model)?,
            encoder: crate::model::recognizer_session(recognizer_model)?,
            options,
        })
    }

    pub fn options(&self) -> AnalyzerOptions {
        self.options
    }
}

impl FaceDetector for FaceAnalyzer {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let detections = face::detect_faces(
            &mut self.detector,
            img,
            self.options.det_size,
            self.options.score_threshold,
            self.options.nms_threshold,
        )
        .context("detecting faces")?;
        log::debug!("{} face(s) after nms", detections.len());

        let encoder = &mut self.encoder;
        Ok(embed_detections(&detections, |detection| {
            let crop = face::align_face(img, detection, ALIGNED_FACE_SIZE)
                .context("aligning face")?;
            face::encode_face(encoder, &crop).context("encoding face")
        }))
    }
}

/// Embed each detection, dropping faces that cannot be aligned or encoded.
///
/// A failed background face leaves the rest of the set intact; if every face
/// fails the set comes back empty.
fn embed_detections<F>(detections: &[Detection], mut embed: F) -> Vec<DetectedFace>
where
    F: FnMut(&Detection) -> Result<Embedding>,
{
    detections
        .iter()
        .filter_map(|detection| match embed(detection) {
            Ok(embedding) => Some(DetectedFace {
                bbox: detection.bbox,
                confidence: detection.score,
                embedding,
            }),
            Err(e) => {
                log::warn!(
                    "skipping face at ({:.0}, {:.0}): {e:#}",
                    detection.bbox.x1,
                    detection.bbox.y1
                );
                None
            }
        })
        .collect()
}
