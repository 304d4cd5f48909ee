pub mod config;
pub mod scorer;
pub mod selector;
pub mod verify;

// Re-export vision types for convenience
pub use facematch_vision::{decode_image, face, pipeline, BoundingBox, DetectedFace, Embedding};
pub use scorer::{score, MatchResult, ScoreError};
pub use selector::select_main_face;
pub use verify::{Verifier, VerifyError, VerifyResponse};
