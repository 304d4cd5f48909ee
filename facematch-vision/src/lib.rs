pub mod decode;
pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use decode::decode_image;
pub use face::{BoundingBox, DetectedFace, Detection, Embedding};
pub use pipeline::{AnalyzerOptions, FaceAnalyzer, FaceDetector};
