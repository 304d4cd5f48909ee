use crate::{DetectedFace, Embedding};

/// Pick the embedding of the principal face in one image.
///
/// The principal face is the one with the largest bounding-box area. When
/// several faces share the largest area, the earliest in `faces` wins, so the
/// result is stable for a given input order. Returns `None` for an empty set,
/// which callers report as "no face detected".
pub fn select_main_face(faces: &[DetectedFace]) -> Option<&Embedding> {
    main_face(faces).map(|face| &face.embedding)
}

/// Same rule as [`select_main_face`], returning the whole detection.
pub fn main_face(faces: &[DetectedFace]) -> Option<&DetectedFace> {
    faces
        .iter()
        .fold(None, |best: Option<&DetectedFace>, face| match best {
            Some(b) if b.bbox.area() >= face.bbox.area() => Some(b),
            _ => Some(face),
        })
}
