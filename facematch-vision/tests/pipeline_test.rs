use anyhow::Result;
use facematch_vision::{
    decode_image, model, AnalyzerOptions, DetectedFace, FaceAnalyzer, FaceDetector,
};
use image::DynamicImage;
use std::path::PathBuf;

fn model_dir() -> PathBuf {
    PathBuf::from(std::env::var("FACEMATCH_MODEL_DIR").unwrap_or_else(|_| "models".to_string()))
}

/// `None` when the ONNX files are not available locally.
fn analyzer() -> Result<Option<FaceAnalyzer>> {
    let dir = model_dir();
    let detector = dir.join(model::DETECTOR_MODEL_FILE);
    let recognizer = dir.join(model::RECOGNIZER_MODEL_FILE);
    if !detector.exists() || !recognizer.exists() {
        eprintln!("Skipping: models not found in {}", dir.display());
        return Ok(None);
    }
    Ok(Some(FaceAnalyzer::new(
        &detector,
        &recognizer,
        AnalyzerOptions::default(),
    )?))
}

fn largest_face(faces: &[DetectedFace]) -> Option<&DetectedFace> {
    faces
        .iter()
        .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()))
}

#[test]
fn test_blank_image_has_no_faces() -> Result<()> {
    env_logger::try_init().ok();
    let Some(mut analyzer) = analyzer()? else {
        return Ok(());
    };
    let faces = analyzer.detect(&DynamicImage::new_rgb8(320, 240))?;
    assert!(faces.is_empty());
    Ok(())
}

#[test]
fn test_embeddings_are_unit_norm() -> Result<()> {
    env_logger::try_init().ok();
    let Some(mut analyzer) = analyzer()? else {
        return Ok(());
    };
    let path = "test_faces/selfie.jpg";
    let Ok(bytes) = std::fs::read(path) else {
        eprintln!("Skipping: {path} not found");
        return Ok(());
    };

    let faces = analyzer.detect(&decode_image(&bytes)?)?;
    assert!(!faces.is_empty(), "expected a face in {path}");
    for face in &faces {
        assert!((face.embedding.norm() - 1.0).abs() < 1e-4);
        assert!(face.bbox.x1 < face.bbox.x2 && face.bbox.y1 < face.bbox.y2);
    }
    Ok(())
}

#[test]
fn test_same_person_scores_higher_than_different() -> Result<()> {
    env_logger::try_init().ok();
    let Some(mut analyzer) = analyzer()? else {
        return Ok(());
    };
    let paths = [
        "test_faces/selfie.jpg",
        "test_faces/ine.jpg",
        "test_faces/other.jpg",
    ];
    if paths.iter().any(|p| !std::path::Path::new(p).exists()) {
        eprintln!("Skipping: test_faces not found");
        return Ok(());
    }

    let mut embeddings = Vec::new();
    for path in paths {
        let faces = analyzer.detect(&decode_image(&std::fs::read(path)?)?)?;
        let face = largest_face(&faces)
            .ok_or_else(|| anyhow::anyhow!("no face in {path}"))?;
        embeddings.push(face.embedding.clone());
    }

    let same = embeddings[0].vector.dot(&embeddings[1].vector);
    let different = embeddings[0].vector.dot(&embeddings[2].vector);
    println!("same person: {same:.4}, different person: {different:.4}");
    assert!(same > different);
    Ok(())
}
