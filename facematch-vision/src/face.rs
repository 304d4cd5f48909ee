use crate::yunet;
use anyhow::{bail, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// SFace input edge, also the canonical ArcFace crop size.
pub const ALIGNED_FACE_SIZE: u32 = 112;

/// Axis-aligned face box in pixel space, corner convention (x1, y1, x2, y2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// `(x2 - x1) * (y2 - y1)`; degenerate boxes have zero area.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        )
        .area();
        if inter <= 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }
}

/// Raw detector output for one face, before embedding.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
    pub landmarks: [f32; 10], // right eye, left eye, nose, mouth corners as x,y pairs
}

/// Face embedding (SFace output). Unit Euclidean norm when produced by [`encode_face`].
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    /// Scale `values` to unit length. Fails for an all-zero vector.
    pub fn l2_normalized(values: Vec<f32>) -> Result<Self> {
        let mut embedding = Self::new(values);
        let norm = embedding.norm();
        if !norm.is_finite() || norm == 0.0 {
            bail!("embedding has norm {norm}, cannot normalize");
        }
        embedding.vector.mapv_inplace(|x| x / norm);
        Ok(embedding)
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn norm(&self) -> f32 {
        self.vector.dot(&self.vector).sqrt()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.vector.iter()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// A detected face together with its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub embedding: Embedding,
}

/// Letterbox geometry used to fit an image into the square detector input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    side: u32,
    scale: f32,
    new_w: u32,
    new_h: u32,
    offset_x: u32,
    offset_y: u32,
}

/// Reject detector input sizes YuNet's stride grid cannot tile.
pub fn check_det_size(det_size: u32) -> Result<()> {
    if det_size == 0 || det_size % 32 != 0 {
        bail!("det_size must be a positive multiple of 32, got {det_size}");
    }
    Ok(())
}

impl Letterbox {
    fn fit(width: u32, height: u32, side: u32) -> Result<Self> {
        check_det_size(side)?;
        let scale = side as f32 / width.max(height).max(1) as f32;
        let new_w = ((width as f32 * scale) as u32).clamp(1, side);
        let new_h = ((height as f32 * scale) as u32).clamp(1, side);
        Ok(Self {
            side,
            scale,
            new_w,
            new_h,
            offset_x: (side - new_w) / 2,
            offset_y: (side - new_h) / 2,
        })
    }

    fn resized_dims(&self) -> (u32, u32) {
        (self.new_w, self.new_h)
    }

    /// Map a coordinate normalised to the canvas back to source pixels.
    fn unmap_x(&self, v: f32) -> f32 {
        (v * self.side as f32 - self.offset_x as f32) / self.scale
    }

    fn unmap_y(&self, v: f32) -> f32 {
        (v * self.side as f32 - self.offset_y as f32) / self.scale
    }
}

/// Planar BGR float tensor `[1, 3, h, w]` with values in [0, 255].
fn bgr_planes(rgb: &image::RgbImage) -> Result<Array4<f32>> {
    let (w, h) = rgb.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    let (b, rest) = data.split_at_mut(plane);
    let (g, r) = rest.split_at_mut(plane);
    for (i, px) in rgb.pixels().enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }
    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect faces with YuNet. `det_size` is the square detector input edge.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    det_size: u32,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    check_det_size(det_size)?;
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        bail!("image has zero dimensions");
    }

    let letterbox = Letterbox::fit(orig_w, orig_h, det_size)?;
    let (new_w, new_h) = letterbox.resized_dims();
    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);
    let mut canvas = DynamicImage::new_rgb8(det_size, det_size);
    image::imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );

    let input_tensor = Value::from_array(bgr_planes(&canvas.to_rgb8())?)?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut heads: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        heads.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let head_refs: Vec<(&[i64], &[f32])> = heads
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let levels = yunet::parse_outputs(&head_refs, det_size as usize)?;
    let raw = yunet::decode(&levels, score_threshold, det_size as usize);
    log::debug!("yunet produced {} candidates above {score_threshold}", raw.len());

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for (i, v) in d.landmarks.iter().enumerate() {
                landmarks[i] = if i % 2 == 0 {
                    letterbox.unmap_x(*v)
                } else {
                    letterbox.unmap_y(*v)
                };
            }
            Detection {
                bbox: BoundingBox::new(
                    letterbox.unmap_x(d.corners[0]),
                    letterbox.unmap_y(d.corners[1]),
                    letterbox.unmap_x(d.corners[2]),
                    letterbox.unmap_y(d.corners[3]),
                ),
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| kept.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

/// Similarity transform (rotation, uniform scale, translation).
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Maps the detected eye pair onto the reference eye pair of a `size` crop.
    fn from_eyes(left: (f32, f32), right: (f32, f32), size: u32) -> Result<Self> {
        // ArcFace reference eyes for a 112x112 crop
        const REF_LEFT: (f32, f32) = (38.2946, 51.6963);
        const REF_RIGHT: (f32, f32) = (73.5318, 51.5014);

        let k = size as f32 / ALIGNED_FACE_SIZE as f32;
        let (dx, dy) = (right.0 - left.0, right.1 - left.1);
        let eye_dist = (dx * dx + dy * dy).sqrt();
        if eye_dist < f32::EPSILON {
            bail!("eye landmarks coincide, cannot align face");
        }
        let ref_dist = ((REF_RIGHT.0 - REF_LEFT.0).powi(2) + (REF_RIGHT.1 - REF_LEFT.1).powi(2))
            .sqrt();
        let scale = k * ref_dist / eye_dist;
        let angle = dy.atan2(dx);

        let a = scale * angle.cos();
        let b = scale * angle.sin();
        let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
        let target = (
            k * (REF_LEFT.0 + REF_RIGHT.0) / 2.0,
            k * (REF_LEFT.1 + REF_RIGHT.1) / 2.0,
        );
        Ok(Self {
            a,
            b,
            tx: target.0 - (a * center.0 + b * center.1),
            ty: target.1 - (-b * center.0 + a * center.1),
        })
    }

    /// Source coordinate for an output pixel.
    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let (u, v) = (x - self.tx, y - self.ty);
        let det = self.a * self.a + self.b * self.b;
        ((self.a * u - self.b * v) / det, (self.b * u + self.a * v) / det)
    }
}

fn sample_bilinear(img: &DynamicImage, x: f32, y: f32) -> Option<image::Rgb<u8>> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
        return None;
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let corners = [
        (img.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (img.get_pixel(x1, y0), fx * (1.0 - fy)),
        (img.get_pixel(x0, y1), (1.0 - fx) * fy),
        (img.get_pixel(x1, y1), fx * fy),
    ];
    let mut rgb = [0u8; 3];
    for (c, out) in rgb.iter_mut().enumerate() {
        let v: f32 = corners.iter().map(|(p, w)| p[c] as f32 * w).sum();
        *out = v.clamp(0.0, 255.0) as u8;
    }
    Some(image::Rgb(rgb))
}

/// Rotate and scale the face so the eyes land on the ArcFace reference points.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let lm = &detection.landmarks;
    // YuNet emits the subject's right eye first, which is on the image left
    let transform = Similarity::from_eyes((lm[0], lm[1]), (lm[2], lm[3]), size)?;

    let mut output = image::RgbImage::new(size, size);
    for (x, y, px) in output.enumerate_pixels_mut() {
        let (sx, sy) = transform.invert(x as f32, y as f32);
        if let Some(rgb) = sample_bilinear(img, sx, sy) {
            *px = rgb;
        }
    }
    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned face crop with SFace into an L2-normalised embedding.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let crop = face_img
        .resize_exact(
            ALIGNED_FACE_SIZE,
            ALIGNED_FACE_SIZE,
            image::imageops::FilterType::Triangle,
        )
        .to_rgb8();
    let input_tensor = Value::from_array(bgr_planes(&crop)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    // [1, 128] for SFace
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim == 0 || dim > data.len() {
        bail!("unexpected recognizer output shape {:?}", shape);
    }
    Embedding::l2_normalized(data[..dim].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_area() {
        assert_eq!(BoundingBox::new(0.0, 0.0, 10.0, 10.0).area(), 100.0);
        assert_eq!(BoundingBox::new(5.0, 2.0, 9.0, 12.0).area(), 40.0);
        assert_eq!(BoundingBox::new(10.0, 0.0, 5.0, 10.0).area(), 0.0);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(10.0, 10.0, 30.0, 30.0);
        let b = BoundingBox::new(15.0, 15.0, 35.0, 35.0);
        let iou = a.iou(&b);
        assert!(iou > 0.0 && iou < 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let far = BoundingBox::new(100.0, 100.0, 110.0, 110.0);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_nms() {
        let detections = vec![
            det(10.0, 10.0, 30.0, 30.0, 0.9),
            det(12.0, 12.0, 32.0, 32.0, 0.8),
            det(100.0, 100.0, 120.0, 120.0, 0.85),
        ];
        let kept = nms(&detections, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.85);
    }

    #[test]
    fn test_letterbox_round_trip() {
        let lb = Letterbox::fit(1280, 720, 640).unwrap();
        assert_eq!(lb.resized_dims(), (640, 360));
        assert_eq!(lb.offset_y, 140);
        // canvas centre maps back to the image centre
        assert!((lb.unmap_x(0.5) - 640.0).abs() < 1e-3);
        assert!((lb.unmap_y(0.5) - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_rejects_untileable_sizes() {
        assert!(Letterbox::fit(640, 480, 0).is_err());
        assert!(Letterbox::fit(640, 480, 100).is_err());
        assert!(Letterbox::fit(640, 480, 320).is_ok());

        let err = check_det_size(0).unwrap_err();
        assert!(err.to_string().contains("positive multiple of 32"));
    }

    #[test]
    fn test_l2_normalized() {
        let e = Embedding::l2_normalized(vec![3.0, 4.0]).unwrap();
        assert!((e.norm() - 1.0).abs() < 1e-6);
        assert!((e.vector[0] - 0.6).abs() < 1e-6);
        assert!(Embedding::l2_normalized(vec![0.0, 0.0]).is_err());
    }

    #[test]
    fn test_similarity_maps_eyes_to_reference() {
        let t = Similarity::from_eyes((40.0, 60.0), (80.0, 60.0), 112).unwrap();
        // output reference eye centre should invert to the detected eye centre
        let (sx, sy) = t.invert((38.2946 + 73.5318) / 2.0, (51.6963 + 51.5014) / 2.0);
        assert!((sx - 60.0).abs() < 1e-3);
        assert!((sy - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_align_rejects_coincident_eyes() {
        let img = DynamicImage::new_rgb8(32, 32);
        let d = det(0.0, 0.0, 10.0, 10.0, 0.9);
        assert!(align_face(&img, &d, 112).is_err());
    }
}
