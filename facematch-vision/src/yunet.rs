//! YuNet detector post-processing.
//!
//! The 2023mar model emits twelve heads, four per stride (8, 16, 32), in the
//! order `cls_8, cls_16, cls_32, obj_*, bbox_*, kps_*`. Each head has shape
//! `[1, cells, width]` with `cells = (input / stride)^2` and width 1, 1, 4
//! and 10 respectively.
//!
//! Decoding is anchor-free. For grid cell (row, col) at a given stride:
//! centre = (col + dx, row + dy) * stride, size = (dw, dh) * stride.
//! Face confidence is `sqrt(cls * obj)` with both heads clamped to [0, 1].

use anyhow::{bail, Result};
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    /// x1, y1, x2, y2 normalised to the square input
    pub corners: [f32; 4],
    pub score: f32,
    /// 5 points as x, y pairs, normalised to the square input
    pub landmarks: [f32; 10],
}

/// Heads for one stride level, cls and obj already fused into `scores`.
#[derive(Debug, Clone)]
pub struct StrideLevel {
    pub stride: usize,
    pub side: usize,
    pub scores: Array2<f32>,
    pub boxes: Array2<f32>,
    pub landmarks: Array2<f32>,
}

fn head(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    cells: usize,
    width: usize,
) -> Result<Array2<f32>> {
    let Some((shape, data)) = outputs.get(index) else {
        bail!("missing YuNet output {index} (got {} outputs)", outputs.len());
    };
    let matches = shape.len() == 3
        && shape[0] == 1
        && shape[1] as usize == cells
        && shape[2] as usize == width;
    if !matches {
        bail!("YuNet output {index} has shape {shape:?}, expected [1, {cells}, {width}]");
    }
    Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
}

/// Split the flat model outputs into per-stride levels.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<StrideLevel>> {
    if input_size == 0 || input_size % 32 != 0 {
        bail!("detector input size {input_size} is not a positive multiple of 32");
    }

    let mut levels = Vec::with_capacity(STRIDES.len());
    for (level, &stride) in STRIDES.iter().enumerate() {
        let side = input_size / stride;
        let cells = side * side;

        let cls = head(outputs, level, cells, 1)?;
        let obj = head(outputs, level + 3, cells, 1)?;
        let scores = ndarray::Zip::from(&cls)
            .and(&obj)
            .map_collect(|&c, &o| (c.clamp(0.0, 1.0) * o.clamp(0.0, 1.0)).sqrt());

        levels.push(StrideLevel {
            stride,
            side,
            scores,
            boxes: head(outputs, level + 6, cells, 4)?,
            landmarks: head(outputs, level + 9, cells, 10)?,
        });
    }
    Ok(levels)
}

/// Decode every cell scoring at least `score_threshold`.
pub fn decode(levels: &[StrideLevel], score_threshold: f32, input_size: usize) -> Vec<RawDetection> {
    let norm = input_size as f32;
    let mut detections = Vec::new();

    for level in levels {
        let stride = level.stride as f32;
        for row in 0..level.side {
            for col in 0..level.side {
                let idx = row * level.side + col;
                let score = level.scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + level.boxes[[idx, 0]]) * stride;
                let cy = (row as f32 + level.boxes[[idx, 1]]) * stride;
                let w = level.boxes[[idx, 2]] * stride;
                let h = level.boxes[[idx, 3]] * stride;

                let mut landmarks = [0.0f32; 10];
                for k in 0..5 {
                    landmarks[2 * k] =
                        (col as f32 + level.landmarks[[idx, 2 * k]]) * stride / norm;
                    landmarks[2 * k + 1] =
                        (row as f32 + level.landmarks[[idx, 2 * k + 1]]) * stride / norm;
                }

                detections.push(RawDetection {
                    corners: [
                        (cx - w / 2.0) / norm,
                        (cy - h / 2.0) / norm,
                        (cx + w / 2.0) / norm,
                        (cy + h / 2.0) / norm,
                    ],
                    score,
                    landmarks,
                });
            }
        }
    }

    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_level(stride: usize, input_size: usize) -> StrideLevel {
        let side = input_size / stride;
        let cells = side * side;
        StrideLevel {
            stride,
            side,
            scores: Array2::zeros((cells, 1)),
            boxes: Array2::zeros((cells, 4)),
            landmarks: Array2::zeros((cells, 10)),
        }
    }

    #[test]
    fn test_decode_grid_based() {
        let input_size = 640;
        let mut levels: Vec<StrideLevel> = STRIDES
            .iter()
            .map(|&s| empty_level(s, input_size))
            .collect();

        // one face on the stride-32 grid at row 10, col 10
        let level = &mut levels[2];
        let idx = 10 * level.side + 10;
        level.scores[[idx, 0]] = 0.9;
        level.boxes[[idx, 0]] = 0.5;
        level.boxes[[idx, 1]] = 0.3;
        level.boxes[[idx, 2]] = 4.0;
        level.boxes[[idx, 3]] = 4.0;

        let detections = decode(&levels, 0.5, input_size);
        assert_eq!(detections.len(), 1);
        let d = &detections[0];

        // centre (336, 329.6) px, size 128 px
        assert!((d.corners[0] - 272.0 / 640.0).abs() < 1e-5);
        assert!((d.corners[1] - 265.6 / 640.0).abs() < 1e-5);
        assert!((d.corners[2] - 400.0 / 640.0).abs() < 1e-5);
        assert!((d.corners[3] - 393.6 / 640.0).abs() < 1e-5);
        assert!((d.score - 0.9).abs() < 1e-6);

        // zero landmark offset sits on the grid point
        assert!((d.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((d.landmarks[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_parse_fuses_cls_and_obj() {
        let input_size = 32;
        let cells: Vec<usize> = STRIDES.iter().map(|s| (input_size / s).pow(2)).collect();
        let mut shapes: Vec<Vec<i64>> = Vec::new();
        let mut data: Vec<Vec<f32>> = Vec::new();
        for (width, fill) in [(1usize, 0.64f32), (1, 1.0), (4, 0.0), (10, 0.0)] {
            for &c in &cells {
                shapes.push(vec![1, c as i64, width as i64]);
                data.push(vec![fill; c * width]);
            }
        }
        let outputs: Vec<(&[i64], &[f32])> = shapes
            .iter()
            .zip(data.iter())
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        let levels = parse_outputs(&outputs, input_size).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].side, 4);
        assert!((levels[0].scores[[0, 0]] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        let shape = [1i64, 7, 1];
        let data = [0.0f32; 7];
        let outputs = vec![(&shape[..], &data[..]); 12];
        assert!(parse_outputs(&outputs, 640).is_err());
        assert!(parse_outputs(&[], 640).is_err());
        assert!(parse_outputs(&outputs, 100).is_err());
    }
}
