//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: every cell of the stride-8/16/32 grids predicts one
//! face. Per stride the model emits four tensors, in this output order:
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32,
//! kps_8, kps_16, kps_32`.
//!
//! Decoding per cell `(row, col)`:
//! - score = sqrt(clamp(cls) * clamp(obj))
//! - centre = (col + dx, row + dy) * stride
//! - size = exp(dw, dh) * stride
//! - landmark k = (col + kx, row + ky) * stride

use anyhow::{bail, Result};

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// Raw tensors for one stride, flattened row-major over the grid.
#[derive(Debug, Clone)]
pub struct ScaleOutputs {
    pub stride: usize,
    pub cls: Vec<f32>,
    pub obj: Vec<f32>,
    pub bbox: Vec<f32>,
    pub kps: Vec<f32>,
}

/// Detection on the square detector canvas, in canvas pixels.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

fn take<'a>(
    outputs: &[(&'a [i64], &'a [f32])],
    index: usize,
    cells: usize,
    width: usize,
    label: &str,
) -> Result<&'a [f32]> {
    let Some((shape, data)) = outputs.get(index) else {
        bail!("missing {label} output at index {index}");
    };
    let ok = shape.len() == 3 && shape[0] == 1 && shape[1] as usize == cells && shape[2] as usize == width;
    if !ok || data.len() != cells * width {
        bail!("unexpected {label} shape at index {index}: {shape:?}, expected [1, {cells}, {width}]");
    }
    Ok(data)
}

/// Split the twelve detector outputs into per-stride groups, validating shapes.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<ScaleOutputs>> {
    if outputs.len() < 12 {
        bail!("detector produced {} outputs, expected 12", outputs.len());
    }

    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            let side = input_size / stride;
            let cells = side * side;
            Ok(ScaleOutputs {
                stride,
                cls: take(outputs, i, cells, 1, "cls")?.to_vec(),
                obj: take(outputs, i + 3, cells, 1, "obj")?.to_vec(),
                bbox: take(outputs, i + 6, cells, 4, "bbox")?.to_vec(),
                kps: take(outputs, i + 9, cells, 10, "kps")?.to_vec(),
            })
        })
        .collect()
}

/// Decode every grid cell whose score reaches `score_threshold`.
pub fn decode(scales: &[ScaleOutputs], score_threshold: f32, input_size: usize) -> Vec<RawDetection> {
    let mut detections = Vec::new();

    for scale in scales {
        let side = input_size / scale.stride;
        let stride = scale.stride as f32;

        for row in 0..side {
            for col in 0..side {
                let idx = row * side + col;
                let Some((&cls, &obj)) = scale.cls.get(idx).zip(scale.obj.get(idx)) else {
                    continue;
                };
                let score = (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt();
                if score < score_threshold {
                    continue;
                }

                let b = &scale.bbox[idx * 4..idx * 4 + 4];
                let cx = (col as f32 + b[0]) * stride;
                let cy = (row as f32 + b[1]) * stride;
                let w = b[2].exp() * stride;
                let h = b[3].exp() * stride;

                let k = &scale.kps[idx * 10..idx * 10 + 10];
                let mut landmarks = [0.0f32; 10];
                for p in 0..5 {
                    landmarks[p * 2] = (col as f32 + k[p * 2]) * stride;
                    landmarks[p * 2 + 1] = (row as f32 + k[p * 2 + 1]) * stride;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks,
                });
            }
        }
    }

    detections
}
