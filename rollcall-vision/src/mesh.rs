//! Dense face-mesh landmarks (468 points, MediaPipe topology).
//!
//! The landmark model takes a square face crop as `[1, 192, 192, 3]` RGB in
//! `[0, 1]` and returns `[1, 1404]` (x, y, z per point) in crop pixels.

use crate::blink::{
    EyeLandmarks, LEFT_EYE_INNER, LEFT_EYE_LOWER, LEFT_EYE_OUTER, LEFT_EYE_UPPER,
};
use crate::face::Detection;
use anyhow::{bail, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::{session::Session, value::Value};

pub const MESH_INPUT: u32 = 192;
pub const MESH_POINTS: usize = 468;

/// Crop margin around the detector box, as a fraction of its longer side.
const CROP_MARGIN: f32 = 0.25;

#[derive(Debug, Clone)]
pub struct FaceMesh {
    pub points: Vec<(f32, f32)>,
}

impl FaceMesh {
    pub fn point(&self, index: usize) -> Option<(f32, f32)> {
        self.points.get(index).copied()
    }

    pub fn left_eye(&self) -> Option<EyeLandmarks> {
        Some(EyeLandmarks {
            upper: self.point(LEFT_EYE_UPPER)?,
            lower: self.point(LEFT_EYE_LOWER)?,
            outer: self.point(LEFT_EYE_OUTER)?,
            inner: self.point(LEFT_EYE_INNER)?,
        })
    }
}

/// Square crop window around a detection, clipped to the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub side: u32,
}

pub fn crop_window(detection: &Detection, frame_width: u32, frame_height: u32) -> Option<CropWindow> {
    let side = detection.bbox[2].max(detection.bbox[3]) * (1.0 + 2.0 * CROP_MARGIN);
    let cx = detection.bbox[0] + detection.bbox[2] / 2.0;
    let cy = detection.bbox[1] + detection.bbox[3] / 2.0;

    let side = side.min(frame_width.min(frame_height) as f32).floor();
    if side < 8.0 {
        return None;
    }
    let x = (cx - side / 2.0).clamp(0.0, frame_width as f32 - side);
    let y = (cy - side / 2.0).clamp(0.0, frame_height as f32 - side);
    Some(CropWindow {
        x: x as u32,
        y: y as u32,
        side: side as u32,
    })
}

/// Run the landmark model on the face inside `detection`.
pub fn face_mesh(session: &mut Session, img: &DynamicImage, detection: &Detection) -> Result<FaceMesh> {
    let (width, height) = img.dimensions();
    let Some(window) = crop_window(detection, width, height) else {
        bail!("face too small for landmark crop");
    };

    let crop = img
        .crop_imm(window.x, window.y, window.side, window.side)
        .resize_exact(MESH_INPUT, MESH_INPUT, FilterType::Triangle)
        .to_rgb8();
    let size = MESH_INPUT as usize;
    let input = Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
        crop.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });

    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
    let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    if data.len() < MESH_POINTS * 3 {
        bail!("landmark model returned {} values, expected {}", data.len(), MESH_POINTS * 3);
    }

    let to_frame = window.side as f32 / MESH_INPUT as f32;
    let points = data
        .chunks_exact(3)
        .take(MESH_POINTS)
        .map(|p| {
            (
                window.x as f32 + p[0] * to_frame,
                window.y as f32 + p[1] * to_frame,
            )
        })
        .collect();

    Ok(FaceMesh { points })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4]) -> Detection {
        Detection {
            bbox,
            score: 0.9,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_crop_window_adds_margin() {
        let w = crop_window(&det([100.0, 100.0, 80.0, 100.0]), 640, 480).unwrap();
        assert_eq!(w.side, 150);
        assert_eq!(w.x, 65);
        assert_eq!(w.y, 75);
    }

    #[test]
    fn test_crop_window_stays_inside_frame() {
        let w = crop_window(&det([0.0, 0.0, 60.0, 60.0]), 640, 480).unwrap();
        assert_eq!((w.x, w.y), (0, 0));

        let w = crop_window(&det([600.0, 440.0, 60.0, 60.0]), 640, 480).unwrap();
        assert_eq!(w.x + w.side, 640);
        assert_eq!(w.y + w.side, 480);
    }

    #[test]
    fn test_tiny_face_has_no_window() {
        assert!(crop_window(&det([10.0, 10.0, 2.0, 2.0]), 640, 480).is_none());
    }

    #[test]
    fn test_left_eye_needs_full_mesh() {
        let partial = FaceMesh {
            points: vec![(0.0, 0.0); 200],
        };
        assert!(partial.left_eye().is_none());

        let mut points = vec![(0.0, 0.0); MESH_POINTS];
        points[LEFT_EYE_UPPER] = (10.0, 5.0);
        points[LEFT_EYE_INNER] = (20.0, 8.0);
        let eye = FaceMesh { points }.left_eye().unwrap();
        assert_eq!(eye.upper, (10.0, 5.0));
        assert_eq!(eye.inner, (20.0, 8.0));
    }
}
