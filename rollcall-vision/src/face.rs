use crate::yunet;
use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

/// YuNet input edge length; frames are letterboxed onto a square canvas of this size.
pub const DETECTOR_INPUT: u32 = 640;

/// SFace input edge length.
pub const ENCODER_INPUT: u32 = 112;

/// A detected face region in source-image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: right eye, left eye, nose, mouth corners
}

impl Detection {
    pub fn top(&self) -> f32 {
        self.bbox[1]
    }

    pub fn left(&self) -> f32 {
        self.bbox[0]
    }

    pub fn bottom(&self) -> f32 {
        self.bbox[1] + self.bbox[3]
    }

    pub fn right(&self) -> f32 {
        self.bbox[0] + self.bbox[2]
    }

    /// `(bottom - top) * (right - left)`
    pub fn area(&self) -> f32 {
        (self.bottom() - self.top()) * (self.right() - self.left())
    }
}

/// Face embedding produced by the recognizer, L2-normalised.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }
}

/// Pick the face with the largest area.
///
/// Ties go to the higher detector score, then to the earlier detection, so the
/// choice is stable for a given detector output.
pub fn largest_face(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().reduce(|best, candidate| {
        let (a, b) = (candidate.area(), best.area());
        if a > b || (a == b && candidate.score > best.score) {
            candidate
        } else {
            best
        }
    })
}

/// Placement of a source frame on the square detector canvas.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Letterbox {
    /// Map a canvas pixel coordinate back onto the source frame.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.offset_x) / self.scale, (y - self.offset_y) / self.scale)
    }
}

/// Resize `img` to fit a `size`x`size` canvas without distortion, centred on black.
pub fn letterbox(img: &DynamicImage, size: u32) -> (RgbImage, Letterbox) {
    let (width, height) = img.dimensions();
    let scale = size as f32 / width.max(height).max(1) as f32;
    let new_width = ((width as f32 * scale) as u32).clamp(1, size);
    let new_height = ((height as f32 * scale) as u32).clamp(1, size);

    let resized = img
        .resize_exact(new_width, new_height, FilterType::Triangle)
        .to_rgb8();
    let mut canvas = RgbImage::new(size, size);
    let offset_x = (size - new_width) / 2;
    let offset_y = (size - new_height) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        },
    )
}

/// Pack an RGB image into a `[1, 3, H, W]` BGR tensor with raw 0..255 values.
pub fn to_bgr_planar(img: &RgbImage) -> Array4<f32> {
    let (width, height) = img.dimensions();
    Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
        let px = img.get_pixel(x as u32, y as u32);
        px[2 - c] as f32
    })
}

/// Detect faces in an image with the YuNet detector.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (canvas, placement) = letterbox(img, DETECTOR_INPUT);
    let input_tensor = Value::from_array(to_bgr_planar(&canvas))?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut tensors: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        tensors.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let views: Vec<(&[i64], &[f32])> = tensors
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let scales = yunet::parse_outputs(&views, DETECTOR_INPUT as usize)
        .context("parsing detector outputs")?;
    let raw = yunet::decode(&scales, score_threshold, DETECTOR_INPUT as usize);

    let mut detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let (x, y) = placement.to_source(d.bbox[0], d.bbox[1]);
            let mut landmarks = [0.0f32; 10];
            for (i, pair) in d.landmarks.chunks_exact(2).enumerate() {
                let (lx, ly) = placement.to_source(pair[0], pair[1]);
                landmarks[i * 2] = lx;
                landmarks[i * 2 + 1] = ly;
            }
            Detection {
                bbox: [
                    x,
                    y,
                    d.bbox[2] / placement.scale,
                    d.bbox[3] / placement.scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(&detections, nms_threshold);
    }
    log::debug!("detector kept {} face(s)", detections.len());
    Ok(detections)
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotate, scale and crop the face so the eyes land on the ArcFace reference
/// positions of a `size`x`size` crop.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    const REF_RIGHT_EYE: (f32, f32) = (38.2946, 51.6963);
    const REF_LEFT_EYE: (f32, f32) = (73.5318, 51.5014);

    let right_eye = (detection.landmarks[0], detection.landmarks[1]);
    let left_eye = (detection.landmarks[2], detection.landmarks[3]);

    let eye_dx = left_eye.0 - right_eye.0;
    let eye_dy = left_eye.1 - right_eye.1;
    let eye_dist = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt();
    if eye_dist < 1.0 {
        anyhow::bail!("eye landmarks collapsed ({eye_dist:.2} px apart)");
    }

    let ref_dx = REF_LEFT_EYE.0 - REF_RIGHT_EYE.0;
    let ref_dy = REF_LEFT_EYE.1 - REF_RIGHT_EYE.1;
    let unit = size as f32 / ENCODER_INPUT as f32;
    let scale = unit * (ref_dx * ref_dx + ref_dy * ref_dy).sqrt() / eye_dist;
    let angle = eye_dy.atan2(eye_dx);

    let eye_center = (
        (right_eye.0 + left_eye.0) / 2.0,
        (right_eye.1 + left_eye.1) / 2.0,
    );
    let target_center = (
        (REF_RIGHT_EYE.0 + REF_LEFT_EYE.0) / 2.0 * unit,
        (REF_RIGHT_EYE.1 + REF_LEFT_EYE.1) / 2.0 * unit,
    );

    // forward map: out = R(-angle) * scale * (in - eye_center) + target_center
    let (sin, cos) = angle.sin_cos();
    let src = img.to_rgb8();
    let (src_w, src_h) = src.dimensions();
    let mut output = RgbImage::new(size, size);

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        let dx = (out_x as f32 - target_center.0) / scale;
        let dy = (out_y as f32 - target_center.1) / scale;
        let in_x = cos * dx - sin * dy + eye_center.0;
        let in_y = sin * dx + cos * dy + eye_center.1;

        if in_x < 0.0 || in_y < 0.0 || in_x >= src_w as f32 || in_y >= src_h as f32 {
            continue;
        }

        let x0 = in_x.floor() as u32;
        let y0 = in_y.floor() as u32;
        let x1 = (x0 + 1).min(src_w - 1);
        let y1 = (y0 + 1).min(src_h - 1);
        let fx = in_x - x0 as f32;
        let fy = in_y - y0 as f32;

        let corners = [
            (src.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
            (src.get_pixel(x1, y0), fx * (1.0 - fy)),
            (src.get_pixel(x0, y1), (1.0 - fx) * fy),
            (src.get_pixel(x1, y1), fx * fy),
        ];
        for c in 0..3 {
            let v: f32 = corners.iter().map(|(p, w)| p[c] as f32 * w).sum();
            pixel[c] = v.clamp(0.0, 255.0) as u8;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned face crop with SFace.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let face = face_img
        .resize_exact(ENCODER_INPUT, ENCODER_INPUT, FilterType::Triangle)
        .to_rgb8();
    let input_tensor = Value::from_array(to_bgr_planar(&face))?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let len = match shape.len() {
        2 => shape[1] as usize,
        _ => data.len(),
    };
    if len == 0 || data.len() < len {
        anyhow::bail!("recognizer returned an empty embedding");
    }

    let mut vector = data[..len].to_vec();
    if vector.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("recognizer returned non-finite values");
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }

    Ok(Embedding { vector })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms() {
        let detections = vec![
            det([10.0, 10.0, 20.0, 20.0], 0.9),
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn test_area_uses_box_edges() {
        let d = det([5.0, 10.0, 30.0, 40.0], 0.5);
        assert_eq!(d.bottom(), 50.0);
        assert_eq!(d.right(), 35.0);
        assert_eq!(d.area(), 1200.0);
    }

    #[test]
    fn test_letterbox_round_trip() {
        let img = DynamicImage::new_rgb8(320, 160);
        let (canvas, placement) = letterbox(&img, 640);
        assert_eq!(canvas.dimensions(), (640, 640));
        assert_eq!(placement.scale, 2.0);
        assert_eq!(placement.offset_y, 160.0);
        let (x, y) = placement.to_source(640.0, 480.0);
        assert!((x - 320.0).abs() < 1e-4);
        assert!((y - 160.0).abs() < 1e-4);
    }

    #[test]
    fn test_bgr_planar_order() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(1, 0, image::Rgb([10, 20, 30]));
        let t = to_bgr_planar(&img);
        assert_eq!(t.shape(), &[1, 3, 1, 2]);
        assert_eq!(t[[0, 0, 0, 1]], 30.0);
        assert_eq!(t[[0, 1, 0, 1]], 20.0);
        assert_eq!(t[[0, 2, 0, 1]], 10.0);
    }
}
