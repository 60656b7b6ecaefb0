use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::blink::EyeLandmarks;
use crate::face::{self, Detection, Embedding};
use crate::mesh;
use crate::model::{self, ModelPaths};

/// Everything a face verifier needs from the vision models.
///
/// The ONNX [`Pipeline`] is the production implementation; tests supply
/// scripted engines.
pub trait FaceEngine {
    /// Detect every face region in the frame.
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>>;

    /// Embed one detected face.
    fn encode(&mut self, img: &DynamicImage, face: &Detection) -> Result<Embedding>;

    /// Eye points of the most prominent face, `None` when no face is visible.
    fn eye_landmarks(&mut self, img: &DynamicImage) -> Result<Option<EyeLandmarks>>;

    /// Tag identifying the embedding model, pinned into galleries.
    fn model_version(&self) -> &str;
}

/// Full pipeline: detect faces → align → encode, plus mesh landmarks
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub landmarker: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    version: String,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths, version: impl Into<String>) -> Result<Self> {
        Ok(Self {
            detector: model::load_session(&paths.detector, "detector")?,
            encoder: model::load_session(&paths.recognizer, "recognition")?,
            landmarker: model::load_session(&paths.landmarks, "landmark")?,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            version: version.into(),
        })
    }

    pub fn with_thresholds(mut self, score_threshold: f32, nms_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self.nms_threshold = nms_threshold;
        self
    }
}

impl FaceEngine for Pipeline {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        face::detect_faces(&mut self.detector, img, self.score_threshold, self.nms_threshold)
            .context("detecting faces")
    }

    fn encode(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding> {
        let aligned =
            face::align_face(img, detection, face::ENCODER_INPUT).context("aligning face")?;
        face::encode_face(&mut self.encoder, &aligned).context("encoding face")
    }

    fn eye_landmarks(&mut self, img: &DynamicImage) -> Result<Option<EyeLandmarks>> {
        let detections = self.detect(img)?;
        let Some(best) = face::largest_face(&detections) else {
            return Ok(None);
        };
        let mesh = mesh::face_mesh(&mut self.landmarker, img, best).context("face mesh")?;
        Ok(mesh.left_eye())
    }

    fn model_version(&self) -> &str {
        &self.version
    }
}
