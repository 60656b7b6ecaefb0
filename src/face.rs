use image::{DynamicImage, RgbImage};
use rollcall_vision::{largest_face, BlinkDetector, FaceEngine, FrameDevice, FrameSource, LivenessState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{VerifyError, VerifyResult};
use crate::gallery::{open_gallery, EmbeddingGallery, GalleryStore, Modality};
use crate::matcher;
use crate::result::{guarded, Detail, VerificationResult};

#[derive(Debug, Clone)]
pub struct FaceSettings {
    pub threshold: f32,
    pub timeout: Duration,
    pub enroll_count: usize,
    pub enroll_timeout: Duration,
    pub blink_threshold: f32,
    pub blink_cooldown: u32,
}

impl Default for FaceSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for FaceSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            threshold: cfg.face.threshold,
            timeout: cfg.face.timeout(),
            enroll_count: cfg.face.enroll_count,
            enroll_timeout: cfg.face.enroll_timeout(),
            blink_threshold: cfg.blink.threshold,
            blink_cooldown: cfg.blink.cooldown,
        }
    }
}

/// Face enrollment and verification against one gallery.
pub struct FaceVerifier {
    engine: Mutex<Box<dyn FaceEngine + Send>>,
    store: Arc<dyn GalleryStore>,
    gallery: RwLock<EmbeddingGallery>,
    settings: FaceSettings,
}

enum Capture {
    Embedded(Vec<f32>),
    NoFace,
    EncodeFailed(String),
}

fn open(device: &dyn FrameDevice) -> VerifyResult<Box<dyn FrameSource>> {
    device
        .open()
        .map_err(|e| VerifyError::NoCamera(format!("{e:#}")))
}

fn next_frame(source: &mut dyn FrameSource) -> VerifyResult<Option<DynamicImage>> {
    source
        .next_frame()
        .map(|frame: Option<RgbImage>| frame.map(DynamicImage::ImageRgb8))
        .map_err(|e| VerifyError::FrameRead(format!("{e:#}")))
}

impl FaceVerifier {
    pub fn new(
        engine: Box<dyn FaceEngine + Send>,
        store: Arc<dyn GalleryStore>,
        settings: FaceSettings,
    ) -> VerifyResult<Self> {
        let gallery = open_gallery(store.as_ref(), Modality::Face, engine.model_version())?;
        log::debug!(
            "face gallery: {} identities, model {}",
            gallery.identities().count(),
            gallery.model_version()
        );
        Ok(Self {
            engine: Mutex::new(engine),
            store,
            gallery: RwLock::new(gallery),
            settings,
        })
    }

    pub fn settings(&self) -> &FaceSettings {
        &self.settings
    }

    pub fn identities(&self) -> VerifyResult<Vec<String>> {
        let gallery = self.gallery.read().map_err(|_| poisoned())?;
        Ok(gallery.identities().map(str::to_string).collect())
    }

    /// Remove an identity; returns whether it was enrolled.
    pub fn purge(&self, identity: &str) -> VerifyResult<bool> {
        let mut gallery = self.gallery.write().map_err(|_| poisoned())?;
        let removed = gallery.remove(identity);
        if removed {
            self.store.save(&gallery)?;
            log::info!("purged face data for {identity}");
        }
        Ok(removed)
    }

    /// Held for one model call at a time, never across a frame read.
    ///
    /// A panic inside the engine poisons the lock; the engine holds no
    /// state between calls, so the guard is taken back.
    fn engine(&self) -> MutexGuard<'_, Box<dyn FaceEngine + Send>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Embed the largest face in the frame.
    fn capture(&self, img: &DynamicImage) -> VerifyResult<Capture> {
        let mut engine = self.engine();
        let detections = engine.detect(img).map_err(VerifyError::model)?;
        let Some(face) = largest_face(&detections) else {
            return Ok(Capture::NoFace);
        };
        match engine.encode(img, face) {
            Ok(embedding) if !embedding.is_empty() => Ok(Capture::Embedded(embedding.vector)),
            Ok(_) => Ok(Capture::EncodeFailed("empty embedding".into())),
            Err(e) => Ok(Capture::EncodeFailed(format!("{e:#}"))),
        }
    }

    fn store_embeddings(&self, identity: &str, vectors: Vec<Vec<f32>>) -> VerifyResult<usize> {
        let version = self.engine().model_version().to_string();
        let mut gallery = self.gallery.write().map_err(|_| poisoned())?;
        let mut staged = gallery.clone();
        for vector in vectors {
            staged.push(identity, &version, vector)?;
        }
        self.store.save(&staged)?;
        *gallery = staged;
        Ok(gallery.vectors(identity).map_or(0, <[_]>::len))
    }

    fn enrolled(&self, identity: &str, collected: usize, total: usize) -> VerificationResult {
        log::info!("enrolled {collected} face embedding(s) for {identity}");
        VerificationResult::accepted(
            format!("Collected {collected} embeddings."),
            None,
            Detail::Enrollment {
                identity: identity.to_string(),
                stored: total,
            },
        )
    }

    /// Blink-gated enrollment: each blink arms one capture on a following frame.
    pub fn enroll(&self, identity: &str, device: &dyn FrameDevice) -> VerificationResult {
        guarded(|| self.try_enroll(identity, device))
    }

    pub fn try_enroll(&self, identity: &str, device: &dyn FrameDevice) -> VerifyResult<VerificationResult> {
        if identity.trim().is_empty() {
            return Err(VerifyError::MissingField("identity"));
        }
        let mut source = open(device)?;
        let detector = BlinkDetector::new(self.settings.blink_threshold, self.settings.blink_cooldown);
        let mut liveness = LivenessState::new();
        let mut armed = false;
        let mut collected = Vec::new();
        let mut timed_out = false;
        let started = Instant::now();

        log::info!("enrolling {identity}: blink once, then hold still");
        while collected.len() < self.settings.enroll_count {
            if started.elapsed() >= self.settings.enroll_timeout {
                timed_out = true;
                break;
            }
            let Some(img) = next_frame(source.as_mut())? else {
                break;
            };

            let landmarks = self.engine().eye_landmarks(&img);
            let eye = match landmarks {
                Ok(Some(eye)) => eye,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("face mesh failed: {e:#}");
                    continue;
                }
            };

            if detector.observe(&eye, &mut liveness) {
                log::debug!("blink detected");
                armed = true;
                continue;
            }
            if !armed {
                continue;
            }

            match self.capture(&img)? {
                Capture::Embedded(vector) => {
                    collected.push(vector);
                    armed = false;
                    log::info!(
                        "captured embedding {}/{}",
                        collected.len(),
                        self.settings.enroll_count
                    );
                }
                Capture::NoFace => log::warn!("{}", VerifyError::NoFaceDetected),
                Capture::EncodeFailed(reason) => {
                    log::warn!("{}", VerifyError::EncodingFailed(reason))
                }
            }
        }
        drop(source);

        if collected.is_empty() {
            return Err(if timed_out {
                VerifyError::Timeout(self.settings.enroll_timeout)
            } else {
                VerifyError::NoFaceDetected
            });
        }
        let count = collected.len();
        let total = self.store_embeddings(identity, collected)?;
        Ok(self.enrolled(identity, count, total))
    }

    /// Single-shot enrollment: store the first embeddable face, no liveness gate.
    pub fn enroll_single(&self, identity: &str, device: &dyn FrameDevice) -> VerificationResult {
        guarded(|| self.try_enroll_single(identity, device))
    }

    pub fn try_enroll_single(
        &self,
        identity: &str,
        device: &dyn FrameDevice,
    ) -> VerifyResult<VerificationResult> {
        if identity.trim().is_empty() {
            return Err(VerifyError::MissingField("identity"));
        }
        let vector = self.scan(device, self.settings.timeout)?;
        let total = self.store_embeddings(identity, vec![vector])?;
        Ok(self.enrolled(identity, 1, total))
    }

    /// Read frames until one yields an embedding or `timeout` passes.
    fn scan(&self, device: &dyn FrameDevice, timeout: Duration) -> VerifyResult<Vec<f32>> {
        let mut source = open(device)?;
        let started = Instant::now();
        let mut frames = 0usize;

        loop {
            if started.elapsed() >= timeout {
                return Err(VerifyError::Timeout(timeout));
            }
            let Some(img) = next_frame(source.as_mut())? else {
                log::debug!("stream ended after {frames} frame(s)");
                return Err(VerifyError::NoFaceDetected);
            };
            frames += 1;

            match self.capture(&img)? {
                Capture::Embedded(vector) => return Ok(vector),
                Capture::NoFace => log::debug!("frame {frames}: no face"),
                Capture::EncodeFailed(reason) => {
                    log::warn!("frame {frames}: {}", VerifyError::EncodingFailed(reason))
                }
            }
        }
    }

    pub fn verify(&self, device: &dyn FrameDevice) -> VerificationResult {
        guarded(|| self.try_verify(device))
    }

    pub fn try_verify(&self, device: &dyn FrameDevice) -> VerifyResult<VerificationResult> {
        if self.gallery.read().map_err(|_| poisoned())?.is_empty() {
            return Err(VerifyError::EmptyGallery);
        }
        let probe = self.scan(device, self.settings.timeout)?;
        self.decide(&probe)
    }

    /// Match an already computed embedding against the gallery.
    pub fn decide(&self, probe: &[f32]) -> VerifyResult<VerificationResult> {
        let gallery = self.gallery.read().map_err(|_| poisoned())?;
        gallery.check(gallery.model_version(), probe)?;
        let nearest = matcher::nearest(&gallery, probe).ok_or(VerifyError::EmptyGallery)?;

        let threshold = self.settings.threshold;
        let distance = nearest.distance;
        let confidence = matcher::face_confidence(distance, threshold);
        let similarity = Some((1.0 - distance).clamp(0.0, 1.0));
        log::info!(
            "nearest {} at distance {distance:.3} (threshold {threshold:.2}, confidence {confidence:.1}%)",
            nearest.identity
        );

        if distance <= threshold {
            Ok(VerificationResult::accepted(
                format!("Face matched: {}", nearest.identity),
                similarity,
                Detail::Face {
                    identity: Some(nearest.identity),
                    distance: Some(distance),
                    confidence: Some(confidence),
                },
            ))
        } else {
            Ok(VerificationResult::rejected(
                "Face not recognized",
                similarity,
                Detail::Face {
                    identity: None,
                    distance: Some(distance),
                    confidence: Some(confidence),
                },
            ))
        }
    }
}

fn poisoned() -> VerifyError {
    VerifyError::storage("face gallery lock poisoned")
}
