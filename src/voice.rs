use rollcall_audio::{has_speech, CaptureTimeout, Microphone, VoiceEncoder};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::challenge::{Challenge, Purpose};
use crate::config::{Config, StorePolicy};
use crate::error::{VerifyError, VerifyResult};
use crate::gallery::{open_gallery, EmbeddingGallery, GalleryStore, Modality};
use crate::matcher;
use crate::result::{guarded, Detail, VerificationResult, VoiceMode};
use crate::transcribe::Transcriber;

#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub threshold: f32,
    pub sample_rate: u32,
    pub enroll_duration: Duration,
    pub verify_duration: Duration,
    pub silence_threshold: f32,
    pub mode: VoiceMode,
    pub store: StorePolicy,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for VoiceSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            threshold: cfg.voice.threshold,
            sample_rate: cfg.voice.sample_rate,
            enroll_duration: cfg.voice.enroll_duration(),
            verify_duration: cfg.voice.verify_duration(),
            silence_threshold: cfg.voice.silence_threshold,
            mode: cfg.voice.mode,
            store: cfg.voice.store,
        }
    }
}

/// Lowercase, drop punctuation and collapse whitespace.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether the issued phrase was said somewhere in the transcript.
pub fn phrase_spoken(phrase: &str, transcript: &str) -> bool {
    let phrase = normalize(phrase);
    !phrase.is_empty() && normalize(transcript).contains(&phrase)
}

/// Voiceprint enrollment and challenge verification.
pub struct VoiceVerifier {
    encoder: Mutex<Box<dyn VoiceEncoder + Send>>,
    transcriber: Option<Box<dyn Transcriber>>,
    store: Arc<dyn GalleryStore>,
    gallery: RwLock<EmbeddingGallery>,
    settings: VoiceSettings,
}

impl VoiceVerifier {
    pub fn new(
        encoder: Box<dyn VoiceEncoder + Send>,
        transcriber: Option<Box<dyn Transcriber>>,
        store: Arc<dyn GalleryStore>,
        settings: VoiceSettings,
    ) -> VerifyResult<Self> {
        let gallery = open_gallery(store.as_ref(), Modality::Voice, encoder.model_version())?;
        if settings.mode == VoiceMode::Strict && transcriber.is_none() {
            log::warn!("strict voice mode without a transcriber: every phrase check will fail");
        }
        Ok(Self {
            encoder: Mutex::new(encoder),
            transcriber,
            store,
            gallery: RwLock::new(gallery),
            settings,
        })
    }

    pub fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    pub fn identities(&self) -> VerifyResult<Vec<String>> {
        let gallery = self.gallery.read().map_err(|_| poisoned())?;
        Ok(gallery.identities().map(str::to_string).collect())
    }

    pub fn purge(&self, identity: &str) -> VerifyResult<bool> {
        let mut gallery = self.gallery.write().map_err(|_| poisoned())?;
        let removed = gallery.remove(identity);
        if removed {
            self.store.save(&gallery)?;
            log::info!("purged voice data for {identity}");
        }
        Ok(removed)
    }

    fn record(&self, mic: &mut dyn Microphone, duration: Duration) -> VerifyResult<Vec<f32>> {
        mic.record(duration, self.settings.sample_rate).map_err(|e| {
            match e.downcast_ref::<CaptureTimeout>() {
                Some(CaptureTimeout(waited)) => VerifyError::Timeout(*waited),
                None => VerifyError::MicrophoneError(format!("{e:#}")),
            }
        })
    }

    fn encode(&self, samples: &[f32]) -> VerifyResult<(String, Vec<f32>)> {
        // a panicking encoder leaves nothing half-written behind
        let mut encoder = self.encoder.lock().unwrap_or_else(PoisonError::into_inner);
        let vector = encoder
            .encode(samples, self.settings.sample_rate)
            .map_err(VerifyError::model)?;
        Ok((encoder.model_version().to_string(), vector))
    }

    fn require_speech(&self, samples: &[f32]) -> VerifyResult<()> {
        if has_speech(samples, self.settings.silence_threshold) {
            Ok(())
        } else {
            Err(VerifyError::NoSpeechDetected)
        }
    }

    pub fn enroll(
        &self,
        identity: &str,
        challenge: Challenge,
        mic: &mut dyn Microphone,
    ) -> VerificationResult {
        guarded(|| self.try_enroll(identity, challenge, mic))
    }

    pub fn try_enroll(
        &self,
        identity: &str,
        challenge: Challenge,
        mic: &mut dyn Microphone,
    ) -> VerifyResult<VerificationResult> {
        challenge.ensure_for(identity, Purpose::Enrollment)?;
        log::info!("enrolling {identity}, expected phrase: {}", challenge.phrase);
        let samples = self.record(mic, self.settings.enroll_duration)?;
        self.enroll_recording(identity, &samples)
    }

    /// Store a voiceprint from an existing recording at the configured rate.
    pub fn enroll_recording(&self, identity: &str, samples: &[f32]) -> VerifyResult<VerificationResult> {
        if identity.trim().is_empty() {
            return Err(VerifyError::MissingField("identity"));
        }
        self.require_speech(samples)?;
        let (version, vector) = self.encode(samples)?;

        let mut gallery = self.gallery.write().map_err(|_| poisoned())?;
        let mut staged = gallery.clone();
        match self.settings.store {
            StorePolicy::Overwrite => staged.replace(identity, &version, vector)?,
            StorePolicy::Append => staged.push(identity, &version, vector)?,
        }
        self.store.save(&staged)?;
        *gallery = staged;
        let stored = gallery.vectors(identity).map_or(0, <[_]>::len);

        log::info!("voice registered for {identity} ({stored} stored)");
        Ok(VerificationResult::accepted(
            "Voice registered.",
            None,
            Detail::Enrollment {
                identity: identity.to_string(),
                stored,
            },
        ))
    }

    pub fn verify(
        &self,
        identity: &str,
        challenge: Challenge,
        mic: &mut dyn Microphone,
    ) -> VerificationResult {
        guarded(|| self.try_verify(identity, challenge, mic))
    }

    pub fn try_verify(
        &self,
        identity: &str,
        challenge: Challenge,
        mic: &mut dyn Microphone,
    ) -> VerifyResult<VerificationResult> {
        self.stored(identity)?;
        challenge.ensure_for(identity, Purpose::Verification)?;
        log::info!("verifying {identity}, expected phrase: {}", challenge.phrase);
        let samples = self.record(mic, self.settings.verify_duration)?;
        self.verify_recording(identity, challenge, &samples)
    }

    fn stored(&self, identity: &str) -> VerifyResult<Vec<Vec<f32>>> {
        let gallery = self.gallery.read().map_err(|_| poisoned())?;
        gallery
            .vectors(identity)
            .filter(|v| !v.is_empty())
            .map(<[_]>::to_vec)
            .ok_or_else(|| VerifyError::NoRegisteredVoice(identity.to_string()))
    }

    /// Score an existing recording against the challenge.
    pub fn verify_recording(
        &self,
        identity: &str,
        challenge: Challenge,
        samples: &[f32],
    ) -> VerifyResult<VerificationResult> {
        let stored = self.stored(identity)?;
        challenge.ensure_for(identity, Purpose::Verification)?;
        self.require_speech(samples)?;

        let (version, probe) = self.encode(samples)?;
        self.gallery
            .read()
            .map_err(|_| poisoned())?
            .check(&version, &probe)?;
        let similarity = matcher::best_similarity(&stored, &probe).unwrap_or(0.0);
        let threshold = self.settings.threshold;
        log::info!("similarity={similarity:.4} threshold={threshold:.2}");

        let mode = self.settings.mode;
        let transcript = match mode {
            VoiceMode::Strict => Some(self.transcript(samples)),
            VoiceMode::SimilarityOnly => None,
        };
        let detail = Detail::Voice {
            expected_phrase: Some(challenge.phrase.clone()),
            transcript: transcript.clone(),
            mode,
        };

        if let Some(spoken) = &transcript {
            if !phrase_spoken(&challenge.phrase, spoken) {
                log::info!("phrase mismatch: heard {spoken:?}");
                return Ok(VerificationResult::rejected(
                    "Phrase mismatch",
                    Some(similarity),
                    detail,
                ));
            }
        }

        Ok(if similarity > threshold {
            VerificationResult::accepted("Verification passed", Some(similarity), detail)
        } else {
            VerificationResult::rejected("Verification failed", Some(similarity), detail)
        })
    }

    /// Recognized text, empty when recognition is unavailable or fails.
    fn transcript(&self, samples: &[f32]) -> String {
        let Some(transcriber) = &self.transcriber else {
            return String::new();
        };
        match transcriber.transcribe(samples, self.settings.sample_rate) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("transcription failed: {e:#}");
                String::new()
            }
        }
    }
}

fn poisoned() -> VerifyError {
    VerifyError::storage("voice gallery lock poisoned")
}
