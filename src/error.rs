use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Broad class of a failure, used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad caller input; never retried.
    Input,
    /// Camera or microphone unavailable.
    Device,
    /// Nothing usable was captured in time; offer a retry.
    Timeout,
    /// A sample was captured but could not be scored (silence, no face,
    /// unencodable face). Offer a retry; not a failed attempt.
    NotEvaluated,
    /// Evaluated and rejected. A normal outcome.
    Mismatch,
    /// A remote service failed.
    External,
    Internal,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face could not be encoded: {0}")]
    EncodingFailed(String),
    #[error("camera unavailable: {0}")]
    NoCamera(String),
    #[error("failed to read frame: {0}")]
    FrameRead(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("no identities enrolled")]
    EmptyGallery,
    #[error("no registered voice for {0}")]
    NoRegisteredVoice(String),
    #[error("microphone error: {0}")]
    MicrophoneError(String),
    #[error("No speech detected")]
    NoSpeechDetected,
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),
    #[error("geolocation required")]
    GeolocationRequired,
    #[error("outside_radius:{}", .distance_m.round())]
    OutsideGeofence { distance_m: f64 },
    #[error("proxy_detected")]
    ProxyDetected,
    #[error("no such challenge")]
    MissingChallenge,
    #[error("challenge expired")]
    ChallengeExpired,
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("attendance already marked for {student_id} in session {session_id}")]
    DuplicateAttendance {
        session_id: String,
        student_id: String,
    },
    #[error("model mismatch: gallery holds {expected}, got {actual}")]
    ModelMismatch { expected: String, actual: String },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("model error: {0}")]
    Model(String),
}

impl VerifyError {
    pub fn kind(&self) -> FailureKind {
        use VerifyError::*;
        match self {
            NoCamera(_) | FrameRead(_) | MicrophoneError(_) => FailureKind::Device,
            Timeout(_) => FailureKind::Timeout,
            NoFaceDetected | EncodingFailed(_) | NoSpeechDetected => FailureKind::NotEvaluated,
            OutsideGeofence { .. } | ProxyDetected => FailureKind::Mismatch,
            EmptyGallery
            | NoRegisteredVoice(_)
            | InvalidCoordinates(_)
            | GeolocationRequired
            | MissingChallenge
            | ChallengeExpired
            | MissingField(_)
            | DuplicateAttendance { .. }
            | ModelMismatch { .. } => FailureKind::Input,
            Storage(_) | Model(_) => FailureKind::Internal,
        }
    }

    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub(crate) fn model(err: impl std::fmt::Display) -> Self {
        Self::Model(format!("{err:#}"))
    }
}

pub type VerifyResult<T> = std::result::Result<T, VerifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(VerifyError::NoSpeechDetected.to_string(), "No speech detected");
        assert_eq!(
            VerifyError::OutsideGeofence { distance_m: 759.6 }.to_string(),
            "outside_radius:760"
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(VerifyError::EmptyGallery.kind(), FailureKind::Input);
        assert_eq!(VerifyError::NoCamera("x".into()).kind(), FailureKind::Device);
        assert_eq!(
            VerifyError::Timeout(Duration::from_secs(1)).kind(),
            FailureKind::Timeout
        );
        assert_eq!(VerifyError::NoSpeechDetected.kind(), FailureKind::NotEvaluated);
        assert_eq!(VerifyError::NoFaceDetected.kind(), FailureKind::NotEvaluated);
        assert_eq!(
            VerifyError::EncodingFailed("blur".into()).kind(),
            FailureKind::NotEvaluated
        );
        assert_eq!(VerifyError::ProxyDetected.kind(), FailureKind::Mismatch);
        assert_eq!(
            serde_json::to_string(&FailureKind::NotEvaluated).ok().as_deref(),
            Some("\"not_evaluated\"")
        );
    }
}
