use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{FailureKind, VerifyError, VerifyResult};

/// Which voice check produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoiceMode {
    /// Similarity above threshold and the phrase heard in the transcript.
    #[default]
    Strict,
    /// Similarity only. Weaker: a replayed recording of the speaker passes.
    SimilarityOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "modality", rename_all = "snake_case")]
pub enum Detail {
    Face {
        identity: Option<String>,
        distance: Option<f32>,
        confidence: Option<f32>,
    },
    Voice {
        expected_phrase: Option<String>,
        transcript: Option<String>,
        mode: VoiceMode,
    },
    Geo {
        distance_m: Option<f64>,
        radius_m: Option<f64>,
    },
    Enrollment {
        identity: String,
        stored: usize,
    },
}

/// Outcome of one verification attempt. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub ok: bool,
    pub similarity: Option<f32>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Detail>,
}

impl VerificationResult {
    pub fn accepted(message: impl Into<String>, similarity: Option<f32>, detail: Detail) -> Self {
        Self {
            ok: true,
            similarity,
            message: message.into(),
            failure: None,
            detail: Some(detail),
        }
    }

    pub fn rejected(message: impl Into<String>, similarity: Option<f32>, detail: Detail) -> Self {
        Self {
            ok: false,
            similarity,
            message: message.into(),
            failure: Some(FailureKind::Mismatch),
            detail: Some(detail),
        }
    }

    pub fn from_error(err: &VerifyError) -> Self {
        let similarity = None;
        let detail = match err {
            VerifyError::OutsideGeofence { distance_m } => Some(Detail::Geo {
                distance_m: Some(*distance_m),
                radius_m: None,
            }),
            _ => None,
        };
        Self {
            ok: false,
            similarity,
            message: err.to_string(),
            failure: Some(err.kind()),
            detail,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        match &self.detail {
            Some(Detail::Face { identity, .. }) => identity.as_deref(),
            Some(Detail::Enrollment { identity, .. }) => Some(identity),
            _ => None,
        }
    }

    pub fn transcript(&self) -> Option<&str> {
        match &self.detail {
            Some(Detail::Voice { transcript, .. }) => transcript.as_deref(),
            _ => None,
        }
    }
}

/// Run an attempt, folding errors and panics into an `ok = false` result.
pub fn guarded<F>(attempt: F) -> VerificationResult
where
    F: FnOnce() -> VerifyResult<VerificationResult>,
{
    match panic::catch_unwind(AssertUnwindSafe(attempt)) {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            log::info!("verification failed: {err}");
            VerificationResult::from_error(&err)
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("verification aborted: {reason}");
            VerificationResult {
                ok: false,
                similarity: None,
                message: format!("internal error: {reason}"),
                failure: Some(FailureKind::Internal),
                detail: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_becomes_rejection() {
        let result = guarded(|| Err(VerifyError::NoSpeechDetected));
        assert!(!result.ok);
        assert_eq!(result.message, "No speech detected");
        assert_eq!(result.failure, Some(FailureKind::NotEvaluated));
        assert!(result.similarity.is_none());
    }

    #[test]
    fn test_panic_is_contained() {
        let result = guarded(|| panic!("camera driver exploded"));
        assert!(!result.ok);
        assert_eq!(result.failure, Some(FailureKind::Internal));
        assert!(result.message.contains("camera driver exploded"));
    }

    #[test]
    fn test_json_shape() {
        let result = VerificationResult::accepted(
            "matched",
            Some(0.9),
            Detail::Face {
                identity: Some("alice".into()),
                distance: Some(0.1),
                confidence: Some(90.0),
            },
        );
        let json = serde_json::to_value(&result).unwrap_or_default();
        assert_eq!(json["ok"], true);
        assert_eq!(json["detail"]["modality"], "face");
        assert_eq!(json["detail"]["identity"], "alice");
        assert!(json.get("failure").is_none());
        assert_eq!(result.identity(), Some("alice"));
    }
}
