use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::config::SpeechConfig;

/// Speech-to-text for a recorded clip.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct Recognition {
    #[serde(default)]
    alternative: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct RecognizeLine {
    #[serde(default)]
    result: Vec<Recognition>,
}

/// First transcript in a newline-delimited recognizer response, lowercased.
///
/// The service usually opens with an empty `{"result":[]}` line.
pub fn parse_transcript(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<RecognizeLine>(line).ok())
        .flat_map(|line| line.result)
        .flat_map(|r| r.alternative)
        .map(|a| a.transcript)
        .find(|t| !t.trim().is_empty())
        .map(|t| t.to_lowercase())
}

/// HTTP recognizer that takes a WAV upload.
pub struct SpeechApi {
    agent: ureq::Agent,
    endpoint: String,
    api_key: Option<String>,
    language: String,
}

impl SpeechApi {
    pub fn new(cfg: &SpeechConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(cfg.timeout_secs)))
            .build()
            .into();
        Self {
            agent,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone(),
            language: cfg.language.clone(),
        }
    }
}

impl Transcriber for SpeechApi {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let wav = rollcall_audio::wav::encode_wav(samples, sample_rate)?;
        let mut request = self
            .agent
            .post(&self.endpoint)
            .query("client", "chromium")
            .query("lang", &self.language)
            .header("Content-Type", format!("audio/wav; rate={sample_rate}"));
        if let Some(key) = &self.api_key {
            request = request.query("key", key);
        }

        let mut response = request
            .send(&wav[..])
            .with_context(|| format!("posting audio to {}", self.endpoint))?;
        let body = response
            .body_mut()
            .read_to_string()
            .context("reading recognizer response")?;
        let transcript = parse_transcript(&body).unwrap_or_default();
        log::debug!("recognized text: {transcript:?}");
        Ok(transcript)
    }
}
