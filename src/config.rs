use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::result::VoiceMode;

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(dir) = option_env!("ROLLCALL_DATA_DIR") {
        return PathBuf::from(dir);
    }
    ProjectDirs::from("", "", "rollcall")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/var/lib/rollcall"))
});

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = option_env!("ROLLCALL_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    ProjectDirs::from("", "", "rollcall")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("/etc/rollcall/config.toml"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub face: FaceConfig,
    pub blink: BlinkConfig,
    pub voice: VoiceConfig,
    pub speech: SpeechConfig,
    pub geo: GeoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            face: FaceConfig::default(),
            blink: BlinkConfig::default(),
            voice: VoiceConfig::default(),
            speech: SpeechConfig::default(),
            geo: GeoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// Largest accepted Euclidean distance.
    pub threshold: f32,
    pub timeout_secs: u64,
    pub enroll_count: usize,
    pub enroll_timeout_secs: u64,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    pub landmark_model: PathBuf,
    pub model_version: String,
}

impl Default for FaceConfig {
    fn default() -> Self {
        let models = DATA_DIR.join("models");
        let paths = rollcall_vision::ModelPaths::in_dir(&models);
        Self {
            threshold: 0.5,
            timeout_secs: 10,
            enroll_count: 5,
            enroll_timeout_secs: 60,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            detector_model: paths.detector,
            recognizer_model: paths.recognizer,
            landmark_model: paths.landmarks,
            model_version: "sface-2021dec".to_string(),
        }
    }
}

impl FaceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn enroll_timeout(&self) -> Duration {
        Duration::from_secs(self.enroll_timeout_secs)
    }

    pub fn model_paths(&self) -> rollcall_vision::ModelPaths {
        rollcall_vision::ModelPaths {
            detector: self.detector_model.clone(),
            recognizer: self.recognizer_model.clone(),
            landmarks: self.landmark_model.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    pub threshold: f32,
    pub cooldown: u32,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            threshold: 32.0,
            cooldown: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Mfcc,
    Onnx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePolicy {
    Overwrite,
    Append,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Smallest rejected cosine similarity.
    pub threshold: f32,
    pub sample_rate: u32,
    pub enroll_secs: f32,
    pub verify_secs: f32,
    pub silence_threshold: f32,
    pub mode: VoiceMode,
    pub features: FeatureKind,
    pub embedding_model: PathBuf,
    pub store: StorePolicy,
    pub challenge_ttl_secs: u64,
    pub enroll_words: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            sample_rate: 16_000,
            enroll_secs: 5.0,
            verify_secs: 8.0,
            silence_threshold: rollcall_audio::SILENCE_THRESHOLD,
            mode: VoiceMode::Strict,
            features: FeatureKind::Mfcc,
            embedding_model: DATA_DIR.join("models").join("voice_embedding.onnx"),
            store: StorePolicy::Overwrite,
            challenge_ttl_secs: 60,
            enroll_words: 6,
        }
    }
}

impl VoiceConfig {
    pub fn enroll_duration(&self) -> Duration {
        Duration::from_secs_f32(self.enroll_secs.max(0.0))
    }

    pub fn verify_duration(&self) -> Duration {
        Duration::from_secs_f32(self.verify_secs.max(0.0))
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub language: String,
    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://www.google.com/speech-api/v2/recognize".to_string(),
            api_key: None,
            language: "en-US".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub reject_proxies: bool,
    pub lookup_timeout_ms: u64,
    /// `{ip}` is replaced with the address being looked up.
    pub reputation_url: String,
    pub public_ip_url: String,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            reject_proxies: false,
            lookup_timeout_ms: 2000,
            reputation_url: "http://ip-api.com/json/{ip}?fields=proxy,hosting,status,message"
                .to_string(),
            public_ip_url: "https://api.ipify.org".to_string(),
        }
    }
}

impl GeoConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = load_config(Some(&dir.path().join("absent.toml")))?;
        assert_eq!(cfg.face.threshold, 0.5);
        assert_eq!(cfg.face.enroll_count, 5);
        assert_eq!(cfg.blink.cooldown, 10);
        assert_eq!(cfg.voice.threshold, 0.75);
        assert_eq!(cfg.voice.mode, VoiceMode::Strict);
        assert_eq!(cfg.geo.lookup_timeout_ms, 2000);
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "camera = \"/tmp/frames\"\n[voice]\nmode = \"similarity_only\"\nstore = \"append\"\n",
        )?;
        let cfg = load_config(Some(&path))?;
        assert_eq!(cfg.camera, "/tmp/frames");
        assert_eq!(cfg.voice.mode, VoiceMode::SimilarityOnly);
        assert_eq!(cfg.voice.store, StorePolicy::Append);
        assert_eq!(cfg.voice.sample_rate, 16_000);
        assert_eq!(cfg.face.timeout_secs, 10);
        Ok(())
    }

    #[test]
    fn test_save_then_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.geo.reject_proxies = true;
        save_config(&cfg, Some(&path))?;
        assert!(load_config(Some(&path))?.geo.reject_proxies);
        Ok(())
    }
}
