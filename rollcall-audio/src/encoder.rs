use anyhow::{Context, Result};
use ndarray::Array3;
use ort::{session::Session, value::Value};
use std::path::Path;

use crate::mfcc::{Mfcc, MfccConfig};
use crate::model::session_builder;
use crate::signal;

/// Turns a mono recording into a fixed-length voice embedding.
pub trait VoiceEncoder {
    fn encode(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>>;

    /// Tag pinned into voice galleries; vectors from different encoders never mix.
    fn model_version(&self) -> &str;
}

/// Mean MFCC profile of the recording.
pub struct MfccEncoder {
    mfcc: Mfcc,
    version: String,
}

impl MfccEncoder {
    pub fn new(config: MfccConfig) -> Self {
        let version = format!("mfcc{}-mel{}-fft{}", config.n_mfcc, config.n_mels, config.n_fft);
        Self {
            mfcc: Mfcc::new(config),
            version,
        }
    }
}

impl Default for MfccEncoder {
    fn default() -> Self {
        Self::new(MfccConfig::default())
    }
}

impl VoiceEncoder for MfccEncoder {
    fn encode(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>> {
        let target = self.mfcc.config().sample_rate;
        let samples = signal::resample(samples, sample_rate, target)?;
        if samples.is_empty() {
            anyhow::bail!("cannot encode an empty recording");
        }
        Ok(self.mfcc.mean(&samples))
    }

    fn model_version(&self) -> &str {
        &self.version
    }
}

/// Speaker-embedding network taking raw 16 kHz audio shaped `[1, 1, n]`.
pub struct OnnxVoiceEncoder {
    session: Session,
    sample_rate: u32,
    version: String,
}

impl OnnxVoiceEncoder {
    pub fn new(path: &Path, version: impl Into<String>) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("voice model not found at {}", path.display());
        }
        let session = session_builder()?
            .commit_from_file(path)
            .with_context(|| format!("load voice model from {}", path.display()))?;
        Ok(Self {
            session,
            sample_rate: 16_000,
            version: version.into(),
        })
    }
}

impl VoiceEncoder for OnnxVoiceEncoder {
    fn encode(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>> {
        let samples = signal::resample(samples, sample_rate, self.sample_rate)?;
        if samples.is_empty() {
            anyhow::bail!("cannot encode an empty recording");
        }
        let n = samples.len();
        let input = Array3::from_shape_vec((1, 1, n), samples)?;
        let input_tensor = Value::from_array(input)?;

        let outputs = self.session.run(ort::inputs![input_tensor])?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
        if data.is_empty() {
            anyhow::bail!("voice model returned an empty embedding");
        }
        if data.iter().any(|v| !v.is_finite()) {
            anyhow::bail!("voice model returned non-finite values");
        }
        Ok(data.to_vec())
    }

    fn model_version(&self) -> &str {
        &self.version
    }
}
