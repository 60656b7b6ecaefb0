use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{Cursor, Read};
use std::path::Path;

use crate::signal;

/// Mono f32 samples with their rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

fn decode<R: Read>(reader: WavReader<R>) -> Result<Clip> {
    let spec = reader.spec();
    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .context("reading float samples")?,
        (SampleFormat::Int, 16) => {
            let raw: Vec<i16> = reader
                .into_samples::<i16>()
                .collect::<Result<_, _>>()
                .context("reading 16-bit samples")?;
            signal::i16_to_f32(&raw)
        }
        (SampleFormat::Int, bits @ (8 | 24 | 32)) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .context("reading integer samples")?
        }
        (format, bits) => anyhow::bail!("unsupported WAV encoding {format:?}/{bits} bit"),
    };

    Ok(Clip {
        samples: signal::downmix(&interleaved, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

/// Read a WAV file as mono f32.
pub fn read_wav(path: &Path) -> Result<Clip> {
    let reader = WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    decode(reader).with_context(|| format!("decoding {}", path.display()))
}

/// Decode WAV bytes already in memory.
pub fn read_wav_bytes(bytes: &[u8]) -> Result<Clip> {
    decode(WavReader::new(Cursor::new(bytes)).context("parsing WAV header")?)
}

fn pcm16_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Write mono samples as 16-bit PCM.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = WavWriter::create(path, pcm16_spec(sample_rate))
        .with_context(|| format!("creating {}", path.display()))?;
    for &s in samples {
        writer.write_sample(to_pcm16(s))?;
    }
    writer.finalize()?;
    Ok(())
}

/// Encode mono samples as an in-memory 16-bit PCM WAV, e.g. for upload.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, pcm16_spec(sample_rate))?;
        for &s in samples {
            writer.write_sample(to_pcm16(s))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_then_read_keeps_shape() -> Result<()> {
        let samples: Vec<f32> = (0..1600).map(|i| ((i as f32) * 0.02).sin() * 0.5).collect();
        let bytes = encode_wav(&samples, 16_000)?;
        let clip = read_wav_bytes(&bytes)?;
        assert_eq!(clip.sample_rate, 16_000);
        assert_eq!(clip.samples.len(), samples.len());
        let max_err = clip
            .samples
            .iter()
            .zip(&samples)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3);
        Ok(())
    }

    #[test]
    fn test_stereo_file_is_downmixed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec)?;
        for _ in 0..100 {
            writer.write_sample(16384i16)?;
            writer.write_sample(0i16)?;
        }
        writer.finalize()?;

        let clip = read_wav(&path)?;
        assert_eq!(clip.sample_rate, 8_000);
        assert_eq!(clip.samples.len(), 100);
        assert!(clip.samples.iter().all(|&s| (s - 0.25).abs() < 1e-6));
        Ok(())
    }
}
