//! Sample-level helpers: conversion, energy, channel mixing, resampling.

use anyhow::Result;
use rubato::{FftFixedIn, Resampler};

/// Default mean-square energy below which a recording counts as silence.
pub const SILENCE_THRESHOLD: f32 = 1e-5;

const RESAMPLE_CHUNK: usize = 1024;

/// Scale 16-bit PCM into `[-1, 1)`.
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Mean of squared samples; 0 for an empty buffer.
pub fn mean_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64) as f32
}

/// Whether the recording carries enough energy to be worth scoring.
pub fn has_speech(samples: &[f32], threshold: f32) -> bool {
    let energy = mean_energy(samples);
    log::debug!("recording energy={energy:.6} threshold={threshold:.6}");
    energy > threshold
}

/// Average interleaved frames down to one channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Convert mono audio between sample rates, compensating for resampler delay.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)?;
    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * to as u64 / from as u64) as usize;
    let mut out = Vec::with_capacity(expected + delay);

    let mut pos = 0;
    while pos + resampler.input_frames_next() <= samples.len() {
        let n = resampler.input_frames_next();
        let chunk = resampler.process(&[&samples[pos..pos + n]], None)?;
        out.extend_from_slice(&chunk[0]);
        pos += n;
    }

    let rest = &samples[pos..];
    let chunk = resampler.process_partial(Some(&[rest][..]), None)?;
    out.extend_from_slice(&chunk[0]);
    while out.len() < expected + delay {
        let chunk = resampler.process_partial::<&[f32]>(None, None)?;
        if chunk[0].is_empty() {
            break;
        }
        out.extend_from_slice(&chunk[0]);
    }

    Ok(out.into_iter().skip(delay).take(expected).collect())
}
