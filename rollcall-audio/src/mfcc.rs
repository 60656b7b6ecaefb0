//! Mel-frequency cepstral coefficients.
//!
//! Matches the librosa defaults the stored voiceprints were built with:
//! centred frames (zero padding of `n_fft / 2` on both sides), periodic Hann
//! window, power spectrum, Slaney-style mel filterbank with Slaney area
//! normalisation, `power_to_db` with `ref = 1`, `amin = 1e-10`,
//! `top_db = 80`, then an orthonormal DCT-II.

use ndarray::{Array1, Array2, Axis};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

const AMIN: f32 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub struct MfccConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    pub fmin: f32,
    /// Upper filterbank edge, Nyquist when `None`.
    pub fmax: Option<f32>,
    pub top_db: Option<f32>,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            n_mfcc: 13,
            fmin: 0.0,
            fmax: None,
            top_db: Some(80.0),
        }
    }
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
pub fn hz_to_mel(hz: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;

    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;

    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (logstep * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular mel filterbank, `n_mels x (n_fft / 2 + 1)`.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Array2<f32> {
    let n_freq = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_freq)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let (mel_lo, mel_hi) = (hz_to_mel(fmin as f64), hz_to_mel(fmax as f64));
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut weights = Array2::<f32>::zeros((n_mels, n_freq));
    for m in 0..n_mels {
        let (left, centre, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let enorm = 2.0 / (right - left);
        for (k, &f) in fft_freqs.iter().enumerate() {
            let lower = (f - left) / (centre - left);
            let upper = (right - f) / (right - centre);
            let w = lower.min(upper).max(0.0);
            weights[[m, k]] = (w * enorm) as f32;
        }
    }
    weights
}

/// Orthonormal DCT-II basis, `n_out x n_in`.
fn dct_basis(n_out: usize, n_in: usize) -> Array2<f32> {
    let n = n_in as f64;
    Array2::from_shape_fn((n_out, n_in), |(k, i)| {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        (scale * (PI * k as f64 * (2 * i + 1) as f64 / (2.0 * n)).cos()) as f32
    })
}

fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos()) as f32)
        .collect()
}

/// Reusable MFCC extractor; the filterbank, window and FFT plan are built once.
pub struct Mfcc {
    config: MfccConfig,
    window: Vec<f32>,
    filters: Array2<f32>,
    dct: Array2<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Mfcc {
    pub fn new(config: MfccConfig) -> Self {
        let fmax = config.fmax.unwrap_or(config.sample_rate as f32 / 2.0);
        let filters = mel_filterbank(config.sample_rate, config.n_fft, config.n_mels, config.fmin, fmax);
        let dct = dct_basis(config.n_mfcc, config.n_mels);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(config.n_fft);
        Self {
            window: hann(config.n_fft),
            filters,
            dct,
            fft,
            config,
        }
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    /// Power spectrogram, `(n_fft / 2 + 1) x frames`.
    pub fn power_spectrogram(&self, samples: &[f32]) -> Array2<f32> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length.max(1);
        let pad = n_fft / 2;
        let n_freq = n_fft / 2 + 1;
        let frames = 1 + samples.len() / hop;

        let padded_at = |i: usize| -> f32 {
            i.checked_sub(pad)
                .and_then(|j| samples.get(j))
                .copied()
                .unwrap_or(0.0)
        };

        let mut spec = Array2::<f32>::zeros((n_freq, frames));
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
        for t in 0..frames {
            let start = t * hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded_at(start + i) * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            for k in 0..n_freq {
                spec[[k, t]] = buffer[k].norm_sqr();
            }
        }
        spec
    }

    /// Cepstral coefficients, `n_mfcc x frames`.
    pub fn compute(&self, samples: &[f32]) -> Array2<f32> {
        let mel = self.filters.dot(&self.power_spectrogram(samples));
        let mut db = mel.mapv(|p| 10.0 * p.max(AMIN).log10());
        if let Some(top_db) = self.config.top_db {
            let peak = db.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            db.mapv_inplace(|v| v.max(peak - top_db));
        }
        self.dct.dot(&db)
    }

    /// Coefficients averaged over time: one fixed-length vector per recording.
    pub fn mean(&self, samples: &[f32]) -> Vec<f32> {
        let coeffs = self.compute(samples);
        coeffs
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(self.config.n_mfcc))
            .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mel_scale_anchor_points() {
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
        assert!((hz_to_mel(500.0) - 7.5).abs() < 1e-9);
        for hz in [0.0, 200.0, 999.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_filterbank_shape_and_sign() {
        let fb = mel_filterbank(16_000, 2048, 128, 0.0, 8000.0);
        assert_eq!(fb.dim(), (128, 1025));
        assert!(fb.iter().all(|&w| w >= 0.0));
        // every filter covers at least one bin
        for row in fb.rows() {
            assert!(row.iter().any(|&w| w > 0.0));
        }
    }

    #[test]
    fn test_dct_rows_are_orthonormal() {
        let d = dct_basis(13, 128);
        for a in 0..13 {
            for b in 0..13 {
                let dot: f32 = d.row(a).dot(&d.row(b));
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4, "rows {a},{b}: {dot}");
            }
        }
    }

    #[test]
    fn test_frame_count_matches_centred_framing() {
        let mfcc = Mfcc::new(MfccConfig::default());
        let out = mfcc.compute(&vec![0.0; 16_000]);
        assert_eq!(out.dim(), (13, 1 + 16_000 / 512));
    }

    #[test]
    fn test_silence_only_has_dc_term() {
        let mfcc = Mfcc::new(MfccConfig::default());
        let mean = mfcc.mean(&vec![0.0; 8_000]);
        assert_eq!(mean.len(), 13);
        // every mel band sits at the -100 dB floor
        let expected_c0 = -100.0 * (128.0f32).sqrt();
        assert!((mean[0] - expected_c0).abs() < 0.05);
        assert!(mean[1..].iter().all(|c| c.abs() < 0.01));
    }

    #[test]
    fn test_different_tones_have_different_profiles() {
        let mfcc = Mfcc::new(MfccConfig::default());
        let tone = |hz: f32| -> Vec<f32> {
            (0..16_000)
                .map(|i| 0.3 * (2.0 * std::f32::consts::PI * hz * i as f32 / 16_000.0).sin())
                .collect()
        };
        let low = mfcc.mean(&tone(300.0));
        let low_again = mfcc.mean(&tone(300.0));
        let high = mfcc.mean(&tone(3000.0));
        assert_eq!(low, low_again);
        assert!(low.iter().all(|c| c.is_finite()));
        let diff: f32 = low.iter().zip(&high).map(|(a, b)| (a - b).abs()).sum();
        assert!(diff > 1.0);
    }
}
