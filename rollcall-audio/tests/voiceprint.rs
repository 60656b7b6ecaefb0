use anyhow::Result;
use rollcall_audio::{has_speech, wav, MfccEncoder, Microphone, VoiceEncoder, WavInput, SILENCE_THRESHOLD};
use std::time::Duration;

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (na * nb)
}

/// Harmonic stack around a fundamental, loosely voice-like.
fn voiced(f0: f32, seconds: f32, rate: u32) -> Vec<f32> {
    let n = (seconds * rate as f32) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / rate as f32;
            (1..6)
                .map(|h| (2.0 * std::f32::consts::PI * f0 * h as f32 * t).sin() * 0.1 / h as f32)
                .sum()
        })
        .collect()
}

#[test]
fn test_recorded_take_matches_its_own_enrollment() -> Result<()> {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir()?;
    let enroll_path = dir.path().join("enroll.wav");
    let verify_path = dir.path().join("verify.wav");
    wav::write_wav(&enroll_path, &voiced(120.0, 3.0, 16_000), 16_000)?;
    wav::write_wav(&verify_path, &voiced(120.0, 2.0, 44_100), 44_100)?;

    let mut encoder = MfccEncoder::default();
    let enrolled = WavInput::new(&enroll_path).record(Duration::from_secs(5), 16_000)?;
    let probe = WavInput::new(&verify_path).record(Duration::from_secs(5), 16_000)?;
    assert!(has_speech(&enrolled, SILENCE_THRESHOLD));
    assert!(has_speech(&probe, SILENCE_THRESHOLD));

    let a = encoder.encode(&enrolled, 16_000)?;
    let b = encoder.encode(&probe, 16_000)?;
    assert!(cosine(&a, &b) > 0.9, "similarity {}", cosine(&a, &b));
    Ok(())
}

#[test]
fn test_silent_take_is_not_speech() -> Result<()> {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("silent.wav");
    wav::write_wav(&path, &vec![0.0; 16_000], 16_000)?;
    let samples = WavInput::new(&path).record(Duration::from_secs(1), 16_000)?;
    assert_eq!(samples.len(), 16_000);
    assert!(!has_speech(&samples, SILENCE_THRESHOLD));
    Ok(())
}
