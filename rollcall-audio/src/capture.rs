use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use crate::{signal, wav};

/// The audio source produced nothing before its deadline.
#[derive(Debug, thiserror::Error)]
#[error("no audio received within {0:?}")]
pub struct CaptureTimeout(pub Duration);

/// Something that can record a fixed-length mono clip.
pub trait Microphone {
    /// Record `duration` of audio, returned as mono f32 at `sample_rate`.
    fn record(&mut self, duration: Duration, sample_rate: u32) -> Result<Vec<f32>>;
}

/// Replays a WAV file as if it had just been recorded.
pub struct WavInput {
    path: PathBuf,
}

impl WavInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Microphone for WavInput {
    fn record(&mut self, duration: Duration, sample_rate: u32) -> Result<Vec<f32>> {
        let clip = wav::read_wav(&self.path)?;
        let mut samples = signal::resample(&clip.samples, clip.sample_rate, sample_rate)?;
        let wanted = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        samples.truncate(wanted);
        log::debug!(
            "replayed {} samples from {}",
            samples.len(),
            self.path.display()
        );
        Ok(samples)
    }
}

#[cfg(feature = "cpal")]
pub use live::LiveMicrophone;

#[cfg(feature = "cpal")]
mod live {
    use super::CaptureTimeout;
    use crate::signal;
    use anyhow::{Context, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};
    use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
    use std::time::{Duration, Instant};

    /// Extra time allowed past the requested duration for the device to deliver.
    const GRACE: Duration = Duration::from_secs(2);

    /// System default input device via cpal.
    #[derive(Default)]
    pub struct LiveMicrophone {
        device_name: Option<String>,
    }

    impl LiveMicrophone {
        pub fn new(device_name: Option<String>) -> Self {
            Self { device_name }
        }

        fn device(&self) -> Result<cpal::Device> {
            let host = cpal::default_host();
            match &self.device_name {
                Some(name) => host
                    .input_devices()?
                    .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                    .with_context(|| format!("input device {name:?} not found")),
                None => host.default_input_device().context("no input device available"),
            }
        }
    }

    fn build_stream(
        device: &cpal::Device,
        config: &StreamConfig,
        format: SampleFormat,
        tx: Sender<Vec<f32>>,
    ) -> Result<cpal::Stream> {
        let channels = config.channels as usize;
        let on_error = |err: cpal::StreamError| log::error!("input stream error: {err}");
        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(signal::downmix(data, channels));
                },
                on_error,
                None,
            )?,
            SampleFormat::I16 => device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(signal::downmix(&signal::i16_to_f32(data), channels));
                },
                on_error,
                None,
            )?,
            SampleFormat::U16 => device.build_input_stream(
                config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let scaled: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0)
                        .collect();
                    let _ = tx.send(signal::downmix(&scaled, channels));
                },
                on_error,
                None,
            )?,
            format => anyhow::bail!("unsupported sample format: {format:?}"),
        };
        Ok(stream)
    }

    fn drain(rx: &Receiver<Vec<f32>>, wanted: usize, deadline: Instant) -> Vec<f32> {
        let mut samples = Vec::with_capacity(wanted);
        while samples.len() < wanted {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(chunk) => samples.extend(chunk),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        samples.truncate(wanted);
        samples
    }

    impl super::Microphone for LiveMicrophone {
        fn record(&mut self, duration: Duration, sample_rate: u32) -> Result<Vec<f32>> {
            let device = self.device()?;
            let supported = device
                .default_input_config()
                .context("querying input config")?;
            let format = supported.sample_format();
            let config: StreamConfig = supported.into();
            let device_rate = config.sample_rate.0;

            let (tx, rx) = unbounded();
            let stream = build_stream(&device, &config, format, tx)?;
            stream.play()?;
            log::info!(
                "recording {:.1}s at {device_rate} Hz ({} channel(s))",
                duration.as_secs_f32(),
                config.channels
            );

            let wanted = (duration.as_secs_f64() * device_rate as f64).round() as usize;
            let samples = drain(&rx, wanted, Instant::now() + duration + GRACE);
            drop(stream);

            if samples.is_empty() {
                return Err(CaptureTimeout(duration + GRACE).into());
            }
            if samples.len() < wanted {
                log::warn!("short recording: {} of {wanted} samples", samples.len());
            }
            signal::resample(&samples, device_rate, sample_rate)
        }
    }
}
