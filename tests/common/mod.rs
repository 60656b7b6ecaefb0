#![allow(dead_code)]

use anyhow::Result;
use image::{DynamicImage, Rgb, RgbImage};
use rollcall::{FaceEngine, FrameDevice, FrameSource, Microphone, Transcriber, VoiceEncoder};
use rollcall_audio::CaptureTimeout;
use rollcall_vision::{Detection, Embedding, EyeLandmarks};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Frame pixel (0,0): red = scene, green = who is in front of the camera.
pub const EMPTY: u8 = 0;
pub const OPEN: u8 = 1;
pub const CLOSED: u8 = 2;
pub const BLURRY: u8 = 3;

pub fn frame(scene: u8, who: u8) -> RgbImage {
    RgbImage::from_pixel(8, 8, Rgb([scene, who, 0]))
}

fn scene(img: &DynamicImage) -> (u8, u8) {
    let px = img.to_rgb8().get_pixel(0, 0).0;
    (px[0], px[1])
}

pub fn face_vector(who: u8) -> Vec<f32> {
    match who {
        1 => vec![1.0, 0.0, 0.0, 0.0],
        2 => vec![0.0, 1.0, 0.0, 0.0],
        // close to 1
        3 => vec![0.96, 0.28, 0.0, 0.0],
        _ => vec![0.0, 0.0, 0.0, 1.0],
    }
}

/// Face engine that reads the scripted scene out of each frame.
pub struct ScriptedEngine {
    version: String,
    glitch: bool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::with_version("scripted-v1")
    }

    pub fn with_version(version: &str) -> Self {
        Self {
            version: version.to_string(),
            glitch: false,
        }
    }

    /// The first detection call panics, later ones behave.
    pub fn glitching() -> Self {
        Self {
            glitch: true,
            ..Self::new()
        }
    }
}

impl FaceEngine for ScriptedEngine {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        if std::mem::take(&mut self.glitch) {
            panic!("driver returned a corrupt buffer");
        }
        let (scene, _) = scene(img);
        if scene == EMPTY {
            return Ok(Vec::new());
        }
        let small = Detection {
            bbox: [0.0, 0.0, 2.0, 2.0],
            score: 0.9,
            landmarks: [0.0; 10],
        };
        let large = Detection {
            bbox: [2.0, 2.0, 5.0, 5.0],
            score: 0.8,
            landmarks: [0.0; 10],
        };
        Ok(vec![small, large])
    }

    fn encode(&mut self, img: &DynamicImage, face: &Detection) -> Result<Embedding> {
        let (scene, who) = scene(img);
        if scene == BLURRY {
            anyhow::bail!("face region too small");
        }
        // only the largest face carries the identity
        if face.area() < 10.0 {
            return Ok(Embedding {
                vector: vec![0.0, 0.0, 1.0, 0.0],
            });
        }
        Ok(Embedding {
            vector: face_vector(who),
        })
    }

    fn eye_landmarks(&mut self, img: &DynamicImage) -> Result<Option<EyeLandmarks>> {
        let (scene, _) = scene(img);
        let opening = match scene {
            OPEN | BLURRY => 10.0,
            CLOSED => 0.0,
            _ => return Ok(None),
        };
        Ok(Some(EyeLandmarks {
            upper: (10.0, 10.0 - opening / 2.0),
            lower: (10.0, 10.0 + opening / 2.0),
            outer: (0.0, 10.0),
            inner: (20.0, 10.0),
        }))
    }

    fn model_version(&self) -> &str {
        &self.version
    }
}

/// Replays a fixed list of frames; counts how often it was opened.
pub struct Frames {
    frames: Vec<RgbImage>,
    pub opened: AtomicUsize,
}

impl Frames {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

struct Replay(std::vec::IntoIter<RgbImage>);

impl FrameSource for Replay {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.0.next())
    }
}

impl FrameDevice for Frames {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Replay(self.frames.clone().into_iter())))
    }
}

/// Never-ending stream of empty frames.
pub struct EmptyRoom;

struct Endless;

impl FrameSource for Endless {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        std::thread::sleep(Duration::from_millis(2));
        Ok(Some(frame(EMPTY, 0)))
    }
}

impl FrameDevice for EmptyRoom {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(Endless))
    }
}

pub struct Unplugged;

impl FrameDevice for Unplugged {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        anyhow::bail!("/dev/video9: no such device")
    }
}

/// Voice encoder returning the vector registered for the clip's first sample.
pub struct ScriptedVoice {
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedVoice {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
            },
            calls,
        )
    }
}

pub fn voice_vector(speaker: f32) -> Vec<f32> {
    if speaker < 0.15 {
        vec![1.0, 0.2, 0.0]
    } else if speaker < 0.25 {
        vec![0.95, 0.3, 0.05]
    } else {
        vec![0.0, 0.3, 1.0]
    }
}

impl VoiceEncoder for ScriptedVoice {
    fn encode(&mut self, samples: &[f32], _sample_rate: u32) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let speaker = samples.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        Ok(voice_vector(speaker))
    }

    fn model_version(&self) -> &str {
        "scripted-voice"
    }
}

/// One second of a tone whose amplitude picks the speaker.
pub fn speech(amplitude: f32) -> Vec<f32> {
    (0..16_000)
        .map(|i| amplitude * (i as f32 * 0.07).sin())
        .collect()
}

pub struct Heard(pub Mutex<Option<String>>);

impl Heard {
    pub fn says(text: &str) -> Self {
        Self(Mutex::new(Some(text.to_string())))
    }

    pub fn offline() -> Self {
        Self(Mutex::new(None))
    }
}

impl Transcriber for Heard {
    fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> Result<String> {
        match self.0.lock().map(|t| t.clone()) {
            Ok(Some(text)) => Ok(text),
            _ => anyhow::bail!("recognizer unreachable"),
        }
    }
}

pub struct Tape(pub Vec<f32>);

impl Microphone for Tape {
    fn record(&mut self, _duration: Duration, _sample_rate: u32) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}

pub struct DeadMic;

impl Microphone for DeadMic {
    fn record(&mut self, _duration: Duration, _sample_rate: u32) -> Result<Vec<f32>> {
        anyhow::bail!("input device busy")
    }
}

pub struct SilentDriver;

impl Microphone for SilentDriver {
    fn record(&mut self, duration: Duration, _sample_rate: u32) -> Result<Vec<f32>> {
        Err(CaptureTimeout(duration).into())
    }
}
