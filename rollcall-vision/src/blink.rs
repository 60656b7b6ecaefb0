//! Blink detection over face-mesh eye landmarks.
//!
//! Each frame contributes one eye-aspect ratio, `vertical / horizontal * 100`,
//! measured between the upper/lower lid and the two eye corners. The ratios of
//! the last [`WINDOW`] frames are averaged; a blink fires when the average
//! drops below the threshold while the detector is idle. Firing starts a
//! cooldown counter that ticks once per frame, so a single closed-eye episode
//! spanning several frames registers as exactly one blink.
//!
//! The detector is a pure function of `(landmarks, state)`, which keeps it
//! testable without a camera.

use std::collections::VecDeque;

/// Number of ratios kept in the sliding window.
pub const WINDOW: usize = 5;

/// Face-mesh indices of the left-eye points used for the ratio.
pub const LEFT_EYE_UPPER: usize = 159;
pub const LEFT_EYE_LOWER: usize = 23;
pub const LEFT_EYE_OUTER: usize = 130;
pub const LEFT_EYE_INNER: usize = 243;

/// The four eye points needed for one aspect-ratio sample, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLandmarks {
    pub upper: (f32, f32),
    pub lower: (f32, f32),
    pub outer: (f32, f32),
    pub inner: (f32, f32),
}

impl EyeLandmarks {
    pub fn vertical(&self) -> f32 {
        distance(self.upper, self.lower)
    }

    pub fn horizontal(&self) -> f32 {
        distance(self.outer, self.inner)
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// Where the debounce state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkPhase {
    /// Ready to fire.
    Idle,
    /// A blink fired on the most recent frame.
    Armed,
    /// Suppressing further blinks until the counter runs out.
    Cooldown,
}

/// Per-capture liveness state. Created when a capture starts and dropped with
/// it; never shared between captures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LivenessState {
    ratios: VecDeque<f32>,
    counter: u32,
}

impl LivenessState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ratios(&self) -> &VecDeque<f32> {
        &self.ratios
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn average(&self) -> Option<f32> {
        if self.ratios.is_empty() {
            return None;
        }
        Some(self.ratios.iter().sum::<f32>() / self.ratios.len() as f32)
    }

    pub fn phase(&self) -> BlinkPhase {
        // the firing frame also ticks, leaving the counter at 2
        match self.counter {
            0 => BlinkPhase::Idle,
            1 | 2 => BlinkPhase::Armed,
            _ => BlinkPhase::Cooldown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkDetector {
    /// Average ratio below which the eye counts as closed.
    pub threshold: f32,
    /// Frames to suppress after a blink fires.
    pub cooldown: u32,
}

impl Default for BlinkDetector {
    fn default() -> Self {
        Self {
            threshold: 32.0,
            cooldown: 10,
        }
    }
}

impl BlinkDetector {
    pub fn new(threshold: f32, cooldown: u32) -> Self {
        Self {
            threshold,
            cooldown,
        }
    }

    /// Advance the state machine by one frame.
    ///
    /// Returns whether a blink fired and the next state. A zero eye width is a
    /// degenerate detection: the input state comes back untouched.
    pub fn step(&self, eye: &EyeLandmarks, state: &LivenessState) -> (bool, LivenessState) {
        let horizontal = eye.horizontal();
        if horizontal == 0.0 {
            return (false, state.clone());
        }

        let mut next = state.clone();
        next.ratios.push_back(eye.vertical() / horizontal * 100.0);
        while next.ratios.len() > WINDOW {
            next.ratios.pop_front();
        }
        let average = next.average().unwrap_or(f32::INFINITY);

        let mut blink = false;
        if average < self.threshold && next.counter == 0 {
            blink = true;
            next.counter = 1;
        }
        if next.counter != 0 {
            next.counter += 1;
            if next.counter > self.cooldown {
                next.counter = 0;
            }
        }

        (blink, next)
    }

    /// In-place form of [`step`](Self::step) for capture loops.
    pub fn observe(&self, eye: &EyeLandmarks, state: &mut LivenessState) -> bool {
        let (blink, next) = self.step(eye, state);
        *state = next;
        blink
    }
}
