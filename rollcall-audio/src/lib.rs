pub mod capture;
pub mod encoder;
pub mod mfcc;
pub mod model;
pub mod signal;
pub mod wav;

pub use capture::{CaptureTimeout, Microphone, WavInput};
#[cfg(feature = "cpal")]
pub use capture::LiveMicrophone;
pub use encoder::{MfccEncoder, OnnxVoiceEncoder, VoiceEncoder};
pub use mfcc::{Mfcc, MfccConfig};
pub use signal::{has_speech, mean_energy, SILENCE_THRESHOLD};
pub use wav::Clip;
