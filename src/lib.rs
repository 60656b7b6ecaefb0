pub mod attendance;
pub mod challenge;
pub mod config;
pub mod error;
pub mod face;
pub mod gallery;
pub mod geo;
pub mod matcher;
pub mod proxy;
pub mod result;
pub mod transcribe;
pub mod voice;

pub use attendance::{mark_attendance, AttendanceFact, AttendanceLedger, FileLedger, MarkRequest, MemoryLedger};
pub use challenge::{Challenge, ChallengeBook, Purpose};
pub use error::{FailureKind, VerifyError, VerifyResult};
pub use face::{FaceSettings, FaceVerifier};
pub use gallery::{EmbeddingGallery, FileStore, GalleryStore, MemoryStore, Modality};
pub use geo::{Coordinates, GeoCheckInput, GeoVerifier, Geofence};
pub use proxy::{IpApi, ProxyVerdict, ReputationSource};
pub use result::{Detail, VerificationResult, VoiceMode};
pub use transcribe::{SpeechApi, Transcriber};
pub use voice::{VoiceSettings, VoiceVerifier};

// Re-export sensor crate types for convenience
pub use rollcall_audio::{Microphone, VoiceEncoder, WavInput};
pub use rollcall_vision::{DeviceSpec, FaceEngine, FrameDevice, FrameSource, Pipeline};
