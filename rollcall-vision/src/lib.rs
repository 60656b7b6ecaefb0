pub mod blink;
pub mod face;
pub mod mesh;
pub mod model;
pub mod pipeline;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use blink::{BlinkDetector, BlinkPhase, EyeLandmarks, LivenessState};
pub use face::{largest_face, Detection, Embedding};
pub use model::ModelPaths;
pub use pipeline::{FaceEngine, Pipeline};
pub use video::{DeviceSpec, FrameDevice, FrameSource, ImageDirectory};
