pub mod client;
pub mod detection;
pub mod network;
pub mod service;

pub use client::DetectionClient;
pub use detection::{BoundingBox, Detection, Detector, DetectorError, ValidationError};
pub use network::{FrameCodec, FrameError};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, DetectionNode, Server, ServerConfig,
    Shutdown,
};
