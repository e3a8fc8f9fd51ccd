//! GoExport Capture Engine
//!
//! Produces one video+audio file for a bounded window of screen time and
//! reports exactly when recording really started and stopped.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Capture facade               │
//! │        (backend chosen once at startup)      │
//! │   ┌─────────────────┐   ┌─────────────────┐  │
//! │   │ NativeBackend   │   │ ObsBackend      │  │
//! │   │ ffmpeg raw pass │   │ websocket v5    │  │
//! │   │ + encode pass   │   │ + state events  │  │
//! │   └────────┬────────┘   └────────┬────────┘  │
//! │            ▼                     ▼           │
//! │          CaptureSession (host clock)         │
//! └──────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod facade;
pub mod obs_client;
pub mod steps;

pub use backend::{CaptureBackend, CaptureRequest, NativeBackend, ObsBackend};
pub use facade::Capture;
pub use obs_client::{ObsClient, RecordState};
pub use steps::{StepRecord, StepReport};
