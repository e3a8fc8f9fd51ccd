//! GoExport Render Engine
//!
//! Everything that shells out to ffmpeg/ffprobe after a capture exists:
//!
//! ```text
//! raw capture ──► encode pass ──► clip ──► trim ──┐
//!                                                 ├──► concat (copy or re-encode) ──► output.mp4
//!                                   outro clip ───┘
//! ```
//!
//! Processes run synchronously; stderr is drained on a helper thread so a
//! chatty encoder never blocks on a full pipe.

pub mod editor;
pub mod encode;
pub mod ffmpeg;
pub mod filter;

pub use editor::*;
pub use encode::*;
pub use ffmpeg::*;
