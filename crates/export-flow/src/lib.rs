//! GoExport Export Flow
//!
//! Runs export cycles end to end:
//!
//! ```text
//! configure ─► reachability ─► exporting ─────────────────────► editing ─► done
//!                               │ static server (if hosted)       │
//!                               │ browser + plugin enable         ├─ auto-edit: add + trim
//!                               │ capture start/stop              └─ otherwise: move to project folder
//!                               └ startRecord / stopRecord waits
//! ```
//!
//! Host and page timestamps meet only in [`reconcile`].

pub mod driver;
pub mod flow;
pub mod hosting;
pub mod plugin;
pub mod reachability;
pub mod reconcile;
pub mod scripts;
pub mod state;
pub mod wait;
pub mod webdriver;

pub use driver::{DriverLauncher, Key, PlaybackDriver};
pub use flow::{ExportFlow, FlowTimings};
pub use hosting::StaticServer;
pub use reachability::{HttpProbe, Reachability};
pub use reconcile::{reconcile, TrimWindow};
pub use state::{ExportPhase, FlowState};
pub use wait::{wait_until, WaitOutcome};
pub use webdriver::ChromeDriverLauncher;
