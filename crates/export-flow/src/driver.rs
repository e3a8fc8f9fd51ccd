//! Browser remote-control surface.

use std::sync::Arc;

use serde_json::Value;

use goexport_common::error::ExportResult;
use goexport_common::shutdown::CleanupHook;

/// Keys the plugin-enable sequence presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Tab,
    Space,
    ArrowDown,
    Enter,
}

impl Key {
    /// WebDriver key code point.
    pub fn code_point(self) -> &'static str {
        match self {
            Key::Tab => "\u{E004}",
            Key::Space => "\u{E00D}",
            Key::ArrowDown => "\u{E015}",
            Key::Enter => "\u{E007}",
        }
    }
}

/// One live browser.
#[async_trait::async_trait]
pub trait PlaybackDriver: Send {
    async fn navigate(&mut self, url: &str) -> ExportResult<()>;

    async fn current_url(&mut self) -> ExportResult<String>;

    /// Run `script` in the current page.
    async fn inject_script_now(&mut self, script: &str) -> ExportResult<()>;

    /// Run `script` at the start of every document loaded from now on.
    async fn inject_script_on_future_loads(&mut self, script: &str) -> ExportResult<()>;

    /// `window[name]`, or `None` while it is undefined.
    async fn read_global(&mut self, name: &str) -> ExportResult<Option<Value>>;

    async fn press_key(&mut self, key: Key) -> ExportResult<()>;

    async fn back(&mut self) -> ExportResult<()>;

    async fn refresh(&mut self) -> ExportResult<()>;

    /// End the browser session and release its processes.
    async fn close(&mut self) -> ExportResult<()>;

    /// Hook that kills the browser if the process is interrupted.
    fn cleanup_hook(&self) -> Option<Arc<dyn CleanupHook>> {
        None
    }
}

/// Opens browsers.
#[async_trait::async_trait]
pub trait DriverLauncher: Send + Sync {
    async fn launch(&self) -> ExportResult<Box<dyn PlaybackDriver>>;
}
