//! Chromium through chromedriver, spoken to over the W3C WebDriver protocol.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::{Child, Command};

use goexport_common::config::AppConfig;
use goexport_common::error::{ExportError, ExportResult};
use goexport_common::shutdown::CleanupHook;

use crate::driver::{DriverLauncher, Key, PlaybackDriver};

const READY_TIMEOUT: Duration = Duration::from_secs(15);
const READY_POLL: Duration = Duration::from_millis(100);

type SharedChild = Arc<tokio::sync::Mutex<Option<Child>>>;

/// Browser command-line switches.
pub fn chrome_args(config: &AppConfig, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--disable-infobars".to_string(),
        "--disable-bookmarks-bar".to_string(),
        "--kiosk".to_string(),
    ];
    if cfg!(target_os = "linux") {
        args.push("--no-sandbox".to_string());
    } else {
        args.push("--allow-running-insecure-content".to_string());
    }
    args.push("--force-device-scale-factor=1".to_string());
    args.push("--high-dpi-support=1".to_string());
    if let Some(plugin) = &config.tools.flash_plugin {
        args.push(format!("--ppapi-flash-path={}", plugin.display()));
        args.push(format!("--ppapi-flash-version={}", config.tools.flash_version));
    }
    args.push(format!("--user-data-dir={}", profile_dir.display()));
    args
}

/// `POST /session` body.
pub fn session_capabilities(config: &AppConfig, profile_dir: &Path) -> Value {
    let mut options = json!({
        "args": chrome_args(config, profile_dir),
        "excludeSwitches": ["enable-automation"],
    });
    if let Some(binary) = &config.tools.chromium {
        options["binary"] = Value::String(binary.display().to_string());
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": options,
            }
        }
    })
}

/// Starts chromedriver and opens one browser session per launch.
pub struct ChromeDriverLauncher {
    config: AppConfig,
    http: reqwest::Client,
}

impl ChromeDriverLauncher {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn wait_ready(&self, base: &str, child: &mut Child) -> ExportResult<()> {
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(ExportError::driver(format!("chromedriver exited early ({status})")));
            }
            if let Ok(response) = self.http.get(format!("{base}/status")).send().await {
                if let Ok(body) = response.json::<Value>().await {
                    if body["value"]["ready"].as_bool() == Some(true) {
                        return Ok(());
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExportError::driver("chromedriver did not become ready"));
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }
}

#[async_trait::async_trait]
impl DriverLauncher for ChromeDriverLauncher {
    async fn launch(&self) -> ExportResult<Box<dyn PlaybackDriver>> {
        let port = free_port()?;
        let base = format!("http://127.0.0.1:{port}");
        let mut child = Command::new(&self.config.tools.chromedriver)
            .arg(format!("--port={port}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExportError::driver(format!(
                    "Failed to start {}: {e}",
                    self.config.tools.chromedriver.display()
                ))
            })?;
        self.wait_ready(&base, &mut child).await?;

        let profile_dir = self.config.paths.data_dir.join(format!(
            "{}_chrome_profile_temp",
            timestamp_ms()
        ));
        let body = session_capabilities(&self.config, &profile_dir);
        let value = send(self.http.post(format!("{base}/session")).json(&body)).await?;
        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| ExportError::driver("chromedriver returned no session id"))?
            .to_string();
        tracing::info!(pid = ?child.id(), port, "Browser started");

        Ok(Box::new(ChromeSession {
            http: self.http.clone(),
            session_url: format!("{base}/session/{session_id}"),
            process: Arc::new(tokio::sync::Mutex::new(Some(child))),
            profile_dir,
        }))
    }
}

/// One WebDriver session.
pub struct ChromeSession {
    http: reqwest::Client,
    session_url: String,
    process: SharedChild,
    profile_dir: PathBuf,
}

impl ChromeSession {
    async fn post(&self, path: &str, body: Value) -> ExportResult<Value> {
        send(self.http.post(format!("{}/{path}", self.session_url)).json(&body)).await
    }

    async fn execute(&self, script: &str) -> ExportResult<Value> {
        self.post("execute/sync", json!({ "script": script, "args": [] })).await
    }
}

#[async_trait::async_trait]
impl PlaybackDriver for ChromeSession {
    async fn navigate(&mut self, url: &str) -> ExportResult<()> {
        tracing::debug!(url, "Navigating");
        self.post("url", json!({ "url": url })).await.map(|_| ())
    }

    async fn current_url(&mut self) -> ExportResult<String> {
        let value = send(self.http.get(format!("{}/url", self.session_url))).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExportError::driver("Current URL is not a string"))
    }

    async fn inject_script_now(&mut self, script: &str) -> ExportResult<()> {
        self.execute(script).await.map(|_| ())
    }

    async fn inject_script_on_future_loads(&mut self, script: &str) -> ExportResult<()> {
        self.post(
            "goog/cdp/execute",
            json!({
                "cmd": "Page.addScriptToEvaluateOnNewDocument",
                "params": { "source": script },
            }),
        )
        .await
        .map(|_| ())
    }

    async fn read_global(&mut self, name: &str) -> ExportResult<Option<Value>> {
        let script = format!("return window[{}];", Value::String(name.to_string()));
        let value = self.execute(&script).await?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn press_key(&mut self, key: Key) -> ExportResult<()> {
        let code = key.code_point();
        self.post(
            "actions",
            json!({
                "actions": [{
                    "type": "key",
                    "id": "keyboard",
                    "actions": [
                        { "type": "keyDown", "value": code },
                        { "type": "keyUp", "value": code },
                    ],
                }]
            }),
        )
        .await
        .map(|_| ())
    }

    async fn back(&mut self) -> ExportResult<()> {
        self.post("back", json!({})).await.map(|_| ())
    }

    async fn refresh(&mut self) -> ExportResult<()> {
        self.post("refresh", json!({})).await.map(|_| ())
    }

    async fn close(&mut self) -> ExportResult<()> {
        let quit = send(self.http.delete(&self.session_url)).await;
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            tracing::debug!(dir = %self.profile_dir.display(), error = %e, "Profile directory not removed");
        }
        tracing::info!("Browser closed");
        quit.map(|_| ())
    }

    fn cleanup_hook(&self) -> Option<Arc<dyn CleanupHook>> {
        Some(Arc::new(BrowserCleanup {
            http: self.http.clone(),
            session_url: self.session_url.clone(),
            process: Arc::clone(&self.process),
        }))
    }
}

struct BrowserCleanup {
    http: reqwest::Client,
    session_url: String,
    process: SharedChild,
}

#[async_trait::async_trait]
impl CleanupHook for BrowserCleanup {
    fn name(&self) -> &str {
        "browser"
    }

    async fn run(&self) {
        let quit = self
            .http
            .delete(&self.session_url)
            .timeout(Duration::from_secs(2))
            .send()
            .await;
        if let Err(e) = quit {
            tracing::debug!(error = %e, "Browser session not closed");
        }
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}

/// Send a WebDriver command and unwrap its `value`.
async fn send(request: reqwest::RequestBuilder) -> ExportResult<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| ExportError::driver(format!("WebDriver request failed: {e}")))?;
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| ExportError::driver(format!("Unreadable WebDriver response: {e}")))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(ExportError::driver(format!(
            "{}: {}",
            value["error"].as_str().unwrap_or("webdriver error"),
            value["message"].as_str().unwrap_or_default()
        )));
    }
    Ok(value)
}

fn free_port() -> ExportResult<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn timestamp_ms() -> i64 {
    goexport_common::clock::HostClock::start().now_ms()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_args_include_plugin_and_profile() {
        let mut config = AppConfig::default();
        config.tools.flash_plugin = Some(PathBuf::from("/opt/flash/libpepflashplayer.so"));
        let args = chrome_args(&config, Path::new("/tmp/profile"));

        assert!(args.contains(&"--kiosk".to_string()));
        assert!(args.contains(&"--force-device-scale-factor=1".to_string()));
        assert!(args.contains(&"--ppapi-flash-path=/opt/flash/libpepflashplayer.so".to_string()));
        assert!(args.contains(&"--ppapi-flash-version=34.0.0.137".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--user-data-dir=/tmp/profile"));
    }

    #[test]
    fn test_capabilities_exclude_automation_switch() {
        let mut config = AppConfig::default();
        config.tools.chromium = Some(PathBuf::from("/opt/chromium/chrome"));
        let caps = session_capabilities(&config, Path::new("/tmp/p"));
        let options = &caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"];
        assert_eq!(options["excludeSwitches"], json!(["enable-automation"]));
        assert_eq!(options["binary"], "/opt/chromium/chrome");
        assert!(options["args"].as_array().unwrap().len() >= 6);
    }

    #[test]
    fn test_key_code_points() {
        assert_eq!(Key::Tab.code_point(), "\u{E004}");
        assert_eq!(Key::Enter.code_point(), "\u{E007}");
    }
}
