//! Application configuration.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Working and output directories.
    pub paths: PathsConfig,

    /// External tool locations.
    pub tools: ToolPaths,

    /// OBS remote control connection.
    pub obs: ObsConfig,

    /// Local static-file server for services that need hosting.
    pub hosting: HostingConfig,

    /// Playback wait bounds.
    pub timeouts: TimeoutConfig,

    /// Native capture and encode settings.
    pub encode: EncodeConfig,

    /// Plugin-enable key sequence tuning.
    pub plugin: PluginConfig,

    /// Values chosen on the previous run.
    pub last_used: LastUsed,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Working and output directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Where raw captures are written.
    pub data_dir: PathBuf,

    /// User-visible folder for rendered videos and project folders.
    pub output_dir: PathBuf,

    /// Bootstrap pages and outro clips.
    pub assets_dir: PathBuf,

    /// Document root served by the hosting server.
    pub server_root: PathBuf,
}

/// External tool locations. Bare names are resolved through `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub chromedriver: PathBuf,

    /// Browser binary; chromedriver's default when unset.
    pub chromium: Option<PathBuf>,

    /// Legacy plugin library handed to the browser.
    pub flash_plugin: Option<PathBuf>,

    /// Version string reported for the plugin.
    pub flash_version: String,

    /// PulseAudio source recorded by the native backend on Linux.
    pub audio_source: String,
}

/// OBS websocket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub fps: u32,

    /// How long the facade waits for OBS before choosing the native recorder.
    pub connect_timeout_ms: u64,

    /// Bound on waiting for a recording-state confirmation.
    pub state_timeout_ms: u64,
}

/// Local hosting server address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostingConfig {
    pub host: String,
    pub port: u16,
}

/// Playback wait bounds in minutes; `0` disables the bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub load_minutes: u64,
    pub completion_minutes: u64,
}

/// Native capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    /// Capture framerate of the raw pass.
    pub framerate: u32,

    /// x264 preset of the deliverable encode pass.
    pub preset: String,

    /// x264 CRF of the deliverable encode pass.
    pub crf: u32,
}

/// Plugin-enable key sequence tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// TAB presses needed to reach the plugin permission control.
    pub base_tab_count: u32,

    /// Per-service adjustment to `base_tab_count`.
    pub step_offsets: HashMap<String, i32>,

    /// Pause between key presses.
    pub key_delay_ms: u64,

    /// Services that start recording before navigation and trim afterwards.
    pub legacy_timing: Vec<String>,
}

/// Values chosen on the previous run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LastUsed {
    pub service: Option<String>,
    pub aspect_ratio: Option<String>,
    pub resolution: Option<String>,
    pub auto_edit: Option<bool>,
    pub movie_id: Option<String>,
    pub owner_id: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "goexport=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            tools: ToolPaths::default(),
            obs: ObsConfig::default(),
            hosting: HostingConfig::default(),
            timeouts: TimeoutConfig::default(),
            encode: EncodeConfig::default(),
            plugin: PluginConfig::default(),
            last_used: LastUsed::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data = data_home().join("goexport");
        Self {
            data_dir: data.join("data"),
            output_dir: video_home().join("GoExport"),
            assets_dir: data.join("assets"),
            server_root: data.join("server"),
        }
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            chromedriver: PathBuf::from("chromedriver"),
            chromium: None,
            flash_plugin: None,
            flash_version: "34.0.0.137".to_string(),
            audio_source: "default".to_string(),
        }
    }
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4455,
            password: String::new(),
            fps: 60,
            connect_timeout_ms: 2_000,
            state_timeout_ms: 10_000,
        }
    }
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 26519,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            load_minutes: 30,
            completion_minutes: 0,
        }
    }
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            framerate: 30,
            preset: "medium".to_string(),
            crf: 23,
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            base_tab_count: 19,
            step_offsets: HashMap::new(),
            key_delay_ms: 50,
            legacy_timing: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl PluginConfig {
    /// TAB presses for the given service key.
    pub fn tab_count_for(&self, service: &str) -> u32 {
        let offset = self.step_offsets.get(service).copied().unwrap_or(0);
        (self.base_tab_count as i64 + offset as i64).max(0) as u32
    }

    pub fn uses_legacy_timing(&self, service: &str) -> bool {
        self.legacy_timing.iter().any(|s| s == service)
    }
}

impl AppConfig {
    /// Load config from a specific file, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if !config_path.exists() {
            return Self::default();
        }
        let parsed = std::fs::read_to_string(config_path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()));
        match parsed {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(path = %config_path.display(), %error, "Config unusable, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to a specific file.
    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    base.join("goexport").join("config.json")
}

fn data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local").join("share"))
}

fn video_home() -> PathBuf {
    std::env::var("XDG_VIDEOS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join("Videos"))
}

fn home_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.obs.port, 4455);
        assert_eq!(config.hosting.port, 26519);
        assert_eq!(config.timeouts.load_minutes, 30);
        assert_eq!(config.timeouts.completion_minutes, 0);
        assert_eq!(config.encode.crf, 23);
        assert_eq!(config.plugin.base_tab_count, 19);
    }

    #[test]
    fn test_tab_count_applies_service_offset() {
        let mut plugin = PluginConfig::default();
        plugin.step_offsets.insert("ft".to_string(), 2);
        plugin.step_offsets.insert("weird".to_string(), -40);
        assert_eq!(plugin.tab_count_for("ft"), 21);
        assert_eq!(plugin.tab_count_for("local"), 19);
        assert_eq!(plugin.tab_count_for("weird"), 0);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{ "obs": { "port": 4456 }, "last_used": { "service": "ft" } }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.obs.port, 4456);
        assert_eq!(config.obs.host, "localhost");
        assert_eq!(config.last_used.service.as_deref(), Some("ft"));
        assert_eq!(config.timeouts.load_minutes, 30);
    }

    #[test]
    fn test_save_and_load_last_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.last_used.movie_id = Some("m-42".to_string());
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.last_used, config.last_used);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.obs.port, 4455);
    }
}
