//! Display/monitor detection.

use std::process::Command;

use goexport_common::error::{ExportError, ExportResult};
use serde::{Deserialize, Serialize};

/// Information about a connected monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorInfo {
    /// Output name (for example `HDMI-1`).
    pub name: String,

    /// Resolution in physical pixels.
    pub width: u32,
    pub height: u32,

    /// Position in the virtual desktop (pixels).
    pub x: i32,
    pub y: i32,

    /// Refresh rate in Hz of the active mode.
    pub refresh_rate_hz: u32,

    /// Whether this is the primary monitor.
    pub primary: bool,
}

impl MonitorInfo {
    pub fn contains_size(&self, width: u32, height: u32) -> bool {
        width <= self.width && height <= self.height
    }
}

/// Display server type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayServer {
    Wayland,
    X11,
    Windows,
    Unknown,
}

/// Detect the current display server.
pub fn detect_display_server() -> DisplayServer {
    if cfg!(windows) {
        DisplayServer::Windows
    } else if std::env::var("WAYLAND_DISPLAY").is_ok() {
        DisplayServer::Wayland
    } else if std::env::var("DISPLAY").is_ok() {
        DisplayServer::X11
    } else {
        DisplayServer::Unknown
    }
}

/// Detect connected monitors via `xrandr --query`.
pub fn detect_monitors() -> ExportResult<Vec<MonitorInfo>> {
    tracing::debug!("Detecting monitors");

    let output = Command::new("xrandr")
        .arg("--query")
        .output()
        .map_err(|e| ExportError::config(format!("xrandr unavailable: {e}")))?;

    if !output.status.success() {
        return Err(ExportError::config(format!(
            "xrandr exited with {}",
            output.status
        )));
    }

    let monitors = parse_xrandr(&String::from_utf8_lossy(&output.stdout));
    if monitors.is_empty() {
        return Err(ExportError::config("xrandr reported no active outputs"));
    }
    Ok(monitors)
}

/// The primary monitor, or the first one when none is flagged.
pub fn primary_monitor(monitors: &[MonitorInfo]) -> Option<&MonitorInfo> {
    monitors.iter().find(|m| m.primary).or_else(|| monitors.first())
}

/// Outcome of checking a capture size against the display.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayFit {
    Fits,
    Exceeds { monitor: MonitorInfo },
    /// Detection failed; the caller should not block on it.
    Unknown,
}

/// Check `width`x`height` against the primary monitor.
pub fn check_display_fits(width: u32, height: u32) -> DisplayFit {
    match detect_monitors() {
        Ok(monitors) => fit_against(&monitors, width, height),
        Err(e) => {
            tracing::warn!(error = %e, "Could not detect display size, skipping fit check");
            DisplayFit::Unknown
        }
    }
}

/// Check a size against already-detected monitors.
pub fn fit_against(monitors: &[MonitorInfo], width: u32, height: u32) -> DisplayFit {
    match primary_monitor(monitors) {
        Some(m) if m.contains_size(width, height) => DisplayFit::Fits,
        Some(m) => DisplayFit::Exceeds { monitor: m.clone() },
        None => DisplayFit::Unknown,
    }
}

/// Parse connected outputs with an active mode from `xrandr --query` text.
pub fn parse_xrandr(text: &str) -> Vec<MonitorInfo> {
    let mut monitors: Vec<MonitorInfo> = Vec::new();
    let mut current_active = false;

    for line in text.lines() {
        if !line.starts_with(char::is_whitespace) {
            current_active = false;
            let mut tokens = line.split_whitespace();
            let Some(name) = tokens.next() else { continue };
            if tokens.next() != Some("connected") {
                continue;
            }
            let rest: Vec<&str> = tokens.collect();
            let primary = rest.first() == Some(&"primary");
            if let Some((width, height, x, y)) = rest.iter().find_map(|t| parse_geometry(t)) {
                monitors.push(MonitorInfo {
                    name: name.to_string(),
                    width,
                    height,
                    x,
                    y,
                    refresh_rate_hz: 60,
                    primary,
                });
                current_active = true;
            }
        } else if current_active && line.contains('*') {
            let rate = line
                .split_whitespace()
                .find(|t| t.contains('*'))
                .and_then(|t| t.trim_end_matches(&['*', '+'][..]).parse::<f64>().ok());
            if let (Some(rate), Some(m)) = (rate, monitors.last_mut()) {
                m.refresh_rate_hz = rate.round() as u32;
            }
        }
    }

    monitors
}

/// Parse `WxH+X+Y`.
fn parse_geometry(token: &str) -> Option<(u32, u32, i32, i32)> {
    let (size, offsets) = token.split_once('+')?;
    let (w, h) = size.split_once('x')?;
    let (x, y) = offsets.split_once('+')?;
    Some((w.parse().ok()?, h.parse().ok()?, x.parse().ok()?, y.parse().ok()?))
}
