//! Per-cycle export state and output naming.

use std::path::{Path, PathBuf};

use crate::resolution::{AspectRatio, Resolution};
use crate::service::{ServiceDescriptor, TemplateVars};
use crate::session::{CaptureSession, PlaybackEvent};

/// Container extension of every deliverable.
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Where one cycle writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    /// Name shared by the raw capture, rendered output and project folder.
    pub readable_name: String,

    /// Raw capture written by the recorder.
    pub recording: PathBuf,

    /// Final render target (before collision suffixing).
    pub rendered: PathBuf,

    /// Folder receiving untouched clips when auto-edit is off.
    pub project_folder: PathBuf,
}

impl JobPaths {
    pub fn new(data_dir: &Path, output_dir: &Path, readable_name: &str) -> Self {
        let file_name = format!("{readable_name}.{OUTPUT_EXTENSION}");
        Self {
            readable_name: readable_name.to_string(),
            recording: data_dir.join(&file_name),
            rendered: output_dir.join(&file_name),
            project_folder: output_dir.join(readable_name),
        }
    }
}

/// Mutable state of one export cycle.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub service: &'static ServiceDescriptor,
    pub aspect: AspectRatio,
    pub resolution: Resolution,
    pub movie_id: Option<String>,
    pub owner_id: Option<String>,
    pub auto_edit: bool,
    pub paths: JobPaths,
    pub session: Option<CaptureSession>,
    pub playback: Option<PlaybackEvent>,
}

impl ExportJob {
    pub fn new(
        service: &'static ServiceDescriptor,
        aspect: AspectRatio,
        resolution: Resolution,
        auto_edit: bool,
        paths: JobPaths,
    ) -> Self {
        Self {
            service,
            aspect,
            resolution,
            movie_id: None,
            owner_id: None,
            auto_edit,
            paths,
            session: None,
            playback: None,
        }
    }

    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars {
            movie_id: self.movie_id.clone(),
            owner_id: self.owner_id.clone(),
            width: self.resolution.width,
            height: self.resolution.height,
            wide: self.resolution.widescreen,
        }
    }

    /// Drop measurements so the job can be re-run.
    pub fn clear_measurements(&mut self) {
        self.session = None;
        self.playback = None;
    }
}

/// `YYYY-MM-DD HH-MM-SS` in local time.
pub fn readable_name() -> String {
    readable_name_at(chrono::Local::now())
}

pub fn readable_name_at<Tz: chrono::TimeZone>(at: chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%Y-%m-%d %H-%M-%S").to_string()
}

/// First of `path`, `stem_1.ext`, `stem_2.ext`, ... that does not exist.
pub fn unique_output_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    (1u32..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            };
            parent.join(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}
