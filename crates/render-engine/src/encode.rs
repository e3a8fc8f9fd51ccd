//! Deliverable encode pass for lossless raw captures.

use std::path::{Path, PathBuf};

use goexport_common::config::EncodeConfig;
use goexport_common::error::{ExportError, ExportResult};

use crate::ffmpeg::Ffmpeg;

/// Settings of the encode pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    pub preset: String,
    pub crf: u32,
}

impl EncodeSettings {
    pub fn from_config(config: &EncodeConfig, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            preset: config.preset.clone(),
            crf: config.crf,
        }
    }
}

/// `<dir>/<stem>_raw.mkv` next to the deliverable.
pub fn raw_capture_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    output.with_file_name(format!("{stem}_raw.mkv"))
}

/// ffmpeg arguments for the encode pass.
pub fn encode_args(raw: &Path, output: &Path, settings: &EncodeSettings) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        raw.display().to_string(),
        "-vf".to_string(),
        format!("scale={}:{}", settings.width, settings.height),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        settings.preset.clone(),
        "-crf".to_string(),
        settings.crf.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.display().to_string(),
    ]
}

/// Encode `raw` into `output`. The raw file is removed on success and kept
/// on failure so the capture is never lost.
pub fn encode_capture(
    ffmpeg: &Ffmpeg,
    raw: &Path,
    output: &Path,
    settings: &EncodeSettings,
) -> ExportResult<()> {
    if !raw.exists() {
        return Err(ExportError::FileNotFound {
            path: raw.to_path_buf(),
        });
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(
        raw = %raw.display(),
        output = %output.display(),
        preset = %settings.preset,
        crf = settings.crf,
        "Encoding capture"
    );

    let args = encode_args(raw, output, settings);
    match ffmpeg.run(&args) {
        Ok(_) => {
            if let Err(e) = std::fs::remove_file(raw) {
                tracing::warn!(raw = %raw.display(), error = %e, "Could not remove raw capture");
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(raw = %raw.display(), error = %e, "Encode failed, raw capture kept");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_capture_path() {
        assert_eq!(
            raw_capture_path(Path::new("/data/2024-01-01 10-00-00.mp4")),
            PathBuf::from("/data/2024-01-01 10-00-00_raw.mkv")
        );
    }

    #[test]
    fn test_encode_args_use_settings() {
        let settings = EncodeSettings::from_config(&EncodeConfig::default(), 854, 480);
        let args = encode_args(Path::new("in.mkv"), Path::new("out.mp4"), &settings);
        let joined = args.join(" ");
        assert!(joined.contains("-vf scale=854:480"));
        assert!(joined.contains("-preset medium"));
        assert!(joined.contains("-crf 23"));
        assert!(joined.contains("-c:a aac"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_encode_missing_raw_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = encode_capture(
            &Ffmpeg::default(),
            &dir.path().join("missing_raw.mkv"),
            &dir.path().join("out.mp4"),
            &EncodeSettings::from_config(&EncodeConfig::default(), 640, 360),
        )
        .unwrap_err();
        assert!(matches!(err, ExportError::FileNotFound { .. }));
    }
}
