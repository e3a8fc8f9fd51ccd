//! Clip assembly editor.
//!
//! The editor owns an ordered list of clips (index 0 plays first) and turns
//! it into one output file. It never deletes the files it references.

use std::path::{Path, PathBuf};

use goexport_common::error::{ExportError, ExportResult};

use crate::ffmpeg::{Ffmpeg, ProgressCallback};
use crate::filter::{concat_manifest, normalize_concat_graph, OUTPUT_SAMPLE_RATE};

/// One entry of the assembly order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clip {
    pub path: PathBuf,
}

/// Output settings for [`Editor::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Normalize and re-encode every clip instead of stream-copying.
    pub reencode: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            reencode: true,
        }
    }
}

/// Ordered clip list plus the tools to trim and join it.
#[derive(Debug)]
pub struct Editor {
    ffmpeg: Ffmpeg,
    /// Where the concat manifest is written.
    work_dir: PathBuf,
    clips: Vec<Clip>,
}

impl Editor {
    pub fn new(ffmpeg: Ffmpeg, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg,
            work_dir: work_dir.into(),
            clips: Vec::new(),
        }
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Insert a clip at `position`, or append when `None`. Positions past
    /// the end append.
    pub fn add(&mut self, path: impl Into<PathBuf>, position: Option<usize>) -> ExportResult<usize> {
        let path = path.into();
        if !path.is_file() {
            return Err(ExportError::FileNotFound { path });
        }
        let index = position.unwrap_or(self.clips.len()).min(self.clips.len());
        tracing::info!(index, path = %path.display(), "Clip added");
        self.clips.insert(index, Clip { path });
        Ok(index)
    }

    /// Duration of a clip in seconds.
    pub fn length(&self, index: usize) -> ExportResult<f64> {
        let clip = self.clip(index)?;
        self.ffmpeg.probe_duration(&clip.path)
    }

    /// Replace a clip with its `[start, end)` section (seconds). The section
    /// is cut with a stream-copy seek into `<stem>_trimmed_<start>_<end>.<ext>`.
    pub fn trim(&mut self, index: usize, start: f64, end: f64) -> ExportResult<PathBuf> {
        let source = self.clip(index)?.path.clone();
        if !(start >= 0.0 && end > start) {
            return Err(ExportError::validation(format!(
                "Invalid trim window {start}..{end} for clip {index}"
            )));
        }

        let trimmed = trimmed_path(&source, start, end);
        let args: Vec<String> = vec![
            "-y".to_string(),
            "-ss".to_string(),
            format_secs(start),
            "-i".to_string(),
            source.display().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-t".to_string(),
            format_secs(end - start),
            trimmed.display().to_string(),
        ];
        self.ffmpeg.run(&args)?;

        tracing::info!(
            index,
            start,
            end,
            path = %trimmed.display(),
            "Clip trimmed"
        );
        self.clips[index].path = trimmed.clone();
        Ok(trimmed)
    }

    /// Join every clip into `output`, reporting through `progress` when
    /// given.
    pub fn render(
        &self,
        output: &Path,
        options: &RenderOptions,
        progress: Option<ProgressCallback>,
    ) -> ExportResult<PathBuf> {
        if self.clips.is_empty() {
            return Err(ExportError::render("No clips to render"));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Only a progress report needs the total length.
        let expected: f64 = if progress.is_some() {
            self.clips
                .iter()
                .filter_map(|c| self.ffmpeg.probe_duration(&c.path).ok())
                .sum()
        } else {
            0.0
        };

        tracing::info!(
            clips = self.clips.len(),
            output = %output.display(),
            reencode = options.reencode,
            width = options.width,
            height = options.height,
            "Rendering"
        );

        let args = if options.reencode {
            self.reencode_args(output, options)
        } else {
            self.copy_args(output)?
        };
        self.ffmpeg.run_with_progress(&args, expected, progress)?;

        Ok(output.to_path_buf())
    }

    /// Forget every clip. Files on disk are left alone.
    pub fn reset(&mut self) {
        tracing::debug!(clips = self.clips.len(), "Clip list reset");
        self.clips.clear();
    }

    fn clip(&self, index: usize) -> ExportResult<&Clip> {
        self.clips.get(index).ok_or(ExportError::ClipOutOfRange {
            index,
            len: self.clips.len(),
        })
    }

    fn copy_args(&self, output: &Path) -> ExportResult<Vec<String>> {
        std::fs::create_dir_all(&self.work_dir)?;
        let manifest = self.work_dir.join("clips.txt");
        let paths: Vec<&Path> = self.clips.iter().map(|c| c.path.as_path()).collect();
        std::fs::write(&manifest, concat_manifest(&paths))?;

        Ok(vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            manifest.display().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.display().to_string(),
        ])
    }

    fn reencode_args(&self, output: &Path, options: &RenderOptions) -> Vec<String> {
        let mut args = vec!["-y".to_string()];
        for clip in &self.clips {
            args.push("-i".to_string());
            args.push(clip.path.display().to_string());
        }
        let graph = normalize_concat_graph(self.clips.len(), options.width, options.height);
        let fps = options.fps.to_string();
        let sample_rate = OUTPUT_SAMPLE_RATE.to_string();
        let tail: [&str; 26] = [
            "-filter_complex",
            graph.as_str(),
            "-map",
            "[outv]",
            "-map",
            "[outa]",
            "-r",
            fps.as_str(),
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-crf",
            "23",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-ar",
            sample_rate.as_str(),
            "-ac",
            "2",
            "-movflags",
            "+faststart",
        ];
        args.extend(tail.iter().map(|s| s.to_string()));
        args.push(output.display().to_string());
        args
    }
}

fn trimmed_path(source: &Path, start: f64, end: f64) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!(
            "{stem}_trimmed_{}_{}.{}",
            format_secs(start),
            format_secs(end),
            ext.to_string_lossy()
        ),
        None => format!("{stem}_trimmed_{}_{}", format_secs(start), format_secs(end)),
    };
    source.with_file_name(name)
}

/// Seconds with millisecond precision and no trailing zeros.
fn format_secs(secs: f64) -> String {
    let s = format!("{secs:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}
