//! Per-session state shared between export cycles.

use std::path::{Path, PathBuf};

/// State that outlives a single export cycle but not the process.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    project_folder: Option<PathBuf>,
    recorder_unsupported: bool,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folder that receives per-clip files when auto-edit is off.
    pub fn project_folder(&self) -> Option<&Path> {
        self.project_folder.as_deref()
    }

    pub fn set_project_folder(&mut self, folder: impl Into<PathBuf>) {
        self.project_folder = Some(folder.into());
    }

    pub fn clear_project_folder(&mut self) {
        self.project_folder = None;
    }

    /// Set once a recorder reports it cannot run here; later cycles skip it.
    pub fn recorder_unsupported(&self) -> bool {
        self.recorder_unsupported
    }

    pub fn mark_recorder_unsupported(&mut self) {
        self.recorder_unsupported = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_folder_lifecycle() {
        let mut ctx = SessionContext::new();
        assert!(ctx.project_folder().is_none());

        ctx.set_project_folder("/tmp/goexport/project");
        assert_eq!(
            ctx.project_folder(),
            Some(Path::new("/tmp/goexport/project"))
        );

        ctx.clear_project_folder();
        assert!(ctx.project_folder().is_none());
    }

    #[test]
    fn test_recorder_unsupported_is_sticky() {
        let mut ctx = SessionContext::new();
        assert!(!ctx.recorder_unsupported());
        ctx.mark_recorder_unsupported();
        assert!(ctx.recorder_unsupported());
    }
}
