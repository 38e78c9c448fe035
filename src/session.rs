//! Study session and working-directory layout (spec.md §3 `StudySession` /
//! `RunManifest`, §6).

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::Result;

const SPLIT_DIR_NAME: &str = "Split-Nifti-files";
const NCC_DIR_NAME: &str = "ncc-images";
const MOCO_DIR_NAME: &str = "Motion-corrected-images";
const TRANSFORMS_DIR_NAME: &str = "transforms";

/// One pipeline invocation's working directory, created as a sibling of the
/// input directory. Owned exclusively by this invocation: nothing removes
/// it automatically (spec.md §3: "removed only by the user").
pub struct StudySession {
    pub root: PathBuf,
    pub timestamp: String,
}

impl StudySession {
    /// Creates `<input's parent>/FALCONZ-V02-<yyyy-MM-dd-HH-mm-ss>/` and its
    /// fixed subdirectory layout (§6). The NCC directory is created lazily
    /// by the selector only when it actually runs.
    pub fn create(input_dir: &Path) -> Result<Self> {
        let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        let parent = input_dir.parent().unwrap_or_else(|| Path::new("."));
        let root = parent.join(format!("FALCONZ-V02-{timestamp}"));

        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(SPLIT_DIR_NAME))?;
        std::fs::create_dir_all(root.join(MOCO_DIR_NAME))?;
        std::fs::create_dir_all(root.join(TRANSFORMS_DIR_NAME))?;

        Ok(StudySession { root, timestamp })
    }

    pub fn split_dir(&self) -> PathBuf {
        self.root.join(SPLIT_DIR_NAME)
    }

    pub fn ncc_dir(&self) -> PathBuf {
        self.root.join(NCC_DIR_NAME)
    }

    pub fn moco_dir(&self) -> PathBuf {
        self.root.join(MOCO_DIR_NAME)
    }

    pub fn transforms_dir(&self) -> PathBuf {
        self.root.join(TRANSFORMS_DIR_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(format!("falconz-{}.log", self.timestamp))
    }
}

/// Summary of one completed run, written alongside the log for later
/// inspection (spec.md §3 `RunManifest`).
#[derive(Debug, Clone)]
pub struct RunManifest {
    pub working_dir: PathBuf,
    pub frame_count: usize,
    pub reference_index: usize,
    pub start_index: usize,
    pub failed_frames: Vec<PathBuf>,
}

impl RunManifest {
    pub fn succeeded_entirely(&self) -> bool {
        self.failed_frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_fixed_subdirectory_layout() {
        let parent = tempdir().unwrap();
        let input_dir = parent.path().join("raw-input");
        std::fs::create_dir_all(&input_dir).unwrap();

        let session = StudySession::create(&input_dir).unwrap();
        assert!(session.split_dir().is_dir());
        assert!(session.moco_dir().is_dir());
        assert!(session.transforms_dir().is_dir());
        assert!(session.root.file_name().unwrap().to_string_lossy().starts_with("FALCONZ-V02-"));
    }

    #[test]
    fn manifest_reports_success_only_with_no_failures() {
        let manifest = RunManifest {
            working_dir: PathBuf::from("/work"),
            frame_count: 5,
            reference_index: 4,
            start_index: 0,
            failed_frames: vec![],
        };
        assert!(manifest.succeeded_entirely());
    }
}
