//! Error taxonomy for the pipeline (spec.md §7).
//!
//! Each variant maps to one of the CLI exit codes in §6: `Config` and
//! `Platform` both signal validation-time failures (exit 1), `Ingestion`
//! exits 2, `Selection` exits 3, `Alignment` exits 4, `Assembly` exits 5.

use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, thiserror::Error)]
pub enum FalconzError {
    #[error("{0}")]
    Config(String),

    #[error("unsupported platform: os={os} arch={arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("binary not found: {name} (searched {searched})")]
    BinaryNotFound { name: String, searched: String },

    #[error("failed to set executable permissions on {path}: {source}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("input path does not exist: {0}")]
    InputMissing(PathBuf),

    #[error("unrecognized volumetric format for {0}")]
    UnsupportedFormat(PathBuf),

    #[error(
        "motion correction requires at least 2 frames, found 1 in {0}"
    )]
    InsufficientInput(PathBuf),

    #[error("converter exited with status {status}: {stderr}")]
    ConverterFailure { status: i32, stderr: String },

    #[error("NCC computation failed for candidate {candidate}: {stderr}")]
    SelectionFailure { candidate: PathBuf, stderr: String },

    #[error("{count} frame(s) failed alignment: {}", .failures.iter().map(|(p, _)| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    AlignmentFailure { count: usize, failures: Vec<(PathBuf, String)> },

    #[error("failed to assemble output: {0}")]
    Assembly(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FalconzError {
    pub fn exit_code(&self) -> ExitCode {
        let code: u8 = match self {
            FalconzError::Config(_) => 1,
            FalconzError::UnsupportedPlatform { .. }
            | FalconzError::BinaryNotFound { .. }
            | FalconzError::PermissionDenied { .. } => 1,
            FalconzError::InputMissing(_)
            | FalconzError::UnsupportedFormat(_)
            | FalconzError::InsufficientInput(_)
            | FalconzError::ConverterFailure { .. } => 2,
            FalconzError::SelectionFailure { .. } => 3,
            FalconzError::AlignmentFailure { .. } => 4,
            FalconzError::Assembly(_) => 5,
            FalconzError::Io(_) => 1,
        };
        ExitCode::from(code)
    }
}

pub type Result<T> = std::result::Result<T, FalconzError>;
