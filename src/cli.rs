//! CLI surface (spec.md §6, SPEC_FULL.md §6.1/§6.3).

use std::path::PathBuf;

use clap::Parser;

use crate::engine::Paradigm;
use crate::error::{FalconzError, Result};
use crate::selector::DEFAULT_NCC_THRESHOLD;

const DASH_SCHEDULE: &str = "100x25x10x0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    Cruise,
    Dash,
}

#[derive(Debug, Parser)]
#[command(name = "falconz", about = "Motion correction for dynamic PET image series")]
pub struct CliArgs {
    #[arg(long)]
    pub directory: PathBuf,

    #[arg(long, default_value_t = -1)]
    pub reference_frame_index: i64,

    /// Explicit start index, or "auto" to invoke the start-frame selector.
    #[arg(long, default_value = "auto")]
    pub start_frame: String,

    #[arg(long, value_enum)]
    pub registration: RegistrationArg,

    #[arg(long, default_value = "100x25x10")]
    pub multi_resolution_iterations: String,

    #[arg(long, value_enum, default_value_t = Mode::Cruise)]
    pub mode: Mode,

    #[arg(long, default_value_t = DEFAULT_NCC_THRESHOLD)]
    pub ncc_threshold: f64,

    /// Overrides the resource estimator's job count for Pool-F.
    #[arg(long)]
    pub jobs: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub keep_scratch: bool,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RegistrationArg {
    Rigid,
    Affine,
    Deformable,
}

impl From<RegistrationArg> for Paradigm {
    fn from(value: RegistrationArg) -> Self {
        match value {
            RegistrationArg::Rigid => Paradigm::Rigid,
            RegistrationArg::Affine => Paradigm::Affine,
            RegistrationArg::Deformable => Paradigm::Deformable,
        }
    }
}

/// The validated, immutable configuration the pipeline driver actually
/// runs with — `--mode dash` already folded into the effective schedule.
#[derive(Debug, Clone)]
pub struct Config {
    pub directory: PathBuf,
    pub reference_frame_index: i64,
    pub start_frame: StartFrameConfig,
    pub paradigm: Paradigm,
    pub iterations: String,
    pub ncc_threshold: f64,
    pub jobs_override: Option<usize>,
    pub keep_scratch: bool,
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrameConfig {
    Auto,
    Explicit(usize),
}

impl Config {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        if !args.directory.exists() {
            return Err(FalconzError::InputMissing(args.directory));
        }
        if !(0.0..=1.0).contains(&args.ncc_threshold) {
            return Err(FalconzError::Config(format!(
                "ncc-threshold must be in [0, 1], got {}",
                args.ncc_threshold
            )));
        }

        let start_frame = if args.start_frame == "auto" {
            StartFrameConfig::Auto
        } else {
            let parsed: i64 = args.start_frame.parse().map_err(|_| {
                FalconzError::Config(format!("start-frame must be 'auto' or an integer, got '{}'", args.start_frame))
            })?;
            if parsed < 0 {
                return Err(FalconzError::Config(format!(
                    "start-frame must be non-negative when explicit, got {parsed}"
                )));
            }
            StartFrameConfig::Explicit(parsed as usize)
        };

        let iterations = if args.mode == Mode::Dash {
            DASH_SCHEDULE.to_string()
        } else {
            args.multi_resolution_iterations.clone()
        };
        validate_schedule(&iterations)?;

        let log_level = if args.verbose > 0 { "debug".to_string() } else { args.log_level.clone() };

        Ok(Config {
            directory: args.directory,
            reference_frame_index: args.reference_frame_index,
            start_frame,
            paradigm: args.registration.into(),
            iterations,
            ncc_threshold: args.ncc_threshold,
            jobs_override: args.jobs,
            keep_scratch: args.keep_scratch,
            log_level,
        })
    }
}

/// A schedule is `aXbXc...`: one or more non-negative integers joined by
/// `x` (spec.md's `aXbXc` grammar, §4.F).
fn validate_schedule(schedule: &str) -> Result<()> {
    let valid = !schedule.is_empty()
        && schedule
            .split(['x', 'X'])
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    if valid {
        Ok(())
    } else {
        Err(FalconzError::Config(format!(
            "malformed multi-resolution iteration schedule: '{schedule}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args(dir: PathBuf) -> CliArgs {
        CliArgs {
            directory: dir,
            reference_frame_index: -1,
            start_frame: "auto".to_string(),
            registration: RegistrationArg::Rigid,
            multi_resolution_iterations: "100x25x10".to_string(),
            mode: Mode::Cruise,
            ncc_threshold: DEFAULT_NCC_THRESHOLD,
            jobs: None,
            keep_scratch: false,
            log_level: "info".to_string(),
            verbose: 0,
        }
    }

    #[test]
    fn dash_mode_overrides_iteration_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = base_args(dir.path().to_path_buf());
        args.mode = Mode::Dash;
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.iterations, "100x25x10x0");
    }

    #[test]
    fn rejects_missing_directory() {
        let args = base_args(PathBuf::from("/definitely/not/a/real/path"));
        assert!(matches!(Config::from_args(args), Err(FalconzError::InputMissing(_))));
    }

    #[test]
    fn rejects_malformed_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = base_args(dir.path().to_path_buf());
        args.multi_resolution_iterations = "abcx10".to_string();
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = base_args(dir.path().to_path_buf());
        args.ncc_threshold = 1.5;
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn explicit_start_frame_parses_to_usize() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = base_args(dir.path().to_path_buf());
        args.start_frame = "3".to_string();
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.start_frame, StartFrameConfig::Explicit(3));
    }
}
