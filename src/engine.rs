//! Registration paradigms and the external-engine collaborator contract
//! (spec.md §4.F, §6, §9).
//!
//! `spec.md` §9 calls out the original's "deep inheritance in registration
//! classes" (`RigidRegistration` / `AffineRegistration` /
//! `DeformableRegistration`, each overriding `register()`) as accidental
//! complexity to collapse. Here that collapses to one tagged enum plus one
//! function that builds the argv for any paradigm.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use strum::Display;

use crate::error::{FalconzError, Result};
use crate::platform::Platform;
use crate::pool::spawn_child;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Paradigm {
    Rigid,
    Affine,
    Deformable,
}

impl Paradigm {
    fn degrees_of_freedom(self) -> &'static str {
        match self {
            Paradigm::Rigid => "6",
            Paradigm::Affine | Paradigm::Deformable => "12",
        }
    }

    fn cost_function(self) -> &'static str {
        "NCC 2x2x2"
    }
}

/// `{fixed, moving, paradigm, iterations}` from spec.md §3.
#[derive(Debug, Clone)]
pub struct RegistrationJob {
    pub fixed: PathBuf,
    pub moving: PathBuf,
    pub paradigm: Paradigm,
    pub iterations: String,
    /// Directory that transform files and the resampled frame are written into.
    pub out_dir: PathBuf,
}

impl RegistrationJob {
    fn moving_stem(&self) -> String {
        self.moving
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn affine_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}_affine.mat", self.moving_stem()))
    }

    pub fn rigid_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}_rigid.mat", self.moving_stem()))
    }

    pub fn warp_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}_warp.nii.gz", self.moving_stem()))
    }

    pub fn inverse_warp_path(&self) -> PathBuf {
        self.out_dir
            .join(format!("{}_inverse_warp.nii.gz", self.moving_stem()))
    }

    pub fn resampled_path(&self) -> PathBuf {
        self.out_dir.join(format!("moco_{}", self.moving_stem()))
    }

    /// Transform file(s) produced by registration, per spec.md §3
    /// `TransformArtifact`.
    pub fn transform_paths(&self) -> Vec<PathBuf> {
        match self.paradigm {
            Paradigm::Rigid => vec![self.rigid_path()],
            Paradigm::Affine => vec![self.affine_path()],
            Paradigm::Deformable => {
                vec![self.affine_path(), self.warp_path(), self.inverse_warp_path()]
            }
        }
    }
}

fn os_args(args: &[&str]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

/// Builds the argv(s) for the registration step(s) of a job. Deformable
/// expands to two invocations: the affine is computed first and reused as
/// the deformable step's initialization (spec.md §4.F.1).
pub fn build_registration_commands(job: &RegistrationJob) -> Vec<Vec<OsString>> {
    let fixed = job.fixed.to_string_lossy().into_owned();
    let moving = job.moving.to_string_lossy().into_owned();
    let cost = job.paradigm.cost_function();

    match job.paradigm {
        Paradigm::Rigid => vec![os_args(&[
            "-d",
            "3",
            "-a",
            "-i",
            &fixed,
            &moving,
            "-ia-image-centers",
            "-dof",
            job.paradigm.degrees_of_freedom(),
            "-o",
            &job.rigid_path().to_string_lossy(),
            "-n",
            &job.iterations,
            "-m",
            cost,
        ])],
        Paradigm::Affine => vec![os_args(&[
            "-d",
            "3",
            "-a",
            "-i",
            &fixed,
            &moving,
            "-ia-image-centers",
            "-dof",
            job.paradigm.degrees_of_freedom(),
            "-o",
            &job.affine_path().to_string_lossy(),
            "-n",
            &job.iterations,
            "-m",
            cost,
        ])],
        Paradigm::Deformable => {
            let affine_cmd = os_args(&[
                "-d",
                "3",
                "-a",
                "-i",
                &fixed,
                &moving,
                "-ia-image-centers",
                "-dof",
                "12",
                "-o",
                &job.affine_path().to_string_lossy(),
                "-n",
                &job.iterations,
                "-m",
                cost,
            ]);
            let deformable_cmd = os_args(&[
                "-d",
                "3",
                "-m",
                cost,
                "-i",
                &fixed,
                &moving,
                "-it",
                &job.affine_path().to_string_lossy(),
                "-o",
                &job.warp_path().to_string_lossy(),
                "-oinv",
                &job.inverse_warp_path().to_string_lossy(),
                "-n",
                &job.iterations,
            ]);
            vec![affine_cmd, deformable_cmd]
        }
    }
}

/// Builds the resample argv. Deformable composes `warp` then `affine` on
/// the command line (spec.md §4.F.2, §8 Open Question #3).
pub fn build_resample_command(job: &RegistrationJob) -> Vec<OsString> {
    let fixed = job.fixed.to_string_lossy().into_owned();
    let moving = job.moving.to_string_lossy().into_owned();
    let out = job.resampled_path().to_string_lossy().into_owned();

    let mut args = vec![
        "-d".to_string(),
        "3".to_string(),
        "-rf".to_string(),
        fixed,
        "-ri".to_string(),
        "LINEAR".to_string(),
        "-rm".to_string(),
        moving,
        out,
        "-r".to_string(),
    ];

    match job.paradigm {
        Paradigm::Rigid => args.push(job.rigid_path().to_string_lossy().into_owned()),
        Paradigm::Affine => args.push(job.affine_path().to_string_lossy().into_owned()),
        Paradigm::Deformable => {
            args.push(job.warp_path().to_string_lossy().into_owned());
            args.push(job.affine_path().to_string_lossy().into_owned());
        }
    }

    args.into_iter().map(OsString::from).collect()
}

/// The external collaborators, behind a trait so tests never shell out to a
/// real `greedy`/`c3d` binary (spec.md §10).
pub trait Engine: Send + Sync {
    fn register(&self, job: &RegistrationJob) -> Result<()>;
    fn resample(&self, job: &RegistrationJob) -> Result<()>;
    fn voxelwise_ncc(&self, fixed: &Path, moving: &Path, out: &Path, radius: &str) -> Result<()>;
    fn clip_nonnegative(&self, image: &Path) -> Result<()>;
    fn mean_intensity(&self, image: &Path) -> Result<f64>;
}

pub struct ExternalEngine {
    platform: Platform,
}

impl ExternalEngine {
    pub fn new(platform: Platform) -> Self {
        ExternalEngine { platform }
    }
}

impl Engine for ExternalEngine {
    fn register(&self, job: &RegistrationJob) -> Result<()> {
        for cmd in build_registration_commands(job) {
            let result = spawn_child(&self.platform.registration_engine, &cmd)?;
            if !result.success {
                return Err(FalconzError::AlignmentFailure {
                    count: 1,
                    failures: vec![(job.moving.clone(), result.stderr)],
                });
            }
        }
        Ok(())
    }

    fn resample(&self, job: &RegistrationJob) -> Result<()> {
        let cmd = build_resample_command(job);
        let result = spawn_child(&self.platform.registration_engine, &cmd)?;
        if !result.success {
            return Err(FalconzError::AlignmentFailure {
                count: 1,
                failures: vec![(job.moving.clone(), result.stderr)],
            });
        }
        Ok(())
    }

    fn voxelwise_ncc(&self, fixed: &Path, moving: &Path, out: &Path, radius: &str) -> Result<()> {
        let args = [
            fixed.to_string_lossy().into_owned(),
            moving.to_string_lossy().into_owned(),
            "-ncc".to_string(),
            radius.to_string(),
            "-o".to_string(),
            out.to_string_lossy().into_owned(),
        ];
        let result = spawn_child(&self.platform.image_tool, &args)?;
        if !result.success {
            return Err(FalconzError::SelectionFailure {
                candidate: moving.to_path_buf(),
                stderr: result.stderr,
            });
        }
        Ok(())
    }

    fn clip_nonnegative(&self, image: &Path) -> Result<()> {
        let path = image.to_string_lossy().into_owned();
        let args = [path.clone(), "-clip".to_string(), "0".to_string(), "inf".to_string(), "-o".to_string(), path];
        let result = spawn_child(&self.platform.image_tool, &args)?;
        if !result.success {
            return Err(FalconzError::SelectionFailure {
                candidate: image.to_path_buf(),
                stderr: result.stderr,
            });
        }
        Ok(())
    }

    fn mean_intensity(&self, image: &Path) -> Result<f64> {
        let args = [image.to_string_lossy().into_owned(), "-mean".to_string()];
        let result = spawn_child(&self.platform.image_tool, &args)?;
        if !result.success {
            return Err(FalconzError::SelectionFailure {
                candidate: image.to_path_buf(),
                stderr: result.stderr,
            });
        }
        parse_mean_from_stdout(&result.stderr).ok_or_else(|| FalconzError::SelectionFailure {
            candidate: image.to_path_buf(),
            stderr: "image tool did not report a mean intensity".to_string(),
        })
    }
}

fn parse_mean_from_stdout(text: &str) -> Option<f64> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix("MEAN ").and_then(|v| v.trim().parse().ok()))
}
