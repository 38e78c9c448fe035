//! Output assembler (spec.md §4.G).
//!
//! Moves transform artifacts into `transforms/`, copies the reference and
//! non-moco frames into the moco directory under a `moco_` prefix, and
//! merges everything into a single 4-D volume in natural-numeric order.

use std::path::{Path, PathBuf};

use crate::engine::Paradigm;
use crate::error::{FalconzError, Result};
use crate::frames::{natural_sort_key, Frame, FrameSequence};
use crate::platform::Platform;
use crate::pool::spawn_child;

pub struct AssemblyInputs<'a> {
    pub sequence: &'a FrameSequence,
    pub reference_index: usize,
    pub start_index: usize,
    pub paradigm: Paradigm,
    pub split_dir: PathBuf,
    pub moco_dir: PathBuf,
    pub transforms_dir: PathBuf,
}

/// Runs §4.G's four steps. Operates only over `succeeded_moving_frames` —
/// frames whose alignment failed are simply absent from the merge, per
/// spec.md §7's "merge still runs over the frames that succeeded" policy.
/// `failed_count` is how many moving frames are known to be missing for
/// that reason; the merge tolerates exactly that many gaps and no more.
pub fn assemble(
    platform: &Platform,
    inputs: &AssemblyInputs,
    succeeded_moving_frames: &[PathBuf],
    failed_count: usize,
) -> Result<PathBuf> {
    std::fs::create_dir_all(&inputs.moco_dir)?;
    std::fs::create_dir_all(&inputs.transforms_dir)?;

    move_transform_artifacts(inputs)?;
    copy_reference(inputs)?;
    copy_non_moco_frames(inputs)?;
    accept_aligned_frames(inputs, succeeded_moving_frames)?;

    merge_4d(platform, inputs, failed_count)
}

fn move_transform_artifacts(inputs: &AssemblyInputs) -> Result<()> {
    let patterns: &[&str] = match inputs.paradigm {
        Paradigm::Rigid => &["_rigid.mat"],
        Paradigm::Affine => &["_affine.mat"],
        Paradigm::Deformable => &["_affine.mat", "_warp.nii.gz", "_inverse_warp.nii.gz"],
    };

    for entry in std::fs::read_dir(&inputs.split_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if patterns.iter().any(|suffix| name.ends_with(suffix)) {
            let dest = inputs.transforms_dir.join(&name);
            std::fs::rename(&path, &dest).map_err(|e| {
                FalconzError::Assembly(format!("failed to move transform {name}: {e}"))
            })?;
        }
    }
    Ok(())
}

fn copy_reference(inputs: &AssemblyInputs) -> Result<()> {
    let reference = inputs.sequence.reference(inputs.reference_index);
    copy_as_moco(reference, &inputs.moco_dir)
}

fn copy_non_moco_frames(inputs: &AssemblyInputs) -> Result<()> {
    for frame in inputs.sequence.non_moco_set(inputs.reference_index, inputs.start_index) {
        copy_as_moco(frame, &inputs.moco_dir)?;
    }
    Ok(())
}

fn copy_as_moco(frame: &Frame, moco_dir: &Path) -> Result<()> {
    let dest = moco_dir.join(format!("moco_{}", frame.file_name()));
    std::fs::copy(&frame.path, &dest).map_err(|e| {
        FalconzError::Assembly(format!("failed to copy {} into moco directory: {e}", frame.file_name()))
    })?;
    Ok(())
}

/// Aligned frames were already written as `moco_<name>` by the scheduler
/// directly into `split_dir`; this moves them alongside the reference and
/// non-moco copies so the merge step sees one directory.
fn accept_aligned_frames(inputs: &AssemblyInputs, succeeded_moving_frames: &[PathBuf]) -> Result<()> {
    for path in succeeded_moving_frames {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let dest = inputs.moco_dir.join(&name);
        if path != &dest {
            std::fs::rename(path, &dest).map_err(|e| {
                FalconzError::Assembly(format!("failed to relocate {name} into moco directory: {e}"))
            })?;
        }
    }
    Ok(())
}

fn merge_4d(platform: &Platform, inputs: &AssemblyInputs, failed_count: usize) -> Result<PathBuf> {
    let mut moco_files: Vec<PathBuf> = std::fs::read_dir(&inputs.moco_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.file_name().map(|n| n.to_string_lossy().starts_with("moco_")).unwrap_or(false))
        .collect();
    moco_files.sort_by_key(|p| natural_sort_key(p));

    // The only tolerated gap is exactly the known alignment failures
    // (spec.md §7: the merge still runs over the frames that succeeded).
    // Anything else — a copy that silently didn't happen, a stray file —
    // is a genuine assembly defect and stays fatal.
    let expected = inputs.sequence.len().saturating_sub(failed_count);
    if moco_files.len() != expected {
        return Err(FalconzError::Assembly(format!(
            "merged frame count {} does not match expected count {} ({} known alignment failures)",
            moco_files.len(),
            expected,
            failed_count
        )));
    }

    let output = inputs.moco_dir.join("moco_4D.nii.gz");
    let mut args: Vec<String> = moco_files.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    args.insert(0, "-tile".to_string());
    args.insert(1, "t".to_string());
    args.push("-o".to_string());
    args.push(output.to_string_lossy().into_owned());

    let result = spawn_child(&platform.image_tool, &args)?;
    if !result.success {
        return Err(FalconzError::Assembly(format!("4-D merge failed: {}", result.stderr)));
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};
    use std::fs;
    use tempfile::tempdir;

    fn platform_with_dummy_tools() -> Platform {
        Platform {
            os: Os::Linux,
            arch: Arch::X86_64,
            registration_engine: PathBuf::from("/bin/true"),
            image_tool: PathBuf::from("/bin/true"),
            dicom_converter: PathBuf::from("/bin/true"),
        }
    }

    #[test]
    fn rejects_gap_larger_than_known_failures() {
        let dir = tempdir().unwrap();
        let split_dir = dir.path().join("split");
        let moco_dir = dir.path().join("moco");
        let transforms_dir = dir.path().join("transforms");
        fs::create_dir_all(&split_dir).unwrap();
        fs::create_dir_all(&moco_dir).unwrap();

        for n in 0..3 {
            fs::write(split_dir.join(format!("vol_{n:04}.nii.gz")), b"x").unwrap();
        }
        let sequence = FrameSequence::from_directory(&split_dir).unwrap();

        // Only one moco file present though the sequence has 3 frames and
        // no alignment failures are known — an unexplained gap.
        fs::write(moco_dir.join("moco_vol_0000.nii.gz"), b"x").unwrap();

        let inputs = AssemblyInputs {
            sequence: &sequence,
            reference_index: 2,
            start_index: 0,
            paradigm: Paradigm::Rigid,
            split_dir,
            moco_dir,
            transforms_dir,
        };

        let err = merge_4d(&platform_with_dummy_tools(), &inputs, 0).unwrap_err();
        assert!(matches!(err, FalconzError::Assembly(_)));
    }

    #[test]
    fn merges_around_a_gap_matching_known_alignment_failures() {
        let dir = tempdir().unwrap();
        let split_dir = dir.path().join("split");
        let moco_dir = dir.path().join("moco");
        let transforms_dir = dir.path().join("transforms");
        fs::create_dir_all(&split_dir).unwrap();
        fs::create_dir_all(&moco_dir).unwrap();

        for n in 0..3 {
            fs::write(split_dir.join(format!("vol_{n:04}.nii.gz")), b"x").unwrap();
        }
        let sequence = FrameSequence::from_directory(&split_dir).unwrap();

        // Only 2 of 3 frames present; the 3rd is a known alignment failure.
        fs::write(moco_dir.join("moco_vol_0000.nii.gz"), b"x").unwrap();
        fs::write(moco_dir.join("moco_vol_0002.nii.gz"), b"x").unwrap();

        let inputs = AssemblyInputs {
            sequence: &sequence,
            reference_index: 2,
            start_index: 0,
            paradigm: Paradigm::Rigid,
            split_dir,
            moco_dir,
            transforms_dir,
        };

        let output = merge_4d(&platform_with_dummy_tools(), &inputs, 1).unwrap();
        assert_eq!(output.file_name().unwrap(), "moco_4D.nii.gz");
    }

    #[test]
    fn moves_only_artifacts_matching_the_paradigm() {
        let dir = tempdir().unwrap();
        let split_dir = dir.path().join("split");
        let transforms_dir = dir.path().join("transforms");
        fs::create_dir_all(&split_dir).unwrap();
        fs::create_dir_all(&transforms_dir).unwrap();
        fs::write(split_dir.join("vol_0000.nii.gz_rigid.mat"), b"x").unwrap();
        fs::write(split_dir.join("vol_0000.nii.gz_affine.mat"), b"x").unwrap();

        let sequence_dir = tempdir().unwrap();
        for n in 0..2 {
            fs::write(sequence_dir.path().join(format!("vol_{n:04}.nii.gz")), b"x").unwrap();
        }
        let sequence = FrameSequence::from_directory(sequence_dir.path()).unwrap();

        let inputs = AssemblyInputs {
            sequence: &sequence,
            reference_index: 1,
            start_index: 0,
            paradigm: Paradigm::Rigid,
            split_dir: split_dir.clone(),
            moco_dir: dir.path().join("moco"),
            transforms_dir: transforms_dir.clone(),
        };

        move_transform_artifacts(&inputs).unwrap();
        assert!(transforms_dir.join("vol_0000.nii.gz_rigid.mat").exists());
        assert!(!transforms_dir.join("vol_0000.nii.gz_affine.mat").exists());
    }
}
