//! Input normalizer (spec.md §4.C).
//!
//! Turns whatever sits in the input directory — a DICOM series, a single
//! 4-D volume, or a pile of 3-D volumes in assorted formats — into a flat
//! directory of same-shape `vol_0000.ext, vol_0001.ext, …` files. The
//! decision table is the only place that branches on file-classification
//! outcomes (spec.md §9: "lift exception-for-control-flow to explicit
//! `Result`-style returns").

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::{FalconzError, Result};
use crate::frames::is_volume_file;
use crate::platform::Platform;
use crate::pool::{map_bounded, spawn_child};

const CANONICAL_EXTENSION: &str = "nii.gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputShape {
    Dicom,
    Single4D,
    Single3D,
    Multiple,
}

/// Normalizes `input_dir` into `out_dir`, which must already exist and be
/// empty. Returns once every `vol_*` file has been written.
pub fn normalize(
    platform: &Platform,
    input_dir: &Path,
    out_dir: &Path,
    converter_pool_size: usize,
) -> Result<()> {
    if !input_dir.is_dir() {
        return Err(FalconzError::InputMissing(input_dir.to_path_buf()));
    }

    let entries = list_top_level_files(input_dir)?;
    if entries.is_empty() {
        return Err(FalconzError::InsufficientInput(input_dir.to_path_buf()));
    }

    match classify(platform, &entries)? {
        InputShape::Dicom => ingest_dicom(platform, input_dir, out_dir),
        InputShape::Single4D => split_one(platform, &entries[0], out_dir),
        InputShape::Single3D => Err(FalconzError::InsufficientInput(entries[0].clone())),
        InputShape::Multiple => ingest_multiple(platform, &entries, out_dir, converter_pool_size),
    }
}

fn list_top_level_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn classify(platform: &Platform, entries: &[PathBuf]) -> Result<InputShape> {
    if entries.iter().any(|p| looks_like_dicom(p)) {
        return Ok(InputShape::Dicom);
    }
    if entries.len() == 1 {
        return Ok(if is_4d(platform, &entries[0])? {
            InputShape::Single4D
        } else {
            InputShape::Single3D
        });
    }
    Ok(InputShape::Multiple)
}

/// DICOM files carry no reliable extension; the "DICM" magic at byte offset
/// 128 is the standard probe (DICOM PS3.10 §7.1).
fn looks_like_dicom(path: &Path) -> bool {
    let Ok(bytes) = std::fs::read(path) else {
        return false;
    };
    bytes.len() >= 132 && &bytes[128..132] == b"DICM"
}

/// A volume is 4-D when its 4th axis has extent > 1, after squeezing
/// trivial singleton axes — reported by the image tool's header probe, the
/// only component that opens volumetric headers (spec.md §9 `ImageHandle`).
fn is_4d(platform: &Platform, path: &Path) -> Result<bool> {
    let args = [path.to_string_lossy().into_owned(), "-info".to_string()];
    let result = spawn_child(&platform.image_tool, &args)?;
    if !result.success {
        return Err(FalconzError::UnsupportedFormat(path.to_path_buf()));
    }
    Ok(parse_time_extent(&result.stderr) > 1)
}

fn parse_time_extent(text: &str) -> usize {
    text.lines()
        .find_map(|line| line.trim().strip_prefix("DIM4 "))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(1)
}

fn ingest_dicom(platform: &Platform, input_dir: &Path, out_dir: &Path) -> Result<()> {
    let args = [
        "-z".to_string(),
        "y".to_string(),
        "-o".to_string(),
        out_dir.to_string_lossy().into_owned(),
        input_dir.to_string_lossy().into_owned(),
    ];
    let result = spawn_child(&platform.dicom_converter, &args)?;
    if !result.success {
        return Err(FalconzError::ConverterFailure {
            status: -1,
            stderr: result.stderr,
        });
    }

    let produced = list_top_level_files(out_dir)?
        .into_iter()
        .filter(|p| is_volume_file(p))
        .collect::<Vec<_>>();
    if produced.is_empty() {
        return Err(FalconzError::ConverterFailure {
            status: 0,
            stderr: "DICOM converter produced no volumetric output".to_string(),
        });
    }

    if produced.len() == 1 {
        let staged = out_dir.join("__dcm_volume.nii.gz");
        std::fs::rename(&produced[0], &staged)?;
        split_one(platform, &staged, out_dir)?;
        let _ = std::fs::remove_file(&staged);
        return Ok(());
    }

    rename_to_canonical_sequence(&produced, out_dir)
}

/// Splits one 4-D volume into `vol_0000.ext … vol_{T-1}.ext` in `out_dir`,
/// via the image tool's split mode.
fn split_one(platform: &Platform, path: &Path, out_dir: &Path) -> Result<()> {
    let pattern = out_dir.join(format!("vol_%04d.{CANONICAL_EXTENSION}"));
    let args = [
        path.to_string_lossy().into_owned(),
        "-split".to_string(),
        "-oo".to_string(),
        pattern.to_string_lossy().into_owned(),
    ];
    let result = spawn_child(&platform.image_tool, &args)?;
    if !result.success {
        return Err(FalconzError::ConverterFailure {
            status: -1,
            stderr: result.stderr,
        });
    }

    let written = list_top_level_files(out_dir)?
        .into_iter()
        .filter(|p| is_volume_file(p))
        .count();
    if written < 2 {
        return Err(FalconzError::InsufficientInput(path.to_path_buf()));
    }
    Ok(())
}

fn ingest_multiple(
    platform: &Platform,
    entries: &[PathBuf],
    out_dir: &Path,
    pool_size: usize,
) -> Result<()> {
    let recognized: Vec<PathBuf> = entries.iter().filter(|p| is_volume_file(p)).cloned().collect();
    if recognized.is_empty() {
        return Err(FalconzError::UnsupportedFormat(entries[0].clone()));
    }

    let platform = platform.clone();
    let out_dir = out_dir.to_path_buf();
    let results = map_bounded(pool_size, recognized, move |src| {
        convert_or_copy(&platform, &src, &out_dir)
    });

    for r in results {
        r?;
    }
    Ok(())
}

fn convert_or_copy(platform: &Platform, src: &Path, out_dir: &Path) -> Result<()> {
    let staged = out_dir.join(format!(
        "__staged_{}",
        src.file_name().unwrap_or_else(|| OsStr::new("volume")).to_string_lossy()
    ));

    if has_canonical_extension(src) {
        std::fs::copy(src, &staged)?;
    } else {
        let args = [
            src.to_string_lossy().into_owned(),
            "-o".to_string(),
            staged.to_string_lossy().into_owned(),
        ];
        let result = spawn_child(&platform.image_tool, &args)?;
        if !result.success {
            return Err(FalconzError::ConverterFailure {
                status: -1,
                stderr: result.stderr,
            });
        }
    }
    Ok(())
}

fn has_canonical_extension(path: &Path) -> bool {
    path.to_string_lossy().to_ascii_lowercase().ends_with(&format!(".{CANONICAL_EXTENSION}"))
}

/// Renames the already-produced files into `vol_0000.ext …` natural-numeric
/// order, preserving their current relative ordering (the converter already
/// names them in acquisition order).
fn rename_to_canonical_sequence(files: &[PathBuf], out_dir: &Path) -> Result<()> {
    let mut sorted = files.to_vec();
    sorted.sort();
    for (index, src) in sorted.iter().enumerate() {
        let ext = canonical_ext_of(src);
        let dest = out_dir.join(format!("vol_{index:04}.{ext}"));
        if &dest != src {
            std::fs::rename(src, &dest)?;
        }
    }
    Ok(())
}

fn canonical_ext_of(path: &Path) -> &'static str {
    let name = path.to_string_lossy().to_ascii_lowercase();
    if name.ends_with(".nii.gz") {
        "nii.gz"
    } else if name.ends_with(".nii") {
        "nii"
    } else {
        CANONICAL_EXTENSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};
    use std::fs;
    use tempfile::tempdir;

    /// A `Platform` whose binaries are never actually invoked by the tests
    /// that use it (the paths are nonexistent on purpose).
    fn unused_platform() -> Platform {
        Platform {
            os: Os::Linux,
            arch: Arch::X86_64,
            registration_engine: PathBuf::from("/nonexistent/greedy"),
            image_tool: PathBuf::from("/nonexistent/c3d"),
            dicom_converter: PathBuf::from("/nonexistent/dcm2niix"),
        }
    }

    #[test]
    fn empty_directory_is_insufficient() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let err = normalize(&unused_platform(), dir.path(), out.path(), 1).unwrap_err();
        assert!(matches!(err, FalconzError::InsufficientInput(_)));
    }

    #[test]
    fn classifies_dicom_by_magic_bytes() {
        let dir = tempdir().unwrap();
        let mut bytes = vec![0u8; 132];
        bytes[128..132].copy_from_slice(b"DICM");
        let path = dir.path().join("IM001");
        fs::write(&path, &bytes).unwrap();
        assert_eq!(classify(&unused_platform(), &[path]).unwrap(), InputShape::Dicom);
    }

    #[test]
    fn classifies_multiple_non_dicom_files_as_multiple() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.nii.gz");
        let b = dir.path().join("b.nii.gz");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"y").unwrap();
        assert_eq!(classify(&unused_platform(), &[a, b]).unwrap(), InputShape::Multiple);
    }

    #[test]
    fn parses_time_extent_from_info_block() {
        assert_eq!(parse_time_extent("DIM4 10\n"), 10);
        assert_eq!(parse_time_extent("no dim4 here"), 1);
    }

    #[test]
    fn canonical_extension_is_preserved() {
        assert_eq!(canonical_ext_of(Path::new("a.nii.gz")), "nii.gz");
        assert_eq!(canonical_ext_of(Path::new("a.nrrd")), "nii.gz");
    }
}
