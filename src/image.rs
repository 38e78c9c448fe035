//! Volumetric image handle (spec.md §3 `ImageHandle`, §9).
//!
//! `spec.md` §9 asks for "one `ImageHandle` type with explicit open/close,
//! no global image cache". On-disk NIfTI/NRRD/Analyze decoding stays a
//! Non-goal (spec.md §2): this handle carries only the metadata the pipeline
//! itself needs to reason about — path, shape, spacing, dtype — and
//! delegates every byte of format-specific work to the external image-tool
//! collaborator (`c3d`-shaped CLI) via `pool::spawn_child`, the same way the
//! registration and dicom-conversion collaborators are invoked.

use std::path::{Path, PathBuf};

use crate::error::{FalconzError, Result};
use crate::platform::Platform;
use crate::pool::spawn_child;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageHandle {
    pub path: PathBuf,
    pub shape: [usize; 3],
    pub spacing: [f64; 3],
    pub dtype: String,
}

impl ImageHandle {
    /// Opens `path` by asking the image tool to report its header, per
    /// spec.md §3's `{path, shape, spacing, dtype}` fields. Closing is
    /// implicit: nothing but this struct outlives the call, so there is no
    /// handle to leak.
    pub fn open(platform: &Platform, path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(FalconzError::InputMissing(path.to_path_buf()));
        }

        let args = [path.to_string_lossy().into_owned(), "-info".to_string()];
        let result = spawn_child(&platform.image_tool, &args)?;
        if !result.success {
            return Err(FalconzError::UnsupportedFormat(path.to_path_buf()));
        }

        parse_info(&result.stderr)
            .map(|(shape, spacing, dtype)| ImageHandle {
                path: path.to_path_buf(),
                shape,
                spacing,
                dtype,
            })
            .ok_or_else(|| FalconzError::UnsupportedFormat(path.to_path_buf()))
    }

    pub fn voxel_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Parses lines of the form `DIM 128 128 64` and `SPACING 2.0 2.0 3.0` and
/// `DTYPE float` out of the image tool's `-info` output.
fn parse_info(text: &str) -> Option<([usize; 3], [f64; 3], String)> {
    let mut shape = None;
    let mut spacing = None;
    let mut dtype = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("DIM ") {
            shape = parse_triplet(rest);
        } else if let Some(rest) = line.strip_prefix("SPACING ") {
            spacing = parse_triplet(rest);
        } else if let Some(rest) = line.strip_prefix("DTYPE ") {
            dtype = Some(rest.trim().to_string());
        }
    }

    Some((shape?, spacing?, dtype?))
}

fn parse_triplet<T: std::str::FromStr>(rest: &str) -> Option<[T; 3]> {
    let mut parts = rest.split_whitespace();
    let a = parts.next()?.parse().ok()?;
    let b = parts.next()?.parse().ok()?;
    let c = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some([a, b, c])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_info_block() {
        let text = "DIM 128 128 64\nSPACING 2.0 2.0 3.0\nDTYPE float\n";
        let (shape, spacing, dtype) = parse_info(text).unwrap();
        assert_eq!(shape, [128, 128, 64]);
        assert_eq!(spacing, [2.0, 2.0, 3.0]);
        assert_eq!(dtype, "float");
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(parse_info("DIM 128 128 64\n").is_none());
    }

    #[test]
    fn voxel_count_multiplies_dims() {
        let handle = ImageHandle {
            path: PathBuf::from("/x.nii"),
            shape: [2, 3, 4],
            spacing: [1.0, 1.0, 1.0],
            dtype: "float".to_string(),
        };
        assert_eq!(handle.voxel_count(), 24);
    }
}
