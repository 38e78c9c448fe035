//! Data model (spec.md §3) and frame indexer (spec.md §4.D).

use std::path::{Path, PathBuf};

use crate::error::{FalconzError, Result};

/// A path to a 3-D volume on disk plus its stable index in the owning
/// sequence. Immutable after creation by the input normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: usize,
    pub path: PathBuf,
}

impl Frame {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// An ordered sequence of 3-D frames, 0-indexed internally. Invariant:
/// length >= 2 (enforced at construction).
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<Frame>,
}

impl FrameSequence {
    /// Lists `vol_*.ext` files in a directory in natural-numeric order and
    /// builds the sequence. Deterministic given the same directory state,
    /// per spec.md §4.D's contract.
    pub fn from_directory(dir: &Path) -> Result<Self> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_volume_file(p))
            .collect();
        entries.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));

        let frames = entries
            .into_iter()
            .enumerate()
            .map(|(index, path)| Frame { index, path })
            .collect::<Vec<_>>();

        if frames.len() < 2 {
            let bad_path = frames.first().map(|f| f.path.clone()).unwrap_or_else(|| dir.to_path_buf());
            return Err(FalconzError::InsufficientInput(bad_path));
        }

        Ok(FrameSequence { frames })
    }

    pub fn from_frames(frames: Vec<Frame>) -> Result<Self> {
        if frames.len() < 2 {
            return Err(FalconzError::InsufficientInput(
                frames.first().map(|f| f.path.clone()).unwrap_or_default(),
            ));
        }
        Ok(FrameSequence { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Resolves the caller-supplied reference frame index; `-1` means last.
    pub fn resolve_reference_index(&self, requested: i64) -> Result<usize> {
        if requested == -1 {
            return Ok(self.frames.len() - 1);
        }
        if requested < 0 || requested as usize >= self.frames.len() {
            return Err(FalconzError::Config(format!(
                "reference frame index {} is out of range for {} frames",
                requested,
                self.frames.len()
            )));
        }
        Ok(requested as usize)
    }

    /// All frames except the reference, preserving index order (spec.md §3
    /// `ReferenceSelection`: "moving set is all frames except the
    /// reference").
    pub fn moving_set(&self, reference_index: usize) -> Vec<&Frame> {
        self.frames
            .iter()
            .filter(|f| f.index != reference_index)
            .collect()
    }

    /// Frames strictly before `start_index`, excluding the reference —
    /// these are passed through unchanged into the output.
    pub fn non_moco_set(&self, reference_index: usize, start_index: usize) -> Vec<&Frame> {
        self.frames
            .iter()
            .filter(|f| f.index < start_index && f.index != reference_index)
            .collect()
    }

    pub fn reference(&self, reference_index: usize) -> &Frame {
        &self.frames[reference_index]
    }
}

/// `{reference_index, start_index}` per spec.md §3. Invariants are checked
/// at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceSelection {
    pub reference_index: usize,
    pub start_index: usize,
}

impl ReferenceSelection {
    pub fn new(sequence: &FrameSequence, reference_index: usize, start_index: usize) -> Result<Self> {
        let len = sequence.len();
        if start_index >= len {
            return Err(FalconzError::Config(format!(
                "start index {start_index} is out of range for {len} frames"
            )));
        }
        let is_last_ref = reference_index == len - 1;
        let ordered_ok = start_index <= reference_index;
        if !ordered_ok && !is_last_ref {
            return Err(FalconzError::Config(format!(
                "start index {start_index} must not exceed reference index {reference_index}"
            )));
        }
        Ok(ReferenceSelection {
            reference_index,
            start_index,
        })
    }
}

const RECOGNIZED_EXTENSIONS: &[&str] = &["nii", "nii.gz", "hdr", "img", "nrrd", "mha", "mhd"];

pub fn is_volume_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_ascii_lowercase(),
        None => return false,
    };
    RECOGNIZED_EXTENSIONS
        .iter()
        .any(|ext| name.ends_with(&format!(".{ext}")))
}

/// Splits a filename into alternating text/numeric runs so that
/// `vol_2.nii` sorts before `vol_10.nii` (natural-numeric order per
/// spec.md §4.C/§4.D). Exposed for the assembler's merge step, which sorts
/// the same way over `moco_*` files.
pub fn natural_sort_key(path: &Path) -> Vec<NaturalKeyPart> {
    natural_key(path)
}

fn natural_key(path: &Path) -> Vec<NaturalKeyPart> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut parts = Vec::new();
    let mut chars = name.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value: u64 = digits.parse().unwrap_or(0);
            parts.push(NaturalKeyPart::Number(value));
        } else {
            let mut text = String::new();
            while let Some(&t) = chars.peek() {
                if !t.is_ascii_digit() {
                    text.push(t);
                    chars.next();
                } else {
                    break;
                }
            }
            parts.push(NaturalKeyPart::Text(text));
        }
    }
    parts
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalKeyPart {
    Number(u64),
    Text(String),
}
