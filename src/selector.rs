//! Start-frame selector (spec.md §4.E).
//!
//! Sweeps a voxelwise NCC score against the reference over every candidate
//! frame and returns the earliest index whose score clears a fraction of
//! the top-3 mean. Per spec.md §8 Open Question #1, τ is a tunable, never a
//! re-baked constant.

use std::path::Path;

use crate::engine::Engine;
use crate::error::{FalconzError, Result};
use crate::frames::{Frame, FrameSequence};
use crate::pool::map_bounded;

pub const DEFAULT_NCC_THRESHOLD: f64 = 0.5;
const NCC_RADIUS: &str = "4x4x4";

#[derive(Debug, Clone, Copy, PartialEq)]
struct CandidateScore {
    index: usize,
    mean_ncc: f64,
}

/// Runs the NCC sweep and returns the index (in the original sequence) of
/// the earliest trustworthy start frame.
pub fn select_start_frame(
    engine: &dyn Engine,
    sequence: &FrameSequence,
    reference_index: usize,
    scratch_dir: &Path,
    pool_size: usize,
    threshold: f64,
) -> Result<usize> {
    let reference = sequence.reference(reference_index);
    let candidate_paths: Vec<Frame> = sequence.moving_set(reference_index).into_iter().cloned().collect();

    std::fs::create_dir_all(scratch_dir)?;

    let reference_path = reference.path.clone();
    let scratch_dir = scratch_dir.to_path_buf();

    let scores: Vec<Result<CandidateScore>> = map_bounded(pool_size, candidate_paths, {
        let reference_path = reference_path.clone();
        let scratch_dir = scratch_dir.clone();
        move |frame| score_candidate(engine, &reference_path, &frame, &scratch_dir)
    });

    let mut resolved = Vec::with_capacity(scores.len());
    for score in scores {
        resolved.push(score?);
    }

    pick_start_index(&resolved, threshold)
}

fn score_candidate(
    engine: &dyn Engine,
    reference_path: &Path,
    candidate: &Frame,
    scratch_dir: &Path,
) -> Result<CandidateScore> {
    let ncc_path = scratch_dir.join(format!("ncc_{}", candidate.file_name()));
    engine.voxelwise_ncc(reference_path, &candidate.path, &ncc_path, NCC_RADIUS)?;
    engine.clip_nonnegative(&ncc_path)?;
    let mean_ncc = engine.mean_intensity(&ncc_path)?;
    Ok(CandidateScore {
        index: candidate.index,
        mean_ncc,
    })
}

/// Pure decision function, isolated from I/O so it can be unit-tested
/// directly against the scenarios in spec.md §8.
fn pick_start_index(scores: &[CandidateScore], threshold: f64) -> Result<usize> {
    if scores.is_empty() {
        return Err(FalconzError::Config(
            "start-frame selector invoked with no candidates".to_string(),
        ));
    }

    let mut by_score = scores.to_vec();
    by_score.sort_by(|a, b| b.mean_ncc.total_cmp(&a.mean_ncc));

    // Fewer than 3 candidates: M = max(m_c) rather than a top-3 mean.
    let anchor: f64 = if by_score.len() < 3 {
        by_score[0].mean_ncc
    } else {
        by_score[..3].iter().map(|c| c.mean_ncc).sum::<f64>() / 3.0
    };

    let mut by_position = scores.to_vec();
    by_position.sort_by_key(|c| c.index);

    let picked = by_position
        .iter()
        .find(|c| c.mean_ncc > threshold * anchor)
        .or_else(|| by_position.iter().max_by(|a, b| a.mean_ncc.total_cmp(&b.mean_ncc)));

    picked.map(|c| c.index).ok_or_else(|| {
        FalconzError::Config("start-frame selector could not resolve a candidate".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(index: usize, mean_ncc: f64) -> CandidateScore {
        CandidateScore { index, mean_ncc }
    }

    #[test]
    fn picks_earliest_candidate_above_threshold() {
        let scores = vec![score(0, 0.1), score(1, 0.3), score(2, 0.9), score(3, 0.95), score(4, 0.92)];
        // top-3 mean of {0.9, 0.95, 0.92} = 0.9233..., threshold*anchor ~ 0.4617
        let picked = pick_start_index(&scores, DEFAULT_NCC_THRESHOLD).unwrap();
        assert_eq!(picked, 2);
    }

    #[test]
    fn fewer_than_three_candidates_uses_max_as_anchor() {
        let scores = vec![score(0, 0.2), score(1, 0.8)];
        // anchor = max(0.8, 0.2) = 0.8; threshold*anchor = 0.4 — frame 1 clears it.
        let picked = pick_start_index(&scores, DEFAULT_NCC_THRESHOLD).unwrap();
        assert_eq!(picked, 1);
    }

    #[test]
    fn ties_break_by_earliest_position() {
        let scores = vec![score(0, 0.9), score(1, 0.9), score(2, 0.9)];
        let picked = pick_start_index(&scores, DEFAULT_NCC_THRESHOLD).unwrap();
        assert_eq!(picked, 0);
    }

    #[test]
    fn falls_back_to_highest_scoring_candidate_when_none_clears_threshold() {
        // Degenerate: threshold > 1 makes the inequality unreachable.
        let scores = vec![score(5, 0.1), score(6, 0.4), score(7, 0.2)];
        let picked = pick_start_index(&scores, 10.0).unwrap();
        assert_eq!(picked, 6);
    }

    #[test]
    fn empty_candidate_set_is_a_config_error() {
        assert!(pick_start_index(&[], DEFAULT_NCC_THRESHOLD).is_err());
    }
}
