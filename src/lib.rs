//! FALCON-Z: motion correction for dynamic 4-D PET image series.
//!
//! `run_pipeline` sequences the components in spec.md §2: platform probe →
//! resource estimate → input normalization → frame indexing → start-frame
//! selection → alignment → output assembly.

pub mod assemble;
pub mod cli;
pub mod engine;
pub mod error;
pub mod frames;
pub mod image;
pub mod ingest;
pub mod logging;
pub mod platform;
pub mod pool;
pub mod reporter;
pub mod resources;
pub mod scheduler;
pub mod selector;
pub mod session;

use tracing::{info, warn};

use cli::{Config, StartFrameConfig};
use engine::{Engine, ExternalEngine};
use error::Result;
use frames::{FrameSequence, ReferenceSelection};
use platform::{BinaryLocator, Platform};
use reporter::Reporter;
use resources::ResourceSnapshot;
use session::{RunManifest, StudySession};

/// Runs the whole pipeline for one invocation. Returns the manifest on
/// success or on a non-fatal alignment-failure set (exit code 4 is decided
/// by the caller from the manifest, not from this function's `Err`).
///
/// `session` is created by the caller (and logging initialized against its
/// `log_path()`) before this function runs, since the working directory's
/// timestamp must be fixed before the first log line is written.
pub fn run_pipeline(config: Config, session: StudySession, reporter: &dyn Reporter) -> Result<RunManifest> {
    let platform = Platform::probe(&BinaryLocator::default())?;
    info!(os = ?platform.os, arch = ?platform.arch, "platform probed");
    info!(working_dir = %session.root.display(), "study session created");

    let snapshot = ResourceSnapshot::current();
    let converter_pool = resources::converter_pool_size(snapshot.available_threads);

    ingest::normalize(&platform, &config.directory, &session.split_dir(), converter_pool)?;

    let sequence = FrameSequence::from_directory(&session.split_dir())?;
    let reference_index = sequence.resolve_reference_index(config.reference_frame_index)?;

    let engine: Box<dyn Engine> = Box::new(ExternalEngine::new(platform.clone()));

    let start_index = match config.start_frame {
        StartFrameConfig::Explicit(idx) => idx,
        StartFrameConfig::Auto => {
            let candidates = sequence.moving_set(reference_index);
            if candidates.len() <= 1 {
                // spec.md §8: exactly 2 frames always aligns the single
                // non-reference frame; the selector is not invoked.
                candidates[0].index
            } else {
                let ncc_pool = resources::ncc_pool_size(snapshot.available_threads);
                selector::select_start_frame(
                    engine.as_ref(),
                    &sequence,
                    reference_index,
                    &session.ncc_dir(),
                    ncc_pool,
                    config.ncc_threshold,
                )?
            }
        }
    };

    let selection = ReferenceSelection::new(&sequence, reference_index, start_index)?;
    info!(
        reference = selection.reference_index,
        start = selection.start_index,
        paradigm = %config.paradigm,
        "reference selection resolved"
    );

    let moving_set: Vec<&frames::Frame> = sequence
        .frames()
        .iter()
        .filter(|f| f.index >= selection.start_index && f.index != selection.reference_index)
        .collect();

    let registration_pool = config
        .jobs_override
        .unwrap_or_else(|| resources::estimate_parallel_jobs(config.paradigm, snapshot));

    let reference = sequence.reference(selection.reference_index);
    let inputs = scheduler::SchedulerInputs {
        reference,
        moving_set,
        paradigm: config.paradigm,
        iterations: config.iterations.clone(),
        split_dir: session.split_dir(),
        pool_size: registration_pool.max(1),
    };

    let outcome = scheduler::run(engine.as_ref(), inputs, reporter);
    if !outcome.failures.is_empty() {
        warn!(failed = outcome.failures.len(), "some frames failed alignment; assembling around the gaps");
    }

    let assembly_inputs = assemble::AssemblyInputs {
        sequence: &sequence,
        reference_index: selection.reference_index,
        start_index: selection.start_index,
        paradigm: config.paradigm,
        split_dir: session.split_dir(),
        moco_dir: session.moco_dir(),
        transforms_dir: session.transforms_dir(),
    };
    assemble::assemble(&platform, &assembly_inputs, &outcome.succeeded, outcome.failures.len())?;

    if !config.keep_scratch && session.ncc_dir().is_dir() {
        let _ = std::fs::remove_dir_all(session.ncc_dir());
    }

    // Alignment failures are not returned as `Err`: the merge still runs
    // over the frames that succeeded (spec.md §7), and `main` derives exit
    // code 4 from `manifest.failed_frames` directly.
    Ok(RunManifest {
        working_dir: session.root,
        frame_count: sequence.len(),
        reference_index: selection.reference_index,
        start_index: selection.start_index,
        failed_frames: outcome.failures.iter().map(|(p, _)| p.clone()).collect(),
    })
}
