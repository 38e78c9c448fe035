//! Alignment scheduler (spec.md §4.F).
//!
//! Registers and resamples every moving frame against the reference, in
//! parallel, and aggregates per-frame failures instead of aborting on the
//! first one — matching spec.md §7's propagation policy for `Alignment`
//! errors.

use std::path::{Path, PathBuf};

use crate::engine::{Engine, Paradigm, RegistrationJob};
use crate::error::{FalconzError, Result};
use crate::frames::Frame;
use crate::pool::map_bounded;
use crate::reporter::Reporter;

pub struct SchedulerInputs<'a> {
    pub reference: &'a Frame,
    pub moving_set: Vec<&'a Frame>,
    pub paradigm: Paradigm,
    pub iterations: String,
    pub split_dir: PathBuf,
    pub pool_size: usize,
}

#[derive(Debug)]
pub struct SchedulerOutcome {
    pub succeeded: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

/// Runs every registration+resample job in `inputs.moving_set` through
/// Pool-F. A non-empty `failures` set is surfaced by the caller as an
/// `AlignmentFailure`, but every job that did succeed is still reported so
/// §4.G can assemble around the gaps.
pub fn run(engine: &dyn Engine, inputs: SchedulerInputs, reporter: &dyn Reporter) -> SchedulerOutcome {
    let total = inputs.moving_set.len();
    reporter.alignment_started(total);

    let jobs: Vec<RegistrationJob> = inputs
        .moving_set
        .iter()
        .map(|frame| RegistrationJob {
            fixed: inputs.reference.path.clone(),
            moving: frame.path.clone(),
            paradigm: inputs.paradigm,
            iterations: inputs.iterations.clone(),
            out_dir: inputs.split_dir.clone(),
        })
        .collect();

    let results: Vec<std::result::Result<PathBuf, (PathBuf, String)>> =
        map_bounded(inputs.pool_size, jobs, move |job| run_one(engine, job));

    let mut succeeded = Vec::new();
    let mut failures = Vec::new();
    for (done, result) in results.into_iter().enumerate() {
        match result {
            Ok(path) => succeeded.push(path),
            Err(failure) => failures.push(failure),
        }
        reporter.alignment_progress(done + 1, total);
    }

    reporter.alignment_finished(succeeded.len(), failures.len());
    SchedulerOutcome { succeeded, failures }
}

fn run_one(engine: &dyn Engine, job: RegistrationJob) -> std::result::Result<PathBuf, (PathBuf, String)> {
    engine
        .register(&job)
        .and_then(|_| engine.resample(&job))
        .map(|_| job.resampled_path())
        .map_err(|err| (job.moving.clone(), stderr_tail(&err)))
}

fn stderr_tail(err: &FalconzError) -> String {
    match err {
        FalconzError::AlignmentFailure { failures, .. } => failures
            .first()
            .map(|(_, stderr)| stderr.clone())
            .unwrap_or_else(|| err.to_string()),
        other => other.to_string(),
    }
}

pub fn into_alignment_error(outcome: &SchedulerOutcome) -> Option<FalconzError> {
    if outcome.failures.is_empty() {
        None
    } else {
        Some(FalconzError::AlignmentFailure {
            count: outcome.failures.len(),
            failures: outcome.failures.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NoopReporter;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubEngine {
        fail_names: Vec<String>,
        registrations: AtomicUsize,
    }

    impl Engine for StubEngine {
        fn register(&self, job: &RegistrationJob) -> Result<()> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            if self.fail_names.iter().any(|n| job.moving.ends_with(n)) {
                return Err(FalconzError::AlignmentFailure {
                    count: 1,
                    failures: vec![(job.moving.clone(), "stub registration failure".to_string())],
                });
            }
            Ok(())
        }

        fn resample(&self, _job: &RegistrationJob) -> Result<()> {
            Ok(())
        }

        fn voxelwise_ncc(&self, _fixed: &Path, _moving: &Path, _out: &Path, _radius: &str) -> Result<()> {
            unimplemented!("not exercised by the scheduler")
        }

        fn clip_nonnegative(&self, _image: &Path) -> Result<()> {
            unimplemented!("not exercised by the scheduler")
        }

        fn mean_intensity(&self, _image: &Path) -> Result<f64> {
            unimplemented!("not exercised by the scheduler")
        }
    }

    fn frame(index: usize, name: &str) -> Frame {
        Frame {
            index,
            path: PathBuf::from(format!("/work/split/{name}")),
        }
    }

    #[test]
    fn all_jobs_succeed_when_engine_never_fails() {
        let engine = StubEngine {
            fail_names: vec![],
            registrations: AtomicUsize::new(0),
        };
        let reference = frame(3, "vol_0003.nii.gz");
        let f0 = frame(0, "vol_0000.nii.gz");
        let f1 = frame(1, "vol_0001.nii.gz");
        let inputs = SchedulerInputs {
            reference: &reference,
            moving_set: vec![&f0, &f1],
            paradigm: Paradigm::Rigid,
            iterations: "100x25x10".to_string(),
            split_dir: PathBuf::from("/work/split"),
            pool_size: 2,
        };
        let outcome = run(&engine, inputs, &NoopReporter);
        assert_eq!(outcome.succeeded.len(), 2);
        assert!(outcome.failures.is_empty());
        assert!(into_alignment_error(&outcome).is_none());
    }

    #[test]
    fn one_failing_frame_does_not_block_the_others() {
        let engine = StubEngine {
            fail_names: vec!["vol_0001.nii.gz".to_string()],
            registrations: AtomicUsize::new(0),
        };
        let reference = frame(3, "vol_0003.nii.gz");
        let f0 = frame(0, "vol_0000.nii.gz");
        let f1 = frame(1, "vol_0001.nii.gz");
        let f2 = frame(2, "vol_0002.nii.gz");
        let inputs = SchedulerInputs {
            reference: &reference,
            moving_set: vec![&f0, &f1, &f2],
            paradigm: Paradigm::Affine,
            iterations: "100x25x10".to_string(),
            split_dir: PathBuf::from("/work/split"),
            pool_size: 2,
        };
        let outcome = run(&engine, inputs, &NoopReporter);
        assert_eq!(outcome.succeeded.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, PathBuf::from("/work/split/vol_0001.nii.gz"));
        assert!(into_alignment_error(&outcome).is_some());
    }
}
