//! Resource estimator (spec.md §4.B / §5).
//!
//! Derives a parallel job count from available RAM and logical CPUs, per
//! paradigm-specific minima. Ported from `falconz/file_utilities.py::
//! get_number_of_possible_jobs`, which used `psutil`; here `sysinfo` and
//! `num_cpus` stand in for it.

use tracing::warn;

use crate::engine::Paradigm;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSnapshot {
    pub available_mem_gb: f64,
    pub available_threads: usize,
}

impl ResourceSnapshot {
    pub fn current() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let available_mem_gb = system.available_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        ResourceSnapshot {
            available_mem_gb,
            available_threads: num_cpus::get(),
        }
    }
}

/// Minimum RAM (GB) and thread count a single registration job needs,
/// per `spec.md` §5's table.
pub fn min_requirements(paradigm: Paradigm) -> (f64, usize) {
    match paradigm {
        Paradigm::Rigid => (4.0, 2),
        Paradigm::Affine => (8.0, 4),
        Paradigm::Deformable => (16.0, 8),
    }
}

/// Computes how many registration jobs can run concurrently, clamped to at
/// least 1 (over-subscription is preferred to refusal; spec.md §5).
pub fn estimate_parallel_jobs(paradigm: Paradigm, snapshot: ResourceSnapshot) -> usize {
    let (min_mem, min_threads) = min_requirements(paradigm);
    let by_mem = (snapshot.available_mem_gb / min_mem).floor() as i64;
    let by_threads = (snapshot.available_threads / min_threads) as i64;
    let num_jobs = by_mem.min(by_threads);

    if num_jobs <= 0 {
        warn!(
            paradigm = ?paradigm,
            available_mem_gb = snapshot.available_mem_gb,
            available_threads = snapshot.available_threads,
            "resource estimate rounded to zero jobs; over-subscribing to 1"
        );
        1
    } else {
        num_jobs as usize
    }
}

/// Worker count for the NCC sweep (Pool-E): `ceil(cpu_count / 2)`.
pub fn ncc_pool_size(available_threads: usize) -> usize {
    available_threads.div_ceil(2).max(1)
}

/// Worker count for the conversion pool (Pool-C): up to `cpu_count`.
pub fn converter_pool_size(available_threads: usize) -> usize {
    available_threads.max(1)
}
