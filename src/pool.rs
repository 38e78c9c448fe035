//! The one scheduler primitive every parallel stage in the pipeline goes
//! through (spec.md §9: "Replace with one scheduler exposing two APIs").
//!
//! `map_bounded` runs a closure over a list of items with at most
//! `pool_size` concurrent workers, via a dedicated `rayon` thread pool sized
//! for the call (the teacher repository, `wyatt-A-radmap`, already pulls in
//! `rayon` for this kind of CPU-parallel fan-out). `spawn_child` runs an
//! external binary to completion and captures its exit status and stderr.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

/// Runs `f` over every item in `items`, with at most `pool_size` concurrent
/// invocations. Order of completion is unspecified; the returned vector
/// preserves the input order.
pub fn map_bounded<T, R, F>(pool_size: usize, items: Vec<T>, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Send + Sync,
{
    let pool_size = pool_size.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size)
        .build()
        .expect("failed to build worker pool");

    pool.install(|| {
        use rayon::prelude::*;
        items.into_par_iter().map(f).collect()
    })
}

/// Result of running an external binary to completion.
#[derive(Debug, Clone)]
pub struct ChildResult {
    pub success: bool,
    pub stderr: String,
}

/// Spawns `program` with `args`, waits for it, and captures stderr. Never
/// goes through a shell — argv is passed exactly as given, so no path ever
/// needs quoting or escaping.
pub fn spawn_child<I, S>(program: &Path, args: I) -> std::io::Result<ChildResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());

    debug!(?cmd, "spawning child process");

    let output = cmd.output()?;
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        debug!(status = ?output.status, stderr = %stderr, "child process failed");
    }

    Ok(ChildResult {
        success: output.status.success(),
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn map_bounded_preserves_order_and_visits_everything() {
        let items: Vec<i32> = (0..50).collect();
        let results = map_bounded(4, items.clone(), |x| x * 2);
        let expected: Vec<i32> = items.iter().map(|x| x * 2).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn map_bounded_respects_pool_size_floor() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let results = map_bounded(0, vec![1, 2, 3], move |x| {
            c.fetch_add(1, Ordering::SeqCst);
            x
        });
        assert_eq!(results.len(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn spawn_child_captures_nonzero_exit_and_stderr() {
        let result = spawn_child(Path::new("/bin/sh"), ["-c", "echo boom 1>&2; exit 3"]).unwrap();
        assert!(!result.success);
        assert!(result.stderr.contains("boom"));
    }

    #[test]
    fn spawn_child_captures_success() {
        let result = spawn_child(Path::new("/bin/sh"), ["-c", "exit 0"]).unwrap();
        assert!(result.success);
    }
}
