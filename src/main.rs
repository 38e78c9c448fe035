use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use falconz::cli::{CliArgs, Config};
use falconz::error::FalconzError;
use falconz::reporter::IndicatifReporter;
use falconz::session::{RunManifest, StudySession};
use falconz::{logging, run_pipeline};

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("falconz: {err}");
            return err.exit_code();
        }
    };

    let session = match StudySession::create(&config.directory) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("falconz: {err}");
            return err.exit_code();
        }
    };

    let _logging_guard = logging::init(&session.log_path(), &config.log_level);
    let reporter = IndicatifReporter::new();

    match run_pipeline(config, session, &reporter) {
        Ok(manifest) => report_manifest(&manifest),
        Err(err) => {
            error!(%err, "pipeline failed");
            eprintln!("falconz: {err}");
            err.exit_code()
        }
    }
}

fn report_manifest(manifest: &RunManifest) -> ExitCode {
    println!(
        "wrote {} frames to {}",
        manifest.frame_count,
        manifest.working_dir.display()
    );

    if manifest.succeeded_entirely() {
        return ExitCode::SUCCESS;
    }

    eprintln!(
        "falconz: {} frame(s) failed alignment; moco_4D was assembled without them",
        manifest.failed_frames.len()
    );
    for frame in &manifest.failed_frames {
        eprintln!("  - {}", frame.display());
    }

    let err = FalconzError::AlignmentFailure {
        count: manifest.failed_frames.len(),
        failures: manifest.failed_frames.iter().map(|p| (p.clone(), String::new())).collect(),
    };
    err.exit_code()
}
