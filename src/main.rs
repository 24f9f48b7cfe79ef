use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod artifact;
mod build;
mod cli;
mod config;
mod deps;
mod exec;
mod os_release;
mod phase;

use build::Driver;
use cli::RootArgs;
use exec::{exit_code_for, SystemRunner, DRIVER_ERROR_EXIT_CODE};
use phase::Phase;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = exit_code_for(&err);
            ExitCode::from(u8::try_from(code).unwrap_or(DRIVER_ERROR_EXIT_CODE as u8))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: RootArgs) -> Result<()> {
    if args.print_default_config {
        println!("{}", config::config_stub()?);
        return Ok(());
    }

    let mut file_config = config::load_config_optional(args.config.as_deref())?;
    args.overrides().apply(&mut file_config);
    let driver_config = config::resolve_config(&file_config)?;
    let phase = Phase::from_arg(args.phase.as_deref());

    log_host(Path::new("/"));
    tracing::info!(
        phase = %phase,
        spec = %driver_config.spec.display(),
        source_dir = %driver_config.source_dir.display(),
        dry_run = args.dry_run,
        "prepare starting"
    );

    let mut runner = SystemRunner::new(args.dry_run);
    let mut driver = Driver::new(&mut runner, &driver_config).dry_run(args.dry_run);
    let report = driver
        .run(phase)
        .with_context(|| format!("{phase} phase stopped in state {}", driver.state()))?;
    tracing::info!(
        phase = %report.phase,
        installed = report.packages.len(),
        attempts = report.build_attempts,
        recoveries = report.recoveries,
        transitions = report.transitions.len(),
        "prepare complete"
    );
    Ok(())
}

fn log_host(root: &Path) {
    match os_release::read_os_release(root) {
        Ok(Some(release)) => {
            tracing::info!(distribution = release.display_name(), "host detected");
            if !release.is_rpm_based() {
                tracing::warn!(
                    distribution = release.display_name(),
                    "host does not look RPM-based; rpmspec and dnf may be unavailable"
                );
            }
        }
        Ok(None) => tracing::debug!("no os-release found"),
        Err(err) => tracing::warn!(error = %format!("{err:#}"), "could not read os-release"),
    }
}
