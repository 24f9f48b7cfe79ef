//! Dependency query and installation.
//!
//! `rpmspec -q` prints one requirement per line. The list is filtered, ordered
//! and handed to the installer in a single invocation.
use crate::config::DriverConfig;
use crate::exec::{capture_checked, run_checked, CommandRunner, CommandSpec};
use crate::phase::Phase;
use anyhow::{Context, Result};

/// Query the spec's requirements for `phase`.
///
/// Queries the spec's binary packages, not the source header: a source
/// header lists BuildRequires as its Requires.
pub fn query_command(config: &DriverConfig, phase: Phase) -> CommandSpec {
    let source_dir = config.source_dir.join(&config.rpm_source_dir);
    CommandSpec::with_prefix(&config.chroot, "rpmspec")
        .arg("-q")
        .args([
            "--define".to_string(),
            format!("_topdir {}", config.top_dir.display()),
        ])
        .args([
            "--define".to_string(),
            format!("_sourcedir {}", source_dir.display()),
        ])
        .args(config.define_args())
        .arg(phase.query_flag())
        .arg(config.spec_path().display().to_string())
}

/// Install `packages`; already-satisfied requirements are a no-op for the installer.
pub fn install_command(config: &DriverConfig, packages: &[String]) -> CommandSpec {
    CommandSpec::from_argv(&config.install).args(packages.iter().cloned())
}

/// Turn raw query output into the install list.
///
/// Lines mentioning any excluded name are dropped, so sub-packages of the
/// packaging tool never get installed from the distribution.
pub fn parse_requirements(stdout: &str, exclude: &[String]) -> Vec<String> {
    let mut requirements: Vec<String> = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if exclude.iter().any(|name| line.contains(name.as_str())) {
            tracing::debug!(requirement = line, "excluding requirement");
            continue;
        }
        if !requirements.iter().any(|existing| existing == line) {
            requirements.push(line.to_string());
        }
    }
    sort_packages(&mut requirements);
    requirements
}

/// Order plain names first, file paths second, rich dependencies last.
pub fn sort_packages(packages: &mut [String]) {
    packages.sort_by(|a, b| {
        package_class(a)
            .cmp(&package_class(b))
            .then_with(|| a.cmp(b))
    });
}

fn package_class(name: &str) -> u8 {
    match name.chars().next() {
        Some('(') => 2,
        Some('/') => 1,
        _ => 0,
    }
}

/// Query the requirements for `phase` and filter them into an install list.
pub fn query_requirements(
    runner: &mut dyn CommandRunner,
    config: &DriverConfig,
    phase: Phase,
) -> Result<Vec<String>> {
    let query = query_command(config, phase);
    let stdout = capture_checked(runner, &query)
        .with_context(|| format!("query {phase} requirements of {}", config.spec.display()))?;
    let packages = parse_requirements(&stdout, &config.exclude);
    tracing::debug!(phase = %phase, count = packages.len(), "requirements resolved");
    Ok(packages)
}

/// Install `packages`, skipping the installer entirely for an empty list.
pub fn install_packages(
    runner: &mut dyn CommandRunner,
    config: &DriverConfig,
    packages: &[String],
) -> Result<()> {
    if packages.is_empty() {
        tracing::info!("no requirements to install");
        return Ok(());
    }
    tracing::info!(count = packages.len(), "installing requirements");
    let install = install_command(config, packages);
    run_checked(runner, &install).context("install requirements")
}
