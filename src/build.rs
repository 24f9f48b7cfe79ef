//! Dependency-and-build driver.
//!
//! The driver is an explicit state machine. Every run starts at `Querying` and
//! ends at `Done` or `Failed(code)`:
//!
//! ```text
//! Querying       -> Installing | Failed
//! Installing     -> Building | Done | Failed
//! Building       -> Done | RecoveringDeps | Failed
//! RecoveringDeps -> Building | Failed
//! ```
//!
//! `Building -> RecoveringDeps` is the only recoverable edge, taken when
//! rpmbuild exits with [`MISSING_BUILD_DEPS_EXIT_CODE`].
use crate::artifact;
use crate::config::DriverConfig;
use crate::deps;
use crate::exec::{exit_code_for, run_checked, CommandFailed, CommandRunner, CommandSpec};
use crate::phase::Phase;
use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;

/// rpmbuild's exit status for "dynamic build requirements are missing".
pub const MISSING_BUILD_DEPS_EXIT_CODE: i32 = 11;

const BUILD_NAME_FMT: &str = "%%{NAME}-%%{VERSION}-%%{RELEASE}.%%{ARCH}.rpm";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Querying,
    Installing,
    Building,
    RecoveringDeps,
    Done,
    /// Terminal failure carrying the exit code the process will report.
    Failed(i32),
}

impl DriverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Querying => write!(f, "Querying"),
            Self::Installing => write!(f, "Installing"),
            Self::Building => write!(f, "Building"),
            Self::RecoveringDeps => write!(f, "RecoveringDeps"),
            Self::Done => write!(f, "Done"),
            Self::Failed(code) => write!(f, "Failed({code})"),
        }
    }
}

fn is_legal_transition(from: DriverState, to: DriverState) -> bool {
    use DriverState::*;

    if matches!(to, Failed(_)) && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Querying, Installing)
            | (Installing, Building)
            | (Installing, Done)
            | (Building, Done)
            | (Building, RecoveringDeps)
            | (RecoveringDeps, Building)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub from: DriverState,
    pub to: DriverState,
    /// Build attempts made when the transition happened.
    pub attempt: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal driver transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: DriverState,
    pub to: DriverState,
}

/// Current state plus the log of every transition taken.
#[derive(Debug)]
pub struct StateMachine {
    current: DriverState,
    attempt: u32,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: DriverState::Querying,
            attempt: 0,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> DriverState {
        self.current
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    pub fn advance(&mut self, to: DriverState) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }
        tracing::debug!(from = %self.current, to = %to, attempt = self.attempt, "state transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
        });
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// `Querying -> Installing -> Building(1) -> ...` rendering for logs.
    pub fn summary(&self) -> String {
        let start = self
            .transitions
            .first()
            .map(|record| record.from)
            .unwrap_or(self.current);
        let mut states = vec![start.to_string()];
        for record in &self.transitions {
            if record.to == DriverState::Building {
                states.push(format!("{}({})", record.to, record.attempt + 1));
            } else {
                states.push(record.to.to_string());
            }
        }
        states.join(" -> ")
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverReport {
    pub phase: Phase,
    /// Requirements handed to the installer.
    pub packages: Vec<String>,
    pub build_attempts: u32,
    pub recoveries: u32,
    pub transitions: Vec<TransitionRecord>,
}

/// `rpmbuild -bd` invocation that produces the source RPM in place.
pub fn build_command(config: &DriverConfig) -> CommandSpec {
    let source_dir = config.source_dir.display().to_string();
    let cmd = if config.chroot.is_empty() {
        CommandSpec::with_prefix(&[], "rpmbuild").current_dir(&config.source_dir)
    } else {
        let mut prefix = config.chroot.clone();
        prefix.push("--chdir".to_string());
        prefix.push(source_dir);
        CommandSpec::with_prefix(&prefix, "rpmbuild")
    };
    cmd.args(["-bd", "--build-in-place"])
        .args([
            "--define".to_string(),
            format!("_topdir {}", config.top_dir.display()),
        ])
        .args([
            "--define".to_string(),
            format!("_sourcedir {}", config.rpm_source_dir),
        ])
        .args([
            "--define".to_string(),
            format!("_build_name_fmt {BUILD_NAME_FMT}"),
        ])
        .args(config.define_args())
        .arg(config.spec.display().to_string())
}

/// Install the build requirements declared by the given artifacts.
pub fn builddep_command(config: &DriverConfig, artifacts: &[PathBuf]) -> CommandSpec {
    CommandSpec::from_argv(&config.builddep)
        .args(artifacts.iter().map(|path| path.display().to_string()))
}

/// Runs one phase against a [`CommandRunner`].
pub struct Driver<'a> {
    runner: &'a mut dyn CommandRunner,
    config: &'a DriverConfig,
    machine: StateMachine,
    build_attempts: u32,
    recoveries: u32,
    dry_run: bool,
}

impl<'a> Driver<'a> {
    pub fn new(runner: &'a mut dyn CommandRunner, config: &'a DriverConfig) -> Self {
        Self {
            runner,
            config,
            machine: StateMachine::new(),
            build_attempts: 0,
            recoveries: 0,
            dry_run: false,
        }
    }

    /// Leave files under the top directory untouched; only log what would go.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn state(&self) -> DriverState {
        self.machine.current()
    }

    /// Resolve dependencies for `phase` and, for the build phase, build until
    /// rpmbuild stops asking for more dependencies.
    pub fn run(&mut self, phase: Phase) -> Result<DriverReport> {
        match self.run_phase(phase) {
            Ok(packages) => {
                tracing::debug!(states = %self.machine.summary(), "prepare finished");
                Ok(DriverReport {
                    phase,
                    packages,
                    build_attempts: self.build_attempts,
                    recoveries: self.recoveries,
                    transitions: self.machine.transitions().to_vec(),
                })
            }
            Err(err) => {
                let code = exit_code_for(&err);
                if !self.machine.current().is_terminal() {
                    self.machine.advance(DriverState::Failed(code))?;
                }
                tracing::debug!(states = %self.machine.summary(), "prepare failed");
                Err(err)
            }
        }
    }

    fn run_phase(&mut self, phase: Phase) -> Result<Vec<String>> {
        let packages = deps::query_requirements(self.runner, self.config, phase)?;
        self.machine.advance(DriverState::Installing)?;
        deps::install_packages(self.runner, self.config, &packages)?;

        if !phase.runs_build() {
            self.machine.advance(DriverState::Done)?;
            return Ok(packages);
        }

        self.clear_stale_artifacts()?;
        self.machine.advance(DriverState::Building)?;
        self.build_loop()?;
        Ok(packages)
    }

    fn clear_stale_artifacts(&self) -> Result<()> {
        let stale = artifact::find_artifacts(&self.config.srpm_dir(), &self.config.package)?;
        if stale.is_empty() {
            return Ok(());
        }
        if self.dry_run {
            for path in &stale {
                tracing::info!(
                    path = %path.display(),
                    "dry run: would remove stale build dependency request"
                );
            }
            return Ok(());
        }
        tracing::warn!(count = stale.len(), "removing stale build dependency requests");
        artifact::remove_artifacts(&stale)
    }

    fn build_loop(&mut self) -> Result<()> {
        let build = build_command(self.config);
        loop {
            self.build_attempts += 1;
            self.machine.set_attempt(self.build_attempts);
            let code = self.runner.status(&build)?;
            match code {
                0 => {
                    self.machine.advance(DriverState::Done)?;
                    return Ok(());
                }
                MISSING_BUILD_DEPS_EXIT_CODE => {
                    if let Some(max) = self.config.max_recoveries {
                        if self.recoveries >= max {
                            return Err(CommandFailed {
                                command: build.command_line(),
                                code,
                            })
                            .with_context(|| {
                                format!("build still missing dependencies after {max} recoveries")
                            });
                        }
                    }
                    self.machine.advance(DriverState::RecoveringDeps)?;
                    self.recover()?;
                    self.recoveries += 1;
                    self.machine.advance(DriverState::Building)?;
                }
                _ => {
                    return Err(CommandFailed {
                        command: build.command_line(),
                        code,
                    }
                    .into());
                }
            }
        }
    }

    fn recover(&mut self) -> Result<()> {
        let srpm_dir = self.config.srpm_dir();
        let artifacts = artifact::require_artifacts(&srpm_dir, &self.config.package)?;
        tracing::info!(
            count = artifacts.len(),
            attempt = self.build_attempts,
            "installing additional build dependencies"
        );
        let builddep = builddep_command(self.config, &artifacts);
        run_checked(self.runner, &builddep).context("install additional build dependencies")?;
        artifact::remove_artifacts(&artifacts)
    }
}

#[cfg(test)]
#[path = "build_tests.rs"]
mod tests;
