//! External command execution.
//!
//! Every collaborator (query tool, installer, build tool) is an opaque child
//! process. Commands are described as [`CommandSpec`] values and executed
//! through a [`CommandRunner`] so the driver can be exercised without them.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Instant;

/// Exit code reported when a command cannot be located, as a shell would.
pub const COMMAND_NOT_FOUND_EXIT_CODE: i32 = 127;

/// Exit code used for driver errors that did not come from a child.
pub const DRIVER_ERROR_EXIT_CODE: i32 = 1;

/// A child process that exited unsuccessfully.
///
/// Carried inside `anyhow::Error` so `main` can propagate the child's exit code.
#[derive(Debug, thiserror::Error)]
#[error("`{command}` failed with exit code {code}")]
pub struct CommandFailed {
    pub command: String,
    pub code: i32,
}

/// Process exit code for an error surfaced by the driver.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CommandFailed>())
        .map(|failed| failed.code)
        .unwrap_or(DRIVER_ERROR_EXIT_CODE)
}

/// Fully resolved argv for one external command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    argv: Vec<String>,
    current_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Start a command behind an optional wrapper prefix (e.g. `mkosi-chroot`).
    pub fn with_prefix(prefix: &[String], program: &str) -> Self {
        let mut argv = prefix.to_vec();
        argv.push(program.to_string());
        Self {
            argv,
            current_dir: None,
        }
    }

    /// Start a command from a pre-split argv such as a configured installer.
    pub fn from_argv(argv: &[String]) -> Self {
        Self {
            argv: argv.to_vec(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the child from `dir` instead of the driver's working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Shell-quoted rendering used in logs and error messages.
    pub fn command_line(&self) -> String {
        shell_words::join(&self.argv)
    }
}

/// Captured result of a command whose stdout is consumed by the driver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
}

/// Seam between the driver and the processes it launches.
pub trait CommandRunner {
    /// Run with inherited stdio and return the exit code.
    fn status(&mut self, cmd: &CommandSpec) -> Result<i32>;

    /// Run with stdout captured and return the exit code plus stdout.
    fn output(&mut self, cmd: &CommandSpec) -> Result<CommandOutput>;
}

/// Run a command and turn any non-zero exit into [`CommandFailed`].
pub fn run_checked(runner: &mut dyn CommandRunner, cmd: &CommandSpec) -> Result<()> {
    let code = runner.status(cmd)?;
    if code != 0 {
        return Err(CommandFailed {
            command: cmd.command_line(),
            code,
        }
        .into());
    }
    Ok(())
}

/// Capture stdout of a command, turning any non-zero exit into [`CommandFailed`].
pub fn capture_checked(runner: &mut dyn CommandRunner, cmd: &CommandSpec) -> Result<String> {
    let output = runner.output(cmd)?;
    if output.code != 0 {
        return Err(CommandFailed {
            command: cmd.command_line(),
            code: output.code,
        }
        .into());
    }
    Ok(output.stdout)
}

/// Runs commands as real child processes.
#[derive(Debug, Default)]
pub struct SystemRunner {
    dry_run: bool,
}

impl SystemRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Build a `std::process::Command`, or `None` if the program is not on `PATH`.
    fn prepare(&self, cmd: &CommandSpec) -> Option<Command> {
        let (program, args) = cmd.argv().split_first()?;
        let resolved = match which::which(program) {
            Ok(path) => path,
            Err(err) => {
                tracing::error!(program = %program, error = %err, "command not found");
                return None;
            }
        };
        let mut command = Command::new(resolved);
        command.args(args);
        if let Some(dir) = cmd.working_dir() {
            command.current_dir(dir);
        }
        Some(command)
    }
}

impl CommandRunner for SystemRunner {
    fn status(&mut self, cmd: &CommandSpec) -> Result<i32> {
        let command_line = cmd.command_line();
        if self.dry_run {
            tracing::info!(command = %command_line, "dry run: skipping command");
            return Ok(0);
        }
        let Some(mut command) = self.prepare(cmd) else {
            return Ok(COMMAND_NOT_FOUND_EXIT_CODE);
        };
        tracing::info!(command = %command_line, "running");
        let start = Instant::now();
        let status = command
            .status()
            .with_context(|| format!("spawn {command_line}"))?;
        let code = exit_code(&status);
        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis(),
            code,
            "command complete"
        );
        Ok(code)
    }

    fn output(&mut self, cmd: &CommandSpec) -> Result<CommandOutput> {
        let command_line = cmd.command_line();
        if self.dry_run {
            tracing::info!(command = %command_line, "dry run: skipping command");
            return Ok(CommandOutput::default());
        }
        let Some(mut command) = self.prepare(cmd) else {
            return Ok(CommandOutput {
                code: COMMAND_NOT_FOUND_EXIT_CODE,
                stdout: String::new(),
            });
        };
        tracing::info!(command = %command_line, "running");
        let start = Instant::now();
        let output = command
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .output()
            .with_context(|| format!("spawn {command_line}"))?;
        let code = exit_code(&output.status);
        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis(),
            code,
            stdout_bytes = output.stdout.len(),
            "command complete"
        );
        let stdout = String::from_utf8(output.stdout)
            .with_context(|| format!("decode stdout of {command_line} as UTF-8"))?;
        Ok(CommandOutput { code, stdout })
    }
}

/// Exit code of a finished child; signals map to `128 + signal` like a shell.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    DRIVER_ERROR_EXIT_CODE
}
