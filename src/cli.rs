//! CLI argument parsing.
//!
//! mkosi invokes prepare scripts with a single positional argument, so the
//! phase stays positional and everything else is an optional override.
use crate::config::ConfigOverrides;
use clap::Parser;
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "rpm-prepare",
    version,
    about = "Install RPM spec dependencies and build the source RPM for mkosi",
    after_help = "Phases:\n  build   Install BuildRequires, then build the source RPM, installing\n          dynamic build requirements whenever rpmbuild exits 11\n  final   Install Requires only (any other value, or none, means final)\n\nExamples:\n  rpm-prepare build\n  rpm-prepare final --spec pkg/foo.spec --package foo\n  rpm-prepare build --config rpm-prepare.json --dry-run"
)]
pub struct RootArgs {
    /// Prepare phase; only `build` runs rpmbuild
    #[arg(value_name = "PHASE")]
    pub phase: Option<String>,

    /// JSON config file with driver settings
    #[arg(long, value_name = "PATH", env = "RPM_PREPARE_CONFIG")]
    pub config: Option<PathBuf>,

    /// RPM spec file, relative to the source directory
    #[arg(long, value_name = "PATH")]
    pub spec: Option<PathBuf>,

    /// Source directory the build runs in
    #[arg(long, value_name = "DIR", env = "SRCDIR")]
    pub srcdir: Option<PathBuf>,

    /// rpmbuild top directory; build dependency requests land in its SRPMS/
    #[arg(long, value_name = "DIR")]
    pub topdir: Option<PathBuf>,

    /// Package built from the spec; never installed from the distribution
    #[arg(long, value_name = "NAME")]
    pub package: Option<String>,

    /// Wrapper command for rpmspec and rpmbuild (empty string runs them directly)
    #[arg(long, value_name = "CMD")]
    pub chroot_command: Option<String>,

    /// Give up after this many missing-dependency retries
    #[arg(long, value_name = "N")]
    pub max_recoveries: Option<u32>,

    /// Log commands instead of running them and leave files untouched.
    /// The skipped query yields no requirements, so no install is logged
    #[arg(long)]
    pub dry_run: bool,

    /// Print the default config as JSON and exit
    #[arg(long, conflicts_with = "phase")]
    pub print_default_config: bool,

    /// Emit debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl RootArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            spec: self.spec.clone(),
            source_dir: self.srcdir.clone(),
            top_dir: self.topdir.clone(),
            package: self.package.clone(),
            chroot_command: self.chroot_command.clone(),
            max_recoveries: self.max_recoveries,
        }
    }
}
