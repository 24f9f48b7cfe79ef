//! Driver configuration.
//!
//! Loads the optional JSON config, layers CLI overrides on top, validates the
//! result and resolves it into the argv prefixes the driver runs.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Current schema version for the JSON config file.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_SPEC: &str = "rpm/mkosi.spec";
pub const DEFAULT_SOURCE_DIR: &str = ".";
pub const DEFAULT_TOP_DIR: &str = "/var/tmp";
pub const DEFAULT_RPM_SOURCE_DIR: &str = "rpm";
pub const DEFAULT_PACKAGE: &str = "mkosi";
pub const DEFAULT_CHROOT_COMMAND: &str = "mkosi-chroot";
pub const DEFAULT_INSTALL_COMMAND: &str = "dnf --assumeyes install --best";
pub const DEFAULT_BUILDDEP_COMMAND: &str = "dnf --assumeyes builddep";

/// On-disk configuration. Every key is optional.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct PrepareConfig {
    pub schema_version: u32,
    /// Spec file, relative to `source_dir` unless absolute.
    pub spec: PathBuf,
    pub source_dir: PathBuf,
    /// rpmbuild `_topdir`; build-dependency artifacts land in `SRPMS/` below it.
    pub top_dir: PathBuf,
    /// rpmbuild `_sourcedir`.
    pub rpm_source_dir: String,
    /// The packaging tool's own package. Never installed, names the artifact.
    pub package: String,
    /// Extra names to drop from dependency lists.
    pub exclude: Vec<String>,
    /// Wrapper every query and build command runs under. May be empty.
    pub chroot_command: String,
    pub install_command: String,
    pub builddep_command: String,
    /// Macros passed as `--define "key value"` to both query and build.
    pub defines: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_recoveries: Option<u32>,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        default_config()
    }
}

/// Build the default config matching mkosi's own prepare script.
pub fn default_config() -> PrepareConfig {
    PrepareConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        spec: PathBuf::from(DEFAULT_SPEC),
        source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
        top_dir: PathBuf::from(DEFAULT_TOP_DIR),
        rpm_source_dir: DEFAULT_RPM_SOURCE_DIR.to_string(),
        package: DEFAULT_PACKAGE.to_string(),
        exclude: Vec::new(),
        chroot_command: DEFAULT_CHROOT_COMMAND.to_string(),
        install_command: DEFAULT_INSTALL_COMMAND.to_string(),
        builddep_command: DEFAULT_BUILDDEP_COMMAND.to_string(),
        defines: BTreeMap::from([("_version".to_string(), "0".to_string())]),
        max_recoveries: None,
    }
}

/// Render the default config as pretty JSON, a starting point for new files.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_config()).context("serialize config stub")
}

/// Load a config file from disk.
pub fn load_config(path: &Path) -> Result<PrepareConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: PrepareConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    Ok(config)
}

/// Load the config file when one is given, defaults otherwise.
pub fn load_config_optional(path: Option<&Path>) -> Result<PrepareConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(default_config()),
    }
}

/// Values supplied on the command line (or environment) that win over the file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub spec: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    pub top_dir: Option<PathBuf>,
    pub package: Option<String>,
    pub chroot_command: Option<String>,
    pub max_recoveries: Option<u32>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut PrepareConfig) {
        if let Some(spec) = &self.spec {
            config.spec = spec.clone();
        }
        if let Some(source_dir) = &self.source_dir {
            config.source_dir = source_dir.clone();
        }
        if let Some(top_dir) = &self.top_dir {
            config.top_dir = top_dir.clone();
        }
        if let Some(package) = &self.package {
            config.package = package.clone();
        }
        if let Some(chroot_command) = &self.chroot_command {
            config.chroot_command = chroot_command.clone();
        }
        if self.max_recoveries.is_some() {
            config.max_recoveries = self.max_recoveries;
        }
    }
}

/// Validate schema version and user-provided values.
pub fn validate_config(config: &PrepareConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if config.spec.as_os_str().is_empty() {
        return Err(anyhow!("spec must be non-empty"));
    }
    if config.package.trim().is_empty() {
        return Err(anyhow!("package must be non-empty"));
    }
    if config.rpm_source_dir.trim().is_empty() {
        return Err(anyhow!("rpm_source_dir must be non-empty"));
    }
    if config.exclude.iter().any(|name| name.trim().is_empty()) {
        return Err(anyhow!("exclude entries must be non-empty"));
    }
    for key in config.defines.keys() {
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(anyhow!(
                "define names must be non-empty without whitespace (got {key:?})"
            ));
        }
    }
    split_command(&config.chroot_command, "chroot_command", true)?;
    split_command(&config.install_command, "install_command", false)?;
    split_command(&config.builddep_command, "builddep_command", false)?;
    Ok(())
}

/// Validated config with command strings split into argv form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub spec: PathBuf,
    pub source_dir: PathBuf,
    pub top_dir: PathBuf,
    pub rpm_source_dir: String,
    pub package: String,
    /// Always starts with `package`.
    pub exclude: Vec<String>,
    pub chroot: Vec<String>,
    pub install: Vec<String>,
    pub builddep: Vec<String>,
    pub defines: BTreeMap<String, String>,
    pub max_recoveries: Option<u32>,
}

impl DriverConfig {
    /// Directory rpmbuild writes source RPMs and build-dependency artifacts to.
    pub fn srpm_dir(&self) -> PathBuf {
        self.top_dir.join("SRPMS")
    }

    /// Spec path as seen from the current directory of the query.
    pub fn spec_path(&self) -> PathBuf {
        if self.spec.is_absolute() {
            return self.spec.clone();
        }
        self.source_dir.join(&self.spec)
    }

    /// `--define` arguments shared by query and build, in key order.
    pub fn define_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.defines.len() * 2);
        for (key, value) in &self.defines {
            args.push("--define".to_string());
            args.push(format!("{key} {value}"));
        }
        args
    }
}

/// Validate a config and resolve it into a [`DriverConfig`].
pub fn resolve_config(config: &PrepareConfig) -> Result<DriverConfig> {
    validate_config(config)?;
    let package = config.package.trim().to_string();
    let mut exclude = vec![package.clone()];
    for name in &config.exclude {
        let name = name.trim();
        if !exclude.iter().any(|existing| existing == name) {
            exclude.push(name.to_string());
        }
    }
    Ok(DriverConfig {
        spec: config.spec.clone(),
        source_dir: config.source_dir.clone(),
        top_dir: config.top_dir.clone(),
        rpm_source_dir: config.rpm_source_dir.trim().to_string(),
        package,
        exclude,
        chroot: split_command(&config.chroot_command, "chroot_command", true)?,
        install: split_command(&config.install_command, "install_command", false)?,
        builddep: split_command(&config.builddep_command, "builddep_command", false)?,
        defines: config.defines.clone(),
        max_recoveries: config.max_recoveries,
    })
}

fn split_command(command: &str, label: &str, allow_empty: bool) -> Result<Vec<String>> {
    let argv = shell_words::split(command).with_context(|| format!("parse {label}: {command}"))?;
    if argv.is_empty() && !allow_empty {
        return Err(anyhow!("{label} must be non-empty"));
    }
    Ok(argv)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
