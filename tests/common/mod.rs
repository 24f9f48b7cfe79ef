//! Shared test infrastructure for integration tests.
//!
//! Builds a throwaway toolchain of mock `rpmspec`, `dnf` and `rpmbuild`
//! scripts that log their argv and replay scripted exit codes.

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const RPMSPEC_SCRIPT: &str = r#"#!/bin/sh
echo "rpmspec $*" >> "$MOCK_DIR/calls.log"
case " $* " in
    *" --buildrequires "*) cat "$MOCK_DIR/buildrequires.txt" 2>/dev/null ;;
    *) cat "$MOCK_DIR/requires.txt" 2>/dev/null ;;
esac
exit "${MOCK_QUERY_EXIT:-0}"
"#;

const DNF_SCRIPT: &str = r#"#!/bin/sh
echo "dnf $*" >> "$MOCK_DIR/calls.log"
exit "${MOCK_DNF_EXIT:-0}"
"#;

const RPMBUILD_SCRIPT: &str = r#"#!/bin/sh
echo "rpmbuild $*" >> "$MOCK_DIR/calls.log"
n=$(cat "$MOCK_DIR/build_count" 2>/dev/null || echo 0)
n=$((n + 1))
echo "$n" > "$MOCK_DIR/build_count"
code=$(sed -n "${n}p" "$MOCK_DIR/build_codes.txt" 2>/dev/null)
code=${code:-0}
if [ "$code" = "11" ]; then
    mkdir -p "$MOCK_TOPDIR/SRPMS"
    : > "$MOCK_TOPDIR/SRPMS/mkosi-$n-1.buildreqs.nosrc.rpm"
fi
exit "$code"
"#;

/// Isolated mock toolchain plus source and top directories.
pub struct MockTools {
    temp: TempDir,
    env: Vec<(String, String)>,
    srcdir_flag: bool,
}

impl MockTools {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let tools = Self {
            temp,
            env: Vec::new(),
            srcdir_flag: true,
        };
        fs::create_dir_all(tools.bin_dir()).expect("create bin dir");
        fs::create_dir_all(tools.src_dir()).expect("create src dir");
        fs::create_dir_all(tools.top_dir()).expect("create top dir");
        write_script(&tools.bin_dir().join("rpmspec"), RPMSPEC_SCRIPT);
        write_script(&tools.bin_dir().join("dnf"), DNF_SCRIPT);
        write_script(&tools.bin_dir().join("rpmbuild"), RPMBUILD_SCRIPT);
        tools
    }

    /// True when the mock scripts can run on this host.
    pub fn available() -> bool {
        Command::new("sh").arg("-c").arg("exit 0").status().is_ok()
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    fn bin_dir(&self) -> PathBuf {
        self.root().join("bin")
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root().join("src")
    }

    pub fn top_dir(&self) -> PathBuf {
        self.root().join("top")
    }

    pub fn srpm_dir(&self) -> PathBuf {
        self.top_dir().join("SRPMS")
    }

    pub fn with_requires(self, text: &str) -> Self {
        fs::write(self.root().join("requires.txt"), text).expect("write requires");
        self
    }

    pub fn with_buildrequires(self, text: &str) -> Self {
        fs::write(self.root().join("buildrequires.txt"), text).expect("write buildrequires");
        self
    }

    /// Exit codes for successive rpmbuild runs; runs past the list exit 0.
    pub fn with_build_codes(self, codes: &[i32]) -> Self {
        let text: String = codes.iter().map(|code| format!("{code}\n")).collect();
        fs::write(self.root().join("build_codes.txt"), text).expect("write build codes");
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Leave `--srcdir` off the command line so env and config decide.
    pub fn without_srcdir_flag(mut self) -> Self {
        self.srcdir_flag = false;
        self
    }

    /// Logged invocations, one line per command.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.root().join("calls.log"))
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Run `rpm-prepare` with the mock tools first on `PATH`.
    pub fn run(&self, args: &[&str]) -> Output {
        let path_var = env::var_os("PATH").unwrap_or_default();
        let mut paths = vec![self.bin_dir()];
        paths.extend(env::split_paths(&path_var));
        let path = env::join_paths(paths).expect("join PATH");

        let mut command = Command::new(env!("CARGO_BIN_EXE_rpm-prepare"));
        command
            .args(args)
            .arg("--chroot-command")
            .arg("")
            .arg("--topdir")
            .arg(self.top_dir())
            .env_remove("RPM_PREPARE_CONFIG")
            .env_remove("SRCDIR")
            .env_remove("RUST_LOG")
            .env("PATH", path)
            .env("MOCK_DIR", self.root())
            .env("MOCK_TOPDIR", self.top_dir());
        if self.srcdir_flag {
            command.arg("--srcdir").arg(self.src_dir());
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command.output().expect("run rpm-prepare")
    }
}

fn write_script(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write script");
    let mut perms = fs::metadata(path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod script");
}
