//! Host distribution detection from os-release.
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Distribution families whose package manager consumes RPM spec files.
const RPM_FAMILIES: &[&str] = &[
    "fedora",
    "rhel",
    "centos",
    "suse",
    "opensuse",
    "mageia",
    "openmandriva",
    "almalinux",
    "rocky",
];

/// Parsed `KEY=value` pairs from an os-release file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    fields: BTreeMap<String, String>,
}

impl OsRelease {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// `PRETTY_NAME`, falling back to `NAME` and then `ID`.
    pub fn display_name(&self) -> &str {
        self.get("PRETTY_NAME")
            .or_else(|| self.get("NAME"))
            .or_else(|| self.get("ID"))
            .unwrap_or("unknown")
    }

    /// Whether `ID` or any `ID_LIKE` entry names an RPM-based family.
    pub fn is_rpm_based(&self) -> bool {
        let mut ids = self
            .get("ID")
            .into_iter()
            .chain(self.get("ID_LIKE").into_iter().flat_map(str::split_whitespace));
        ids.any(|id| RPM_FAMILIES.contains(&id))
    }
}

/// Parse os-release text. Malformed lines are logged and skipped.
pub fn parse_os_release(text: &str, origin: &Path) -> OsRelease {
    let line_re = Regex::new(r"^([A-Z][A-Z_0-9]+)=(.*)$").expect("regex for os-release lines");
    let mut fields = BTreeMap::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(caps) = line_re.captures(line) else {
            tracing::info!(
                path = %origin.display(),
                line = index + 1,
                content = line,
                "bad os-release line"
            );
            continue;
        };
        fields.insert(caps[1].to_string(), unquote(&caps[2]));
    }
    OsRelease { fields }
}

/// Strip one level of shell-style quoting from an os-release value.
fn unquote(value: &str) -> String {
    let Some(first) = value.chars().next() else {
        return String::new();
    };
    if first != '"' && first != '\'' {
        return value.to_string();
    }
    match shell_words::split(value) {
        Ok(words) if words.len() == 1 => words.into_iter().next().unwrap_or_default(),
        _ => value.trim_matches(first).to_string(),
    }
}

/// Candidate os-release locations below `root`, in lookup order.
pub fn os_release_paths(root: &Path) -> [PathBuf; 2] {
    [
        root.join("etc/os-release"),
        root.join("usr/lib/os-release"),
    ]
}

/// Read os-release below `root`. `None` when neither file exists.
pub fn read_os_release(root: &Path) -> Result<Option<OsRelease>> {
    for path in os_release_paths(root) {
        if !path.is_file() {
            continue;
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        return Ok(Some(parse_os_release(&text, &path)));
    }
    Ok(None)
}
