//! Build phase selection.
//!
//! mkosi runs prepare scripts twice: once for the build image and once for the
//! final image. Only the build phase compiles the source RPM.
use std::fmt;

/// Phase argument that selects the build-time dependency class.
pub const BUILD_PHASE_ARG: &str = "build";

/// Which dependency class to resolve and whether to run the build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Resolve `BuildRequires` and build the source RPM.
    Build,
    /// Resolve `Requires` only.
    Final,
}

impl Phase {
    /// Map the positional argument to a phase. Anything other than `build`,
    /// including no argument at all, is the final phase.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            Some(BUILD_PHASE_ARG) => Phase::Build,
            _ => Phase::Final,
        }
    }

    /// `rpmspec -q` flag selecting the dependency class for this phase.
    pub fn query_flag(self) -> &'static str {
        match self {
            Phase::Build => "--buildrequires",
            Phase::Final => "--requires",
        }
    }

    pub fn runs_build(self) -> bool {
        matches!(self, Phase::Build)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Build => write!(f, "build"),
            Phase::Final => write!(f, "final"),
        }
    }
}
