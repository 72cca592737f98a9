//! Maven already installed on the host.

use lazy_static::lazy_static;
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::version::MavenVersion;

lazy_static! {
    static ref MVN_VERSION_RE: Regex = Regex::new(r"Apache Maven (\d+\.\d+\.\d+)").unwrap();
}

/// A Maven found outside the install root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMaven {
    pub path: PathBuf,
    pub version: MavenVersion,
}

/// Finds a Maven the host already provides
pub trait ToolchainLocator {
    fn locate(&self) -> Option<SystemMaven>;
}

/// Parse the first line of `mvn -v` output
pub fn parse_version_output(output: &str) -> Option<MavenVersion> {
    let captures = MVN_VERSION_RE.captures(output)?;
    MavenVersion::parse(&captures[1]).ok()
}

/// Looks up `mvn` on the search path and asks it for its version
pub struct PathLookup {
    binary: String,
    search_path: Option<OsString>,
}

impl PathLookup {
    pub fn new() -> Self {
        Self {
            binary: "mvn".to_string(),
            search_path: None,
        }
    }

    /// Search these directories instead of `PATH`
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn candidates(&self) -> Vec<String> {
        if cfg!(windows) {
            vec![format!("{}.cmd", self.binary), format!("{}.exe", self.binary)]
        } else {
            vec![self.binary.clone()]
        }
    }

    /// First matching executable on the search path
    pub fn find_binary(&self) -> Option<PathBuf> {
        let search_path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))?;

        let candidates = self.candidates();
        std::env::split_paths(&search_path)
            .flat_map(|dir| candidates.iter().map(move |name| dir.join(name)))
            .find(|path| is_executable(path))
    }
}

impl Default for PathLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolchainLocator for PathLookup {
    fn locate(&self) -> Option<SystemMaven> {
        let path = self.find_binary()?;
        log::debug!("Found {} on PATH", path.display());

        let output = match Command::new(&path)
            .arg("-v")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                log::debug!("Failed to run {} -v: {}", path.display(), e);
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = parse_version_output(&stdout)?;
        log::debug!("{} reports Maven {}", path.display(), version);

        Some(SystemMaven { path, version })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
