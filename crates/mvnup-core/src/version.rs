//! Maven version resolution.
//!
//! The project declares the toolchain it needs as a property in its
//! `pom.xml` (`<maven.version>3.8.8</maven.version>`). This module pulls the
//! first such declaration out of the file and turns it into a comparable
//! version triple.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::path::Path;

use crate::{BootstrapError, Result};

/// Property holding the required Maven version in `pom.xml`.
pub const DEFAULT_VERSION_MARKER: &str = "maven.version";

/// Project file scanned for the version marker.
pub const PROJECT_FILE: &str = "pom.xml";

lazy_static! {
    static ref DEFAULT_MARKER_RE: Regex = marker_regex(DEFAULT_VERSION_MARKER).unwrap();
}

fn marker_regex(marker: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!(r"<{0}>\s*([^<]*?)\s*</{0}>", regex::escape(marker)))
}

/// A parsed `major.minor.patch` Maven version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MavenVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl MavenVersion {
    /// Largest component value the normalized code can hold.
    pub const MAX_COMPONENT: u32 = 999;

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse a version string like "3.8.8".
    ///
    /// Exactly three numeric components are required. Qualifiers such as
    /// `-SNAPSHOT` or `-beta-1` are rejected since no release artifact
    /// exists for them on the mirrors.
    pub fn parse(version_str: &str) -> Result<Self> {
        let version = version_str.trim();
        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() != 3 {
            return Err(BootstrapError::Config(format!(
                "Invalid Maven version '{}': expected major.minor.patch",
                version_str
            )));
        }

        let component = |part: &str, name: &str| -> Result<u32> {
            // plain decimal digits, no sign and no zero padding
            let canonical = !part.is_empty()
                && part.bytes().all(|b| b.is_ascii_digit())
                && (part == "0" || !part.starts_with('0'));
            if !canonical {
                return Err(BootstrapError::Config(format!(
                    "Invalid {} component '{}' in Maven version '{}'",
                    name, part, version_str
                )));
            }

            let value: u32 = part.parse().map_err(|_| {
                BootstrapError::Config(format!(
                    "Invalid {} component '{}' in Maven version '{}'",
                    name, part, version_str
                ))
            })?;
            if value > Self::MAX_COMPONENT {
                return Err(BootstrapError::Config(format!(
                    "{} component {} in Maven version '{}' exceeds {}",
                    name,
                    value,
                    version_str,
                    Self::MAX_COMPONENT
                )));
            }
            Ok(value)
        };

        Ok(Self {
            major: component(parts[0], "major")?,
            minor: component(parts[1], "minor")?,
            patch: component(parts[2], "patch")?,
        })
    }

    /// Fixed-width numeric code, three digits per component.
    ///
    /// `3.8.8` becomes `3_008_008`; rendered with [`Self::normalized_code`]
    /// it reads `003008008`.
    pub fn normalized(&self) -> u32 {
        self.major * 1_000_000 + self.minor * 1_000 + self.patch
    }

    /// Zero-padded form of [`Self::normalized`].
    pub fn normalized_code(&self) -> String {
        format!("{:03}{:03}{:03}", self.major, self.minor, self.patch)
    }
}

impl fmt::Display for MavenVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for MavenVersion {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Extract the first version declared under `marker` in `text`.
pub fn extract_version(text: &str, marker: &str) -> Result<MavenVersion> {
    let custom;
    let re: &Regex = if marker == DEFAULT_VERSION_MARKER {
        &DEFAULT_MARKER_RE
    } else {
        custom = marker_regex(marker).map_err(|e| {
            BootstrapError::Config(format!("Invalid version marker '{}': {}", marker, e))
        })?;
        &custom
    };

    let captures = re.captures(text).ok_or_else(|| {
        BootstrapError::Config(format!("No <{}> declaration found", marker))
    })?;

    MavenVersion::parse(&captures[1])
}

/// Read the project file in `project_dir` and extract the version under `marker`.
pub fn resolve_from_project(project_dir: &Path, marker: &str) -> Result<MavenVersion> {
    let path = project_dir.join(PROJECT_FILE);
    log::debug!("Reading {}", path.display());

    let text = std::fs::read_to_string(&path).map_err(|e| {
        BootstrapError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;

    extract_version(&text, marker).map_err(|e| match e {
        BootstrapError::Config(reason) => {
            BootstrapError::Config(format!("{} ({})", reason, path.display()))
        }
        other => other,
    })
}
