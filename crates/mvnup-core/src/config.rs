//! Configuration for a bootstrap run.
//!
//! A [`Config`] is assembled once per invocation and then only read. Values
//! are merged in priority order (highest first):
//!
//! 1. Explicit overrides set by the caller (command line)
//! 2. Environment variables (`APACHE_MIRROR`, `MVNUP_INSTALL_ROOT`)
//! 3. `mvnup.toml`, searched upward from the project directory
//! 4. Built-in defaults
//!
//! # Example
//!
//! ```rust,no_run
//! use mvnup_core::config::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::new(true).build(Path::new("/path/to/project")).unwrap();
//! println!("Install root: {}", config.install_root.display());
//! ```

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checksum::DigestToolKind;
use crate::transport::HttpClientConfig;
use crate::version::{MavenVersion, DEFAULT_VERSION_MARKER};
use crate::{BootstrapError, Result};

/// Name of the optional configuration file.
pub const CONFIG_FILE: &str = "mvnup.toml";

/// Install root used when nothing else is configured, relative to the project.
pub const DEFAULT_INSTALL_DIR: &str = "build";

/// Environment variable overriding the primary mirror.
pub const ENV_MIRROR: &str = "APACHE_MIRROR";

/// Environment variable overriding the install root.
pub const ENV_INSTALL_ROOT: &str = "MVNUP_INSTALL_ROOT";

/// Contents of `mvnup.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileConfig {
    /// Pin the Maven version instead of reading it from `pom.xml`
    pub version: Option<String>,

    /// Property name holding the version in `pom.xml`
    pub version_marker: Option<String>,

    /// Primary mirror base URL
    pub mirror: Option<String>,

    /// Base URL used once the primary mirror is given up on
    pub archive_mirror: Option<String>,

    /// Directory receiving the unpacked distribution
    pub install_root: Option<PathBuf>,

    /// Fail when the checksum descriptor cannot be fetched
    pub require_checksum: Option<bool>,

    /// Never use a Maven found on PATH
    pub force: Option<bool>,

    /// `native` or `sha512sum`
    pub digest_tool: Option<DigestToolKind>,

    /// HTTP transport settings
    pub http: HttpFileConfig,
}

/// `[http]` table of `mvnup.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HttpFileConfig {
    /// Request timeout in seconds
    pub timeout: Option<u64>,

    /// Connect timeout in seconds
    pub connect_timeout: Option<u64>,

    pub max_retries: Option<u32>,

    pub user_agent: Option<String>,

    pub proxy: Option<String>,
}

impl FileConfig {
    /// Load `mvnup.toml`, searching upward from the given directory.
    ///
    /// Returns the parsed file together with the directory it was found in.
    pub fn load(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE);

            if config_path.is_file() {
                let content = std::fs::read_to_string(&config_path)?;
                let config: FileConfig =
                    toml::from_str(&content).map_err(|e| BootstrapError::ConfigFile {
                        path: config_path.clone(),
                        reason: e.to_string(),
                    })?;
                log::debug!("Loaded {}", config_path.display());
                return Ok(Some((config, current)));
            }

            if !current.pop() {
                return Ok(None);
            }
        }
    }
}

/// Immutable context threaded through every stage of a run
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing `pom.xml`; the delegated tool runs here
    pub project_dir: PathBuf,

    /// Directory receiving `apache-maven-{version}/`
    pub install_root: PathBuf,

    /// Explicit version, bypassing the project file
    pub version: Option<MavenVersion>,

    /// Property name holding the version in `pom.xml`
    pub version_marker: String,

    /// Primary mirror override
    pub mirror: Option<String>,

    /// Fallback mirror override
    pub archive_mirror: Option<String>,

    pub require_checksum: bool,

    /// Skip the PATH lookup for an existing Maven
    pub force: bool,

    pub digest_tool: DigestToolKind,

    pub http: HttpClientConfig,
}

impl Config {
    /// Defaults for a project directory, without reading any file or variable.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        Self {
            install_root: project_dir.join(DEFAULT_INSTALL_DIR),
            project_dir,
            version: None,
            version_marker: DEFAULT_VERSION_MARKER.to_string(),
            mirror: None,
            archive_mirror: None,
            require_checksum: false,
            force: false,
            digest_tool: DigestToolKind::default(),
            http: HttpClientConfig::default(),
        }
    }

    pub fn with_install_root(mut self, install_root: impl Into<PathBuf>) -> Self {
        self.install_root = install_root.into();
        self
    }

    pub fn with_version(mut self, version: MavenVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.mirror = Some(mirror.into());
        self
    }

    pub fn with_archive_mirror(mut self, archive_mirror: impl Into<String>) -> Self {
        self.archive_mirror = Some(archive_mirror.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_require_checksum(mut self, require: bool) -> Self {
        self.require_checksum = require;
        self
    }

    pub fn with_http(mut self, http: HttpClientConfig) -> Self {
        self.http = http;
        self
    }

    /// Merge values from a parsed `mvnup.toml` located in `file_dir`.
    ///
    /// Relative paths in the file are resolved against `file_dir`.
    pub fn merge_file(&mut self, file: FileConfig, file_dir: &Path) -> Result<()> {
        if let Some(version) = file.version {
            self.version = Some(MavenVersion::parse(&version)?);
        }
        if let Some(marker) = file.version_marker {
            self.version_marker = marker;
        }
        if let Some(mirror) = file.mirror {
            self.mirror = Some(mirror);
        }
        if let Some(archive) = file.archive_mirror {
            self.archive_mirror = Some(archive);
        }
        if let Some(root) = file.install_root {
            self.install_root = if root.is_absolute() {
                root
            } else {
                file_dir.join(root)
            };
        }
        if let Some(require) = file.require_checksum {
            self.require_checksum = require;
        }
        if let Some(force) = file.force {
            self.force = force;
        }
        if let Some(tool) = file.digest_tool {
            self.digest_tool = tool;
        }

        let http = file.http;
        if let Some(secs) = http.timeout {
            self.http.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = http.connect_timeout {
            self.http.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = http.max_retries {
            self.http.max_retries = retries;
        }
        if let Some(agent) = http.user_agent {
            self.http.user_agent = agent;
        }
        if let Some(proxy) = http.proxy {
            self.http.proxy = Some(proxy);
        }

        Ok(())
    }
}

/// Builds a [`Config`] from the file and environment layers
#[derive(Debug)]
pub struct ConfigLoader {
    use_environment: bool,
}

impl ConfigLoader {
    pub fn new(use_environment: bool) -> Self {
        Self { use_environment }
    }

    /// Read an environment variable, treating empty values as unset
    pub fn get_env(&self, var: &str) -> Option<String> {
        if !self.use_environment {
            return None;
        }

        env::var(var).ok().filter(|s| !s.is_empty())
    }

    /// Build the configuration for a project directory
    pub fn build(&self, project_dir: &Path) -> Result<Config> {
        let mut config = Config::new(project_dir);

        if let Some((file, file_dir)) = FileConfig::load(project_dir)? {
            config.merge_file(file, &file_dir)?;
        }

        if let Some(mirror) = self.get_env(ENV_MIRROR) {
            log::debug!("Mirror override from {}: {}", ENV_MIRROR, mirror);
            config.mirror = Some(mirror);
        }
        if let Some(root) = self.get_env(ENV_INSTALL_ROOT) {
            config.install_root = PathBuf::from(root);
        }

        Ok(config)
    }
}
