//! Resolves a usable `mvn` binary for a project.
//!
//! [`Bootstrap::run`] is the only place that makes decisions. In order it
//! tries:
//!
//! 1. the distribution already unpacked under the install root,
//! 2. an `mvn` on the search path reporting exactly the wanted version,
//! 3. a fresh download, verified and unpacked into the install root.
//!
//! The first two never touch the network.

use std::path::{Path, PathBuf};

use crate::archive::{ArchiveInstaller, TempArtifacts};
use crate::checksum::{ChecksumVerifier, Verification, CHECKSUM_SUFFIX};
use crate::config::Config;
use crate::fetch::Fetcher;
use crate::mirror::MirrorSelector;
use crate::system::{PathLookup, ToolchainLocator};
use crate::version::{resolve_from_project, MavenVersion};
use crate::Result;

/// Directory name the distribution unpacks to
pub fn distribution_name(version: &MavenVersion) -> String {
    format!("apache-maven-{}", version)
}

/// File name of the binary distribution archive
pub fn tarball_name(version: &MavenVersion) -> String {
    format!("apache-maven-{}-bin.tar.gz", version)
}

/// Location of the archive relative to a mirror's base URL
pub fn artifact_path(version: &MavenVersion) -> String {
    format!(
        "maven/maven-{}/{}/binaries/{}",
        version.major,
        version,
        tarball_name(version)
    )
}

/// `apache-maven-{version}/bin/mvn`, relative to the install root
pub fn binary_path(version: &MavenVersion) -> PathBuf {
    Path::new(&distribution_name(version)).join("bin").join("mvn")
}

/// Where the binary returned by a run came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Unpacked by an earlier run
    Installed,
    /// Found on the search path
    System,
    /// Downloaded and unpacked by this run
    Downloaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub version: MavenVersion,
    pub resolution: Resolution,
}

pub struct Bootstrap {
    config: Config,
    fetcher: Fetcher,
    locator: Box<dyn ToolchainLocator>,
    verifier: ChecksumVerifier,
}

impl Bootstrap {
    pub fn new(config: Config) -> Self {
        Self {
            fetcher: Fetcher::from_config(&config),
            locator: Box::new(PathLookup::new()),
            verifier: ChecksumVerifier::for_kind(config.digest_tool),
            config,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_locator(mut self, locator: impl ToolchainLocator + 'static) -> Self {
        self.locator = Box::new(locator);
        self
    }

    pub fn with_verifier(mut self, verifier: ChecksumVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The configured version, or the one declared by the project
    pub fn resolve_version(&self) -> Result<MavenVersion> {
        match self.config.version {
            Some(version) => Ok(version),
            None => resolve_from_project(&self.config.project_dir, &self.config.version_marker),
        }
    }

    pub fn run(&self) -> Result<Resolved> {
        let version = self.resolve_version()?;
        let binary = binary_path(&version);
        let installed = self.config.install_root.join(&binary);

        if installed.is_file() {
            log::debug!("Maven {} already installed at {}", version, installed.display());
            return Ok(Resolved {
                path: installed,
                version,
                resolution: Resolution::Installed,
            });
        }

        if self.config.force {
            log::debug!("Skipping search path lookup");
        } else if let Some(system) = self.locator.locate() {
            if system.version == version {
                log::info!("Using Maven {} from {}", version, system.path.display());
                return Ok(Resolved {
                    path: system.path,
                    version,
                    resolution: Resolution::System,
                });
            }
            log::debug!(
                "Ignoring Maven {} at {}, project wants {}",
                system.version,
                system.path.display(),
                version
            );
        }

        let path = self.download(&version, &binary)?;
        Ok(Resolved {
            path,
            version,
            resolution: Resolution::Downloaded,
        })
    }

    fn download(&self, version: &MavenVersion, binary: &Path) -> Result<PathBuf> {
        let root = &self.config.install_root;
        std::fs::create_dir_all(root)?;

        let dest = root.join(tarball_name(version));
        let _cleanup = TempArtifacts::for_tarball(&dest);

        let path = artifact_path(version);
        let mirror = MirrorSelector::new(self.fetcher.probe_transport())
            .with_archive(self.config.archive_mirror.as_deref())
            .select(&path, self.config.mirror.as_deref());

        log::info!("Downloading Maven {} from {}", version, mirror);
        let tarball = self.fetcher.fetch_tarball(
            &mirror.url_for(&path),
            &dest,
            Some(&mirror.sidecar_url_for(&path, CHECKSUM_SUFFIX)),
        )?;

        let verification = self.verifier.verify(&tarball.path, tarball.checksum.as_ref())?;
        if verification == Verification::Verified {
            log::debug!("Checksum of {} verified", dest.display());
        }

        ArchiveInstaller::new(root).install(tarball, binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::SystemMaven;
    use crate::transport::{Progress, Transport};
    use crate::BootstrapError;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct FixedLocator(Option<SystemMaven>);

    impl ToolchainLocator for FixedLocator {
        fn locate(&self) -> Option<SystemMaven> {
            self.0.clone()
        }
    }

    /// Counts every network operation and fails all of them
    struct OfflineTransport {
        calls: Rc<Cell<usize>>,
    }

    impl Transport for OfflineTransport {
        fn name(&self) -> &str {
            "offline"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn probe(&self, _url: &str) -> bool {
            self.calls.set(self.calls.get() + 1);
            false
        }

        fn fetch(
            &self,
            url: &str,
            _dest: &Path,
            _retries: u32,
            _progress: Option<Progress<'_>>,
        ) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            Err(BootstrapError::Network {
                url: url.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn offline(config: Config) -> (Bootstrap, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let fetcher = Fetcher::new(
            vec![Box::new(OfflineTransport {
                calls: Rc::clone(&calls),
            })],
            0,
        );
        let bootstrap = Bootstrap::new(config)
            .with_fetcher(fetcher)
            .with_locator(FixedLocator(None));
        (bootstrap, calls)
    }

    #[test]
    fn test_paths() {
        let v = MavenVersion::new(3, 8, 8);
        assert_eq!(distribution_name(&v), "apache-maven-3.8.8");
        assert_eq!(tarball_name(&v), "apache-maven-3.8.8-bin.tar.gz");
        assert_eq!(
            artifact_path(&v),
            "maven/maven-3/3.8.8/binaries/apache-maven-3.8.8-bin.tar.gz"
        );
        assert_eq!(binary_path(&v), Path::new("apache-maven-3.8.8/bin/mvn"));
    }

    #[test]
    fn test_version_from_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("pom.xml"),
            "<project><properties><maven.version>3.9.6</maven.version></properties></project>",
        )
        .unwrap();

        let (bootstrap, _) = offline(Config::new(dir.path()));
        assert_eq!(bootstrap.resolve_version().unwrap(), MavenVersion::new(3, 9, 6));
    }

    #[test]
    fn test_configured_version_wins() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path()).with_version(MavenVersion::new(3, 6, 3));

        let (bootstrap, _) = offline(config);
        assert_eq!(bootstrap.resolve_version().unwrap(), MavenVersion::new(3, 6, 3));
    }

    #[test]
    fn test_installed_binary_skips_network() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path()).with_version(MavenVersion::new(3, 8, 8));
        let bin = dir.path().join("build/apache-maven-3.8.8/bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("mvn"), "#!/bin/sh\n").unwrap();

        let (bootstrap, calls) = offline(config);
        let resolved = bootstrap.run().unwrap();

        assert_eq!(resolved.resolution, Resolution::Installed);
        assert_eq!(resolved.path, bin.join("mvn"));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_system_maven_with_matching_version() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path()).with_version(MavenVersion::new(3, 8, 8));
        let system = SystemMaven {
            path: PathBuf::from("/usr/bin/mvn"),
            version: MavenVersion::new(3, 8, 8),
        };

        let (bootstrap, calls) = offline(config);
        let resolved = bootstrap
            .with_locator(FixedLocator(Some(system)))
            .run()
            .unwrap();

        assert_eq!(resolved.resolution, Resolution::System);
        assert_eq!(resolved.path, PathBuf::from("/usr/bin/mvn"));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_system_maven_with_other_version_is_ignored() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path()).with_version(MavenVersion::new(3, 8, 8));
        let system = SystemMaven {
            path: PathBuf::from("/usr/bin/mvn"),
            version: MavenVersion::new(3, 9, 6),
        };

        let (bootstrap, calls) = offline(config);
        let err = bootstrap
            .with_locator(FixedLocator(Some(system)))
            .run()
            .unwrap_err();

        assert!(matches!(err, BootstrapError::Network { .. }));
        assert!(calls.get() > 0);
    }

    #[test]
    fn test_force_skips_system_maven() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path())
            .with_version(MavenVersion::new(3, 8, 8))
            .with_force(true);
        let system = SystemMaven {
            path: PathBuf::from("/usr/bin/mvn"),
            version: MavenVersion::new(3, 8, 8),
        };

        let (bootstrap, _) = offline(config);
        let err = bootstrap
            .with_locator(FixedLocator(Some(system)))
            .run()
            .unwrap_err();

        assert_eq!(err.exit_code(), crate::error::EXIT_UNAVAILABLE);
    }

    #[test]
    fn test_failed_download_leaves_no_artifacts() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path()).with_version(MavenVersion::new(3, 8, 8));

        let (bootstrap, _) = offline(config);
        assert!(bootstrap.run().is_err());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("build"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_missing_project_file() {
        let dir = TempDir::new().unwrap();
        let (bootstrap, calls) = offline(Config::new(dir.path()));

        let err = bootstrap.run().unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert_eq!(calls.get(), 0);
    }
}
