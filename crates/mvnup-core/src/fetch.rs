//! Artifact retrieval.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use crate::checksum::{sidecar_path, Checksum};
use crate::config::Config;
use crate::transport::{CurlTransport, HttpTransport, Transport};
use crate::{BootstrapError, Result};

/// A downloaded distribution archive and, when one was fetched, its checksum
#[derive(Debug, Clone)]
pub struct Tarball {
    pub url: String,
    pub path: PathBuf,
    pub checksum: Option<Checksum>,
}

impl Tarball {
    /// Local path of the descriptor sidecar
    pub fn sidecar(&self) -> PathBuf {
        sidecar_path(&self.path)
    }
}

/// Downloads artifacts with the first available [`Transport`]
pub struct Fetcher {
    transports: Vec<Box<dyn Transport>>,
    retries: u32,
    require_checksum: bool,
    progress: Option<Box<dyn Fn(u64, u64)>>,
    // availability is checked at most once per transport, on first use
    preferred: OnceCell<Option<usize>>,
    backup: OnceCell<Option<usize>>,
}

impl Fetcher {
    /// `transports` in order of preference
    pub fn new(transports: Vec<Box<dyn Transport>>, retries: u32) -> Self {
        Self {
            transports,
            retries,
            require_checksum: false,
            progress: None,
            preferred: OnceCell::new(),
            backup: OnceCell::new(),
        }
    }

    /// In-process HTTP first, host `curl` second
    pub fn from_config(config: &Config) -> Self {
        let mut transports: Vec<Box<dyn Transport>> = Vec::new();

        match HttpTransport::new(&config.http) {
            Ok(http) => transports.push(Box::new(http)),
            Err(e) => log::warn!("HTTP transport unavailable: {}", e),
        }
        transports.push(Box::new(CurlTransport::new()));

        Self::new(transports, config.http.max_retries).with_require_checksum(config.require_checksum)
    }

    pub fn with_require_checksum(mut self, require: bool) -> Self {
        self.require_checksum = require;
        self
    }

    /// Report `(downloaded, total)` while the archive transfers
    pub fn with_progress(mut self, progress: impl Fn(u64, u64) + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    fn find_available(&self, start: usize) -> Option<usize> {
        (start..self.transports.len()).find(|&i| self.transports[i].is_available())
    }

    fn preferred(&self) -> Option<&dyn Transport> {
        let index = *self.preferred.get_or_init(|| self.find_available(0));
        index.map(|i| self.transports[i].as_ref())
    }

    /// Next available transport after the preferred one
    fn backup(&self) -> Option<&dyn Transport> {
        let index = *self.backup.get_or_init(|| {
            let start = (*self.preferred.get_or_init(|| self.find_available(0)))?;
            self.find_available(start + 1)
        });
        index.map(|i| self.transports[i].as_ref())
    }

    /// Transport used for mirror probes
    pub fn probe_transport(&self) -> Option<&dyn Transport> {
        self.preferred()
    }

    /// Download `url` to `dest` unless `dest` already exists.
    ///
    /// The preferred transport gets the configured retries; if it fails, the
    /// next available one gets a single attempt.
    pub fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        self.fetch_with(url, dest, self.progress.as_deref())
    }

    fn fetch_with(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<()> {
        if dest.exists() {
            log::debug!("{} already present, skipping download", dest.display());
            return Ok(());
        }

        let Some(first) = self.preferred() else {
            return Err(BootstrapError::download(url, "no download transport available"));
        };

        log::debug!("Fetching {} with {}", url, first.name());
        let mut result = first.fetch(url, dest, self.retries, progress);

        if let Err(e) = &result {
            if let Some(second) = self.backup() {
                log::warn!("{} failed ({}), trying {}", first.name(), e, second.name());
                result = second.fetch(url, dest, 0, progress);
            }
        }
        result?;

        if !dest.is_file() {
            return Err(BootstrapError::download(
                url,
                format!("{} was not created", dest.display()),
            ));
        }

        Ok(())
    }

    /// Download an archive and, optionally, its checksum descriptor.
    ///
    /// A descriptor left over from an earlier run is discarded first; only
    /// one fetched now is trusted. A missing descriptor is tolerated unless
    /// checksums are required.
    pub fn fetch_tarball(
        &self,
        url: &str,
        dest: &Path,
        checksum_url: Option<&str>,
    ) -> Result<Tarball> {
        self.fetch(url, dest)?;

        let mut tarball = Tarball {
            url: url.to_string(),
            path: dest.to_path_buf(),
            checksum: None,
        };

        let Some(checksum_url) = checksum_url else {
            return Ok(tarball);
        };

        let sidecar = tarball.sidecar();
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }

        match self.fetch_with(checksum_url, &sidecar, None) {
            Ok(()) => {
                tarball.checksum = Some(Checksum::from_file(&sidecar, dest)?);
            }
            Err(e) if self.require_checksum => return Err(e),
            Err(e) => {
                log::debug!("No checksum descriptor for {}: {}", url, e);
            }
        }

        Ok(tarball)
    }
}
