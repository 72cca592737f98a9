//! Distribution extraction and install-root housekeeping.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::fetch::Tarball;
use crate::transport::partial_path;
use crate::{BootstrapError, Result};

/// Supported archive types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    TarGz,
    Zip,
}

impl ArchiveType {
    /// Detect archive type from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let path_str = path.to_string_lossy().to_lowercase();

        if path_str.ends_with(".tar.gz") || path_str.ends_with(".tgz") {
            Some(ArchiveType::TarGz)
        } else if path_str.ends_with(".zip") {
            Some(ArchiveType::Zip)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveType::TarGz => "tar.gz",
            ArchiveType::Zip => "zip",
        }
    }
}

/// Removes the listed files when dropped.
///
/// Downloaded archives and their descriptors must not outlive the run that
/// fetched them, whether it succeeds or not.
#[derive(Debug, Default)]
pub struct TempArtifacts {
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a tarball, its descriptor sidecar and their in-flight `.part` files
    pub fn for_tarball(path: &Path) -> Self {
        let sidecar = crate::checksum::sidecar_path(path);
        let mut guard = Self::new();
        guard.track(partial_path(path));
        guard.track(partial_path(&sidecar));
        guard.track(path.to_path_buf());
        guard.track(sidecar);
        guard
    }

    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => log::debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Archive extractor
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Extract an archive into the specified directory
    pub fn extract(archive_path: &Path, dest_dir: &Path) -> Result<()> {
        let archive_type = ArchiveType::from_path(archive_path).ok_or_else(|| {
            BootstrapError::extraction(archive_path, "unknown archive type")
        })?;

        fs::create_dir_all(dest_dir)?;

        match archive_type {
            ArchiveType::TarGz => {
                let file = File::open(archive_path)?;
                let decoder = GzDecoder::new(BufReader::new(file));
                Self::extract_tar_reader(decoder, archive_path, dest_dir)
            }
            ArchiveType::Zip => Self::extract_zip(archive_path, dest_dir),
        }
    }

    /// Resolve `relative` under `dest_dir`, refusing anything that escapes it
    fn safe_join(archive_path: &Path, dest_dir: &Path, relative: &Path) -> Result<PathBuf> {
        use std::path::Component;

        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(BootstrapError::extraction(
                        archive_path,
                        format!("path traversal detected: {}", relative.display()),
                    ))
                }
            }
        }

        Ok(dest_dir.join(relative))
    }

    /// Fail unless `outpath` resolves inside `dest_canonical`.
    ///
    /// The nearest existing ancestor is resolved, so a symlink created by an
    /// earlier entry cannot redirect later writes out of the destination.
    fn ensure_contained(archive_path: &Path, dest_canonical: &Path, outpath: &Path) -> Result<()> {
        let mut existing = outpath;
        while fs::symlink_metadata(existing).is_err() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }

        let escapes = match existing.canonicalize() {
            Ok(resolved) => !resolved.starts_with(dest_canonical),
            // dangling symlink
            Err(_) => true,
        };
        if escapes {
            return Err(BootstrapError::extraction(
                archive_path,
                format!(
                    "path traversal detected: {} escapes destination directory",
                    outpath.display()
                ),
            ));
        }

        Ok(())
    }

    /// Fail unless a link entry's target stays inside the archive root.
    ///
    /// Symlink targets are relative to the entry's directory, hard link
    /// targets to the archive root.
    fn check_link_target(
        archive_path: &Path,
        entry_path: &Path,
        target: &Path,
        hard_link: bool,
    ) -> Result<()> {
        use std::path::Component;

        let mut depth = if hard_link {
            0
        } else {
            entry_path
                .parent()
                .map(|p| p.components().filter(|c| matches!(c, Component::Normal(_))).count())
                .unwrap_or(0)
        };

        for component in target.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir if depth > 0 => depth -= 1,
                _ => {
                    return Err(BootstrapError::extraction(
                        archive_path,
                        format!(
                            "link {} -> {} points outside the archive",
                            entry_path.display(),
                            target.display()
                        ),
                    ))
                }
            }
        }

        Ok(())
    }

    fn extract_tar_reader<R: Read>(reader: R, archive_path: &Path, dest_dir: &Path) -> Result<()> {
        let mut archive = tar::Archive::new(reader);
        let err = |e: std::io::Error| BootstrapError::extraction(archive_path, e);
        let dest_canonical = dest_dir.canonicalize()?;

        let mut extracted = 0usize;
        for entry in archive.entries().map_err(err)? {
            let mut entry = entry.map_err(err)?;
            let path = entry.path().map_err(err)?.into_owned();
            if path.as_os_str().is_empty() {
                continue;
            }

            let outpath = Self::safe_join(archive_path, dest_dir, &path)?;
            Self::ensure_contained(archive_path, &dest_canonical, &outpath)?;

            let entry_type = entry.header().entry_type();
            if entry_type.is_symlink() || entry_type.is_hard_link() {
                let target = entry.link_name().map_err(err)?.ok_or_else(|| {
                    BootstrapError::extraction(
                        archive_path,
                        format!("link {} has no target", path.display()),
                    )
                })?;
                Self::check_link_target(archive_path, &path, &target, entry_type.is_hard_link())?;
            }

            if !entry.unpack_in(dest_dir).map_err(err)? {
                return Err(BootstrapError::extraction(
                    archive_path,
                    format!("path traversal detected: {}", path.display()),
                ));
            }
            extracted += 1;
        }

        if extracted == 0 {
            return Err(BootstrapError::extraction(archive_path, "archive is empty"));
        }

        Ok(())
    }

    fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
        let dest_canonical = dest_dir.canonicalize()?;
        let file = File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(BufReader::new(file))
            .map_err(|e| BootstrapError::extraction(archive_path, e))?;

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| BootstrapError::extraction(archive_path, e))?;

            let relative = file.enclosed_name().ok_or_else(|| {
                BootstrapError::extraction(
                    archive_path,
                    format!("path traversal detected: {}", file.name()),
                )
            })?;
            let outpath = Self::safe_join(archive_path, dest_dir, &relative)?;
            Self::ensure_contained(archive_path, &dest_canonical, &outpath)?;

            if file.is_dir() {
                fs::create_dir_all(&outpath)?;
                continue;
            }

            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut file, &mut outfile)
                .map_err(|e| BootstrapError::extraction(archive_path, e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = file.unix_mode() {
                    fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))?;
                }
            }
        }

        Ok(())
    }
}

/// Unpacks a verified distribution into the install root
pub struct ArchiveInstaller {
    install_root: PathBuf,
}

impl ArchiveInstaller {
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
        }
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Extract `tarball` and return `{install_root}/{binary}`.
    ///
    /// The archive is unpacked into a staging directory first and its
    /// top-level entries are moved into the install root only once
    /// extraction completed, so a malformed archive leaves nothing behind.
    /// The tarball and its descriptor are removed in every case.
    pub fn install(&self, tarball: Tarball, binary: &Path) -> Result<PathBuf> {
        let _cleanup = TempArtifacts::for_tarball(&tarball.path);

        fs::create_dir_all(&self.install_root)?;
        let staging = tempfile::Builder::new()
            .prefix(".mvnup-extract-")
            .tempdir_in(&self.install_root)?;

        log::debug!(
            "Extracting {} into {}",
            tarball.path.display(),
            self.install_root.display()
        );
        ArchiveExtractor::extract(&tarball.path, staging.path())?;

        if !staging.path().join(binary).is_file() {
            return Err(BootstrapError::extraction(
                &tarball.path,
                format!("archive does not contain {}", binary.display()),
            ));
        }

        for entry in fs::read_dir(staging.path())? {
            let entry = entry?;
            let target = self.install_root.join(entry.file_name());
            if target.is_dir() {
                fs::remove_dir_all(&target)?;
            } else if target.exists() {
                fs::remove_file(&target)?;
            }
            fs::rename(entry.path(), &target)?;
        }

        Ok(self.install_root.join(binary))
    }
}
