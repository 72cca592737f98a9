//! Checksum verification for downloaded distributions.
//!
//! Apache publishes a `.sha512` descriptor next to every release artifact.
//! The descriptor is paired with the local file name in the
//! `digest  filename` form that `sha512sum -c` reads, and the digest is
//! checked by the first available [`DigestTool`].

use serde::Deserialize;
use sha2::{Digest, Sha512};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::{BootstrapError, Result};

/// Suffix of the checksum descriptor resource and sidecar file
pub const CHECKSUM_SUFFIX: &str = "sha512";

/// Hex length of a SHA-512 digest
const SHA512_HEX_LEN: usize = 128;

/// An expected digest for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    digest: String,
    filename: String,
}

impl Checksum {
    pub fn new(digest: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            digest: digest.into().to_ascii_lowercase(),
            filename: filename.into(),
        }
    }

    /// Parse a descriptor's text for the file named `filename`.
    ///
    /// Accepted forms:
    /// - `<hex>`
    /// - `<hex>  <name>` or `<hex> *<name>` (coreutils)
    /// - `<name>: <hex in space separated groups>` (older gpg style)
    pub fn parse(descriptor: &str, filename: &str) -> Option<Self> {
        let text = descriptor.trim();

        let first = text.split_whitespace().next()?;
        let candidate = if is_hex(first) {
            first.to_string()
        } else {
            let (_, rest) = text.split_once(':')?;
            rest.split_whitespace().collect::<String>()
        };

        if candidate.len() == SHA512_HEX_LEN && is_hex(&candidate) {
            Some(Self::new(candidate, filename))
        } else {
            None
        }
    }

    /// Read a descriptor file describing `subject`
    pub fn from_file(path: &Path, subject: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let filename = file_name(subject);

        Self::parse(&text, &filename).ok_or_else(|| {
            BootstrapError::integrity(path, "checksum descriptor is not a SHA-512 digest")
        })
    }

    pub fn algorithm(&self) -> &'static str {
        CHECKSUM_SUFFIX
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// `digest  filename`, the line `sha512sum -c` expects
    pub fn pairing(&self) -> String {
        format!("{}  {}", self.digest, self.filename)
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Path of the descriptor sidecar for a tarball
pub fn sidecar_path(tarball: &Path) -> PathBuf {
    let mut name = tarball.as_os_str().to_os_string();
    name.push(".");
    name.push(CHECKSUM_SUFFIX);
    PathBuf::from(name)
}

/// Compute the SHA-512 of a file as lowercase hex
pub fn compute_sha512(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha512::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Something able to check a file against a [`Checksum`]
pub trait DigestTool {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    /// Fails with [`BootstrapError::Integrity`] on mismatch
    fn verify(&self, path: &Path, checksum: &Checksum) -> Result<()>;
}

/// In-process SHA-512
pub struct NativeSha512;

impl DigestTool for NativeSha512 {
    fn name(&self) -> &str {
        "sha2"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn verify(&self, path: &Path, checksum: &Checksum) -> Result<()> {
        if checksum.filename() != file_name(path) {
            return Err(BootstrapError::integrity(
                path,
                format!("checksum describes '{}'", checksum.filename()),
            ));
        }

        let expected = checksum.digest();
        let actual = compute_sha512(path)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(BootstrapError::integrity(
                path,
                format!("expected {}, got {}", expected, actual),
            ));
        }

        Ok(())
    }
}

/// The host's `sha512sum -c`, run in the file's directory
pub struct Sha512SumCommand {
    program: PathBuf,
}

impl Sha512SumCommand {
    pub fn new() -> Self {
        Self::with_program("sha512sum")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Sha512SumCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl DigestTool for Sha512SumCommand {
    fn name(&self) -> &str {
        "sha512sum"
    }

    fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn verify(&self, path: &Path, checksum: &Checksum) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut child = Command::new(&self.program)
            .args(["--check", "--quiet", "-"])
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            writeln!(stdin, "{}", checksum.pairing())?;
        }

        let output = child.wait_with_output()?;
        if output.status.success() {
            Ok(())
        } else {
            let mut detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if detail.is_empty() {
                detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            }
            Err(BootstrapError::integrity(
                path,
                format!("{} reported: {}", self.name(), detail),
            ))
        }
    }
}

/// What the verifier did with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// No descriptor was fetched for this artifact
    NoChecksum,
    /// No digest tool is usable on this host
    NoTool,
}

/// Checks a downloaded file with the first available [`DigestTool`]
pub struct ChecksumVerifier {
    tools: Vec<Box<dyn DigestTool>>,
}

impl ChecksumVerifier {
    pub fn new(tools: Vec<Box<dyn DigestTool>>) -> Self {
        Self { tools }
    }

    pub fn verify(&self, path: &Path, checksum: Option<&Checksum>) -> Result<Verification> {
        let Some(checksum) = checksum else {
            log::debug!("No checksum for {}, skipping verification", path.display());
            return Ok(Verification::NoChecksum);
        };

        let Some(tool) = self.tools.iter().find(|t| t.is_available()) else {
            log::warn!(
                "No SHA-512 tool available, skipping verification of {}",
                path.display()
            );
            return Ok(Verification::NoTool);
        };

        log::debug!("Verifying {} with {}", path.display(), tool.name());
        tool.verify(path, checksum)?;
        Ok(Verification::Verified)
    }
}

impl Default for ChecksumVerifier {
    fn default() -> Self {
        Self::for_kind(DigestToolKind::Native)
    }
}

impl ChecksumVerifier {
    /// Verifier using only the configured kind of tool
    pub fn for_kind(kind: DigestToolKind) -> Self {
        match kind {
            DigestToolKind::Native => Self::new(vec![Box::new(NativeSha512)]),
            DigestToolKind::Sha512Sum => Self::new(vec![Box::new(Sha512SumCommand::new())]),
        }
    }
}

/// Which digest tool a run uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestToolKind {
    #[default]
    Native,
    Sha512Sum,
}
