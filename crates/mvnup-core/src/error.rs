use std::path::PathBuf;
use thiserror::Error;

/// Exit code for runs that could not download or verify the toolchain.
pub const EXIT_UNAVAILABLE: i32 = 2;

#[derive(Error, Debug)]
pub enum BootstrapError {
    // Version / config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse {}: {reason}", .path.display())]
    ConfigFile { path: PathBuf, reason: String },

    // Network errors
    #[error("Network error for {url}: {reason}")]
    Network { url: String, reason: String },

    // Download errors
    #[error("Download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    // Integrity errors
    #[error("Integrity check failed for {}: {reason}", .path.display())]
    Integrity { path: PathBuf, reason: String },

    // Extraction errors
    #[error("Extraction failed for {}: {reason}", .path.display())]
    Extraction { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BootstrapError {
    pub(crate) fn download(url: &str, reason: impl ToString) -> Self {
        BootstrapError::Download {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn integrity(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BootstrapError::Integrity {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BootstrapError::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Process exit code for this error.
    ///
    /// Availability and integrity failures share a reserved code so wrapper
    /// scripts can tell them apart from a failing build.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::Network { .. }
            | BootstrapError::Download { .. }
            | BootstrapError::Integrity { .. } => EXIT_UNAVAILABLE,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let err = BootstrapError::download("https://example.com/a.tar.gz", "boom");
        assert_eq!(err.exit_code(), EXIT_UNAVAILABLE);

        let err = BootstrapError::integrity("a.tar.gz", "expected aa, got bb");
        assert_eq!(err.exit_code(), EXIT_UNAVAILABLE);

        let err = BootstrapError::Config("no version".to_string());
        assert_eq!(err.exit_code(), 1);

        let err = BootstrapError::extraction("a.tar.gz", "bad header");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_messages_name_resource() {
        let err = BootstrapError::download("https://example.com/a.tar.gz", "HTTP 404");
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/a.tar.gz"));
        assert!(msg.contains("HTTP 404"));
    }
}
