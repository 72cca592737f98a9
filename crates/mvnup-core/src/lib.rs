pub mod archive;
pub mod bootstrap;
pub mod checksum;
pub mod config;
pub mod error;
pub mod fetch;
pub mod mirror;
pub mod system;
pub mod transport;
pub mod version;

pub use error::{BootstrapError, Result, EXIT_UNAVAILABLE};
pub use version::MavenVersion;
pub use config::{Config, ConfigLoader};
pub use bootstrap::{Bootstrap, Resolution, Resolved};
pub use fetch::{Fetcher, Tarball};
pub use mirror::{Mirror, MirrorSelector, MirrorState};
pub use checksum::{Checksum, ChecksumVerifier, DigestToolKind, Verification};
pub use archive::{ArchiveInstaller, TempArtifacts};
pub use transport::{CurlTransport, HttpClientConfig, HttpTransport, Transport};
pub use system::{PathLookup, SystemMaven, ToolchainLocator};
