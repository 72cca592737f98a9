//! Mirror selection.
//!
//! Apache's content-delivery mirrors only keep the most recent releases.
//! Anything older has been pruned there but stays on the permanent archive,
//! so a failed probe against the primary moves the run to the archive for
//! good.

use std::fmt;

use crate::transport::Transport;

/// Primary mirror redirector
pub const DEFAULT_PRIMARY_MIRROR: &str = "https://www.apache.org/dyn/closer.lua";

/// Permanent archive holding every historical release
pub const ARCHIVE_MIRROR: &str = "https://archive.apache.org/dist";

/// Query the redirector needs to answer with the artifact instead of an HTML page
const PRIMARY_QUERY: &[(&str, &str)] = &[("action", "download")];

/// Build a `?k=v&k2=v2` suffix with URL-encoded keys and values
pub fn encode_query(pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }

    let encoded: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    format!("?{}", encoded.join("&"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorKind {
    Primary,
    Fallback,
}

/// A host serving release artifacts, plus the query appended to every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    base: String,
    query: String,
    kind: MirrorKind,
}

impl Mirror {
    /// The primary mirror, or an override of it.
    ///
    /// An override that already carries a `?query` keeps it as is; otherwise
    /// the redirector's `action=download` query is used.
    pub fn primary(override_url: Option<&str>) -> Self {
        let raw = override_url.unwrap_or(DEFAULT_PRIMARY_MIRROR);

        let (base, query) = match raw.split_once('?') {
            Some((base, query)) if !query.is_empty() => (base, format!("?{}", query)),
            Some((base, _)) => (base, String::new()),
            None => (raw, encode_query(PRIMARY_QUERY)),
        };

        Self {
            base: base.trim_end_matches('/').to_string(),
            query,
            kind: MirrorKind::Primary,
        }
    }

    /// The permanent archive, which takes no query
    pub fn archive() -> Self {
        Self::archive_at(ARCHIVE_MIRROR)
    }

    /// A copy of the archive hosted elsewhere
    pub fn archive_at(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            query: String::new(),
            kind: MirrorKind::Fallback,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn kind(&self) -> MirrorKind {
        self.kind
    }

    /// `{base}/{path}{query}`
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}{}", self.base, path.trim_start_matches('/'), self.query)
    }

    /// `{base}/{path}.{suffix}{query}`
    pub fn sidecar_url_for(&self, path: &str, suffix: &str) -> String {
        format!(
            "{}/{}.{}{}",
            self.base,
            path.trim_start_matches('/'),
            suffix,
            self.query
        )
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}

/// Which mirror the run is using. The only transition is primary → fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorState {
    UsingPrimary(Mirror),
    UsingFallback(Mirror),
}

impl MirrorState {
    pub fn start(override_url: Option<&str>) -> Self {
        MirrorState::UsingPrimary(Mirror::primary(override_url))
    }

    /// Move to the archive. Calling this on the fallback state is a no-op.
    pub fn fall_back(self) -> Self {
        self.fall_back_to(Mirror::archive())
    }

    pub fn fall_back_to(self, archive: Mirror) -> Self {
        match self {
            MirrorState::UsingPrimary(_) => MirrorState::UsingFallback(archive),
            fallback @ MirrorState::UsingFallback(_) => fallback,
        }
    }

    pub fn mirror(&self) -> &Mirror {
        match self {
            MirrorState::UsingPrimary(m) | MirrorState::UsingFallback(m) => m,
        }
    }

    pub fn into_mirror(self) -> Mirror {
        match self {
            MirrorState::UsingPrimary(m) | MirrorState::UsingFallback(m) => m,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, MirrorState::UsingFallback(_))
    }
}

/// Picks the mirror for a run by probing the primary once
pub struct MirrorSelector<'a> {
    transport: Option<&'a dyn Transport>,
    archive: Mirror,
}

impl<'a> MirrorSelector<'a> {
    /// `transport` is used for the probe; without one the primary is
    /// treated as unreachable.
    pub fn new(transport: Option<&'a dyn Transport>) -> Self {
        Self {
            transport,
            archive: Mirror::archive(),
        }
    }

    /// Fall back to `base` instead of the public archive
    pub fn with_archive(mut self, base: Option<&str>) -> Self {
        if let Some(base) = base {
            self.archive = Mirror::archive_at(base);
        }
        self
    }

    pub fn select(&self, artifact_path: &str, override_url: Option<&str>) -> Mirror {
        let state = MirrorState::start(override_url);
        let probe_url = state.mirror().url_for(artifact_path);

        let reachable = match self.transport {
            Some(transport) => transport.probe(&probe_url),
            None => {
                log::warn!("No transport available to probe {}", probe_url);
                false
            }
        };

        let state = if reachable {
            log::debug!("Using primary mirror {}", state.mirror());
            state
        } else {
            log::warn!(
                "{} is not available on {}, falling back to {}",
                artifact_path,
                state.mirror(),
                self.archive
            );
            state.fall_back_to(self.archive.clone())
        };

        state.into_mirror()
    }
}
