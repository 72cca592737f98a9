/// Integration tests for the full bootstrap flow
///
/// A local HTTP server stands in for the Apache mirrors so the tests can
/// control which host has which artifact and count every request made.

use flate2::write::GzEncoder;
use flate2::Compression;
use mvnup_core::checksum::compute_sha512;
use mvnup_core::{
    Bootstrap, BootstrapError, Config, Fetcher, HttpClientConfig, HttpTransport, MavenVersion,
    PathLookup, Resolution, EXIT_UNAVAILABLE,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const ARTIFACT: &str = "maven/maven-3/3.8.8/binaries/apache-maven-3.8.8-bin.tar.gz";
const TARBALL: &str = "apache-maven-3.8.8-bin.tar.gz";

/// Serves fixed bodies by path and logs `METHOD url` for every request
struct MirrorServer {
    server: Arc<tiny_http::Server>,
    base: String,
    log: Arc<Mutex<Vec<String>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MirrorServer {
    fn start(routes: HashMap<String, Vec<u8>>) -> Self {
        let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").unwrap());
        let port = server.server_addr().to_ip().unwrap().port();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let server = Arc::clone(&server);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for request in server.incoming_requests() {
                    let url = request.url().to_string();
                    log.lock()
                        .unwrap()
                        .push(format!("{} {}", request.method(), url));

                    let path = url.split('?').next().unwrap_or("");
                    let response = match routes.get(path) {
                        Some(body) => tiny_http::Response::from_data(body.clone()),
                        None => tiny_http::Response::from_data(Vec::new()).with_status_code(404),
                    };
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            server,
            base: format!("http://127.0.0.1:{}", port),
            log,
            handle: Some(handle),
        }
    }

    fn url(&self, prefix: &str) -> String {
        format!("{}/{}", self.base, prefix)
    }

    fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Drop for MirrorServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A minimal Maven distribution with an executable `bin/mvn`
fn distribution(dir: &Path) -> Vec<u8> {
    let path = dir.join(TARBALL);
    let file = std::fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let entries: [(&str, &[u8], u32); 2] = [
        ("apache-maven-3.8.8/bin/mvn", b"#!/bin/sh\necho maven\n", 0o755),
        ("apache-maven-3.8.8/lib/maven-core-3.8.8.jar", b"jar", 0o644),
    ];
    for (name, data, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();

    std::fs::read(&path).unwrap()
}

fn descriptor(dir: &Path) -> Vec<u8> {
    let digest = compute_sha512(&dir.join(TARBALL)).unwrap();
    format!("{}  {}\n", digest, TARBALL).into_bytes()
}

fn routes(prefix: &str, tarball: Vec<u8>, sha512: Option<Vec<u8>>) -> HashMap<String, Vec<u8>> {
    let mut routes = HashMap::new();
    routes.insert(format!("/{}/{}", prefix, ARTIFACT), tarball);
    if let Some(sha512) = sha512 {
        routes.insert(format!("/{}/{}.sha512", prefix, ARTIFACT), sha512);
    }
    routes
}

fn project(pom_version: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("pom.xml"),
        format!(
            "<project>\n  <properties>\n    <maven.version>{}</maven.version>\n  </properties>\n</project>\n",
            pom_version
        ),
    )
    .unwrap();
    dir
}

fn bootstrap(config: Config, empty_path: &Path) -> Bootstrap {
    let http = HttpClientConfig::new()
        .with_max_retries(0)
        .with_retry_delay(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(10));
    let fetcher = Fetcher::new(vec![Box::new(HttpTransport::new(&http).unwrap())], 0)
        .with_require_checksum(config.require_checksum);

    Bootstrap::new(config)
        .with_fetcher(fetcher)
        .with_locator(PathLookup::new().with_search_path(empty_path.as_os_str()))
}

fn assert_no_transients(root: &Path) {
    for name in [
        TARBALL.to_string(),
        format!("{}.sha512", TARBALL),
        format!("{}.part", TARBALL),
        format!("{}.sha512.part", TARBALL),
    ] {
        assert!(!root.join(&name).exists(), "{} left behind", name);
    }
}

#[test]
fn test_fresh_install_from_primary() {
    let fixtures = TempDir::new().unwrap();
    let tarball = distribution(fixtures.path());
    let server = MirrorServer::start(routes("primary", tarball, Some(descriptor(fixtures.path()))));

    let project = project("3.8.8");
    let config = Config::new(project.path())
        .with_mirror(server.url("primary"))
        .with_archive_mirror(server.url("archive"));

    let resolved = bootstrap(config, fixtures.path()).run().unwrap();

    let root = project.path().join("build");
    assert_eq!(resolved.resolution, Resolution::Downloaded);
    assert_eq!(resolved.version, MavenVersion::new(3, 8, 8));
    assert_eq!(resolved.path, root.join("apache-maven-3.8.8/bin/mvn"));
    assert!(resolved.path.is_file());
    assert!(root.join("apache-maven-3.8.8/lib/maven-core-3.8.8.jar").is_file());
    assert_no_transients(&root);

    assert_eq!(
        server.requests(),
        vec![
            format!("HEAD /primary/{}?action=download", ARTIFACT),
            format!("GET /primary/{}?action=download", ARTIFACT),
            format!("GET /primary/{}.sha512?action=download", ARTIFACT),
        ]
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&resolved.path).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }
}

#[test]
fn test_second_run_makes_no_requests() {
    let fixtures = TempDir::new().unwrap();
    let tarball = distribution(fixtures.path());
    let server = MirrorServer::start(routes("primary", tarball, Some(descriptor(fixtures.path()))));

    let project = project("3.8.8");
    let config = Config::new(project.path()).with_mirror(server.url("primary"));

    let first = bootstrap(config.clone(), fixtures.path()).run().unwrap();
    let after_first = server.requests().len();

    let second = bootstrap(config, fixtures.path()).run().unwrap();

    assert_eq!(second.resolution, Resolution::Installed);
    assert_eq!(second.path, first.path);
    assert_eq!(server.requests().len(), after_first);
}

#[test]
fn test_falls_back_to_archive_when_primary_lacks_version() {
    let fixtures = TempDir::new().unwrap();
    let tarball = distribution(fixtures.path());
    let server = MirrorServer::start(routes("archive", tarball, Some(descriptor(fixtures.path()))));

    let project = project("3.8.8");
    let config = Config::new(project.path())
        .with_mirror(server.url("primary"))
        .with_archive_mirror(server.url("archive"));

    let resolved = bootstrap(config, fixtures.path()).run().unwrap();

    assert_eq!(resolved.resolution, Resolution::Downloaded);
    assert!(resolved.path.is_file());
    assert_eq!(
        server.requests(),
        vec![
            format!("HEAD /primary/{}?action=download", ARTIFACT),
            format!("GET /archive/{}", ARTIFACT),
            format!("GET /archive/{}.sha512", ARTIFACT),
        ]
    );
}

#[test]
fn test_checksum_mismatch_aborts_install() {
    let fixtures = TempDir::new().unwrap();
    let tarball = distribution(fixtures.path());
    let wrong = format!("{}  {}\n", "0".repeat(128), TARBALL).into_bytes();
    let server = MirrorServer::start(routes("primary", tarball, Some(wrong)));

    let project = project("3.8.8");
    let config = Config::new(project.path()).with_mirror(server.url("primary"));

    let err = bootstrap(config, fixtures.path()).run().unwrap_err();

    let root = project.path().join("build");
    assert!(matches!(err, BootstrapError::Integrity { .. }));
    assert_eq!(err.exit_code(), EXIT_UNAVAILABLE);
    assert!(!root.join("apache-maven-3.8.8").exists());
    assert_no_transients(&root);
}

#[test]
fn test_missing_descriptor_installs_unverified() {
    let fixtures = TempDir::new().unwrap();
    let tarball = distribution(fixtures.path());
    let server = MirrorServer::start(routes("primary", tarball, None));

    let project = project("3.8.8");
    let config = Config::new(project.path()).with_mirror(server.url("primary"));

    let resolved = bootstrap(config, fixtures.path()).run().unwrap();

    assert!(resolved.path.is_file());
    assert_no_transients(&project.path().join("build"));
}

#[test]
fn test_missing_descriptor_fails_when_required() {
    let fixtures = TempDir::new().unwrap();
    let tarball = distribution(fixtures.path());
    let server = MirrorServer::start(routes("primary", tarball, None));

    let project = project("3.8.8");
    let config = Config::new(project.path())
        .with_mirror(server.url("primary"))
        .with_require_checksum(true);

    let err = bootstrap(config, fixtures.path()).run().unwrap_err();

    let root = project.path().join("build");
    assert_eq!(err.exit_code(), EXIT_UNAVAILABLE);
    assert!(!root.join("apache-maven-3.8.8").exists());
    assert_no_transients(&root);
}

#[test]
fn test_unavailable_everywhere() {
    let fixtures = TempDir::new().unwrap();
    let server = MirrorServer::start(HashMap::new());

    let project = project("3.8.8");
    let config = Config::new(project.path())
        .with_mirror(server.url("primary"))
        .with_archive_mirror(server.url("archive"));

    let err = bootstrap(config, fixtures.path()).run().unwrap_err();

    assert!(matches!(err, BootstrapError::Download { .. }));
    assert_eq!(err.exit_code(), EXIT_UNAVAILABLE);
    assert_no_transients(&project.path().join("build"));
}

#[test]
fn test_unparseable_version_makes_no_requests() {
    let fixtures = TempDir::new().unwrap();
    let server = MirrorServer::start(HashMap::new());

    let project = project("3.8");
    let config = Config::new(project.path()).with_mirror(server.url("primary"));

    let err = bootstrap(config, fixtures.path()).run().unwrap_err();

    assert!(matches!(err, BootstrapError::Config(_)));
    assert!(server.requests().is_empty());
}
