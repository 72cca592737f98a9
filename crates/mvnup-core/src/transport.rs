//! Transfer mechanisms for mirror probes and artifact downloads.
//!
//! Two transports are provided:
//! - [`HttpTransport`]: in-process `reqwest` blocking client with retry and
//!   exponential backoff
//! - [`CurlTransport`]: the host's `curl` command, used when the in-process
//!   client cannot be constructed
//!
//! Both write to a `.part` file next to the destination and rename it into
//! place once the body is complete, so an interrupted transfer never
//! occupies the final path.

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::{BootstrapError, Result};

const DEFAULT_USER_AGENT: &str = concat!("mvnup/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const CHUNK_SIZE: usize = 64 * 1024;

/// Download progress callback: `(downloaded, total)`; `total` is 0 when unknown.
pub type Progress<'a> = &'a dyn Fn(u64, u64);

/// A way of talking to a mirror
pub trait Transport {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Whether this transport can be used on this host
    fn is_available(&self) -> bool;

    /// Existence check without transferring the body
    fn probe(&self, url: &str) -> bool;

    /// Download `url` to `dest`, retrying up to `retries` more times on
    /// transient failure
    fn fetch(&self, url: &str, dest: &Path, retries: u32, progress: Option<Progress<'_>>)
        -> Result<()>;
}

/// Path used while a transfer is in flight
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn prepare_parent(dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Outcome of a single GET attempt
enum Attempt {
    Done(Response),
    Retry(String),
    Fatal(String),
}

/// In-process HTTP transport
pub struct HttpTransport {
    client: Client,
    retry_delay: Duration,
}

impl HttpTransport {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent);

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| BootstrapError::Network {
                url: proxy_url.clone(),
                reason: format!("invalid proxy: {}", e),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| BootstrapError::Network {
            url: String::new(),
            reason: format!("failed to build HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            retry_delay: config.retry_delay,
        })
    }

    fn attempt(&self, url: &str) -> Attempt {
        match self.client.get(url).send() {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Attempt::Done(response)
                } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    Attempt::Retry(format!("HTTP {}", status.as_u16()))
                } else {
                    // 4xx will not change on retry
                    Attempt::Fatal(format!("HTTP {}", status.as_u16()))
                }
            }
            Err(e) => Attempt::Retry(e.to_string()),
        }
    }

    fn write_body(
        &self,
        mut response: Response,
        part: &Path,
        progress: Option<Progress<'_>>,
    ) -> std::io::Result<()> {
        let total = response.content_length().unwrap_or(0);
        let mut file = File::create(part)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut downloaded: u64 = 0;

        loop {
            let n = response.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            downloaded += n as u64;

            if let Some(callback) = progress {
                callback(downloaded, total);
            }
        }

        file.flush()
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn probe(&self, url: &str) -> bool {
        log::debug!("HTTP HEAD {}", url);
        match self.client.head(url).send() {
            Ok(response) => {
                log::debug!("HTTP {} {}", response.status().as_u16(), url);
                response.status().is_success()
            }
            Err(e) => {
                log::debug!("HEAD {} failed: {}", url, e);
                false
            }
        }
    }

    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        retries: u32,
        progress: Option<Progress<'_>>,
    ) -> Result<()> {
        prepare_parent(dest)?;
        let part = partial_path(dest);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..=retries {
            log::debug!("HTTP GET {} (attempt {})", url, attempt + 1);

            match self.attempt(url) {
                Attempt::Done(response) => match self.write_body(response, &part, progress) {
                    Ok(()) => {
                        fs::rename(&part, dest)?;
                        return Ok(());
                    }
                    Err(e) => {
                        let _ = fs::remove_file(&part);
                        last_error = e.to_string();
                    }
                },
                Attempt::Retry(reason) => last_error = reason,
                Attempt::Fatal(reason) => return Err(BootstrapError::download(url, reason)),
            }

            if attempt < retries {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = self.retry_delay * 2_u32.pow(attempt);
                log::debug!("Retrying {} in {:?}: {}", url, delay, last_error);
                std::thread::sleep(delay);
            }
        }

        Err(BootstrapError::download(
            url,
            format!("{} (after {} attempts)", last_error, retries + 1),
        ))
    }
}

/// Transport backed by the host's `curl` executable
pub struct CurlTransport {
    program: PathBuf,
}

impl CurlTransport {
    pub fn new() -> Self {
        Self::with_program("curl")
    }

    /// Use a specific curl executable
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for CurlTransport {
    fn name(&self) -> &str {
        "curl"
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

    fn probe(&self, url: &str) -> bool {
        log::debug!("curl --head {}", url);
        Command::new(&self.program)
            .args(["--silent", "--fail", "--location", "--head"])
            .arg(url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        retries: u32,
        _progress: Option<Progress<'_>>,
    ) -> Result<()> {
        prepare_parent(dest)?;
        let part = partial_path(dest);

        log::debug!("curl GET {}", url);
        let mut cmd = Command::new(&self.program);
        cmd.args(["--silent", "--show-error", "--fail", "--location"]);
        if retries > 0 {
            cmd.arg("--retry").arg(retries.to_string());
        }
        cmd.arg("--output").arg(&part).arg(url);

        let output = cmd
            .stdout(Stdio::null())
            .output()
            .map_err(|e| BootstrapError::download(url, format!("failed to run curl: {}", e)))?;

        if !output.status.success() {
            let _ = fs::remove_file(&part);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BootstrapError::download(
                url,
                format!("curl exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        if !part.is_file() {
            return Err(BootstrapError::download(url, "curl produced no output file"));
        }

        fs::rename(&part, dest)?;
        Ok(())
    }
}
