//! Binary provider.
//!
//! Makes sure a runnable `mongod` exists under the cache directory, downloading
//! and unpacking the release archive on first use. Later calls find the binary
//! in place and return without touching the network.
//!
//! The archive is streamed to a temporary file in the version directory and
//! unpacked from there. The extracted binary is written to a second temporary
//! file and renamed into place, so a concurrent reader never observes a
//! partial binary.
//! Within one process, calls for the same destination are serialized so the
//! archive is fetched at most once.

use async_trait::async_trait;
use config::MongodConfig;
use dashmap::DashMap;
use errors::{MongodError, Result};
use flate2::read::GzDecoder;
use futures_util::StreamExt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Base URL of the official release archives.
pub const DEFAULT_BASE_URL: &str = "https://fastdl.mongodb.org";

/// Path suffix of the server executable inside a release archive.
pub const ARCHIVE_MEMBER: &str = "bin/mongod";

#[cfg(windows)]
pub const BINARY_NAME: &str = "mongod.exe";
#[cfg(not(windows))]
pub const BINARY_NAME: &str = "mongod";

/// Per-destination download locks shared by every provider in the process.
static DOWNLOAD_LOCKS: LazyLock<DashMap<PathBuf, Arc<Mutex<()>>>> = LazyLock::new(DashMap::new);

/// Path to a server executable on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryHandle {
    path: PathBuf
}

impl BinaryHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the executable is currently present.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// Operating system and CPU architecture a binary is downloaded for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into()
        }
    }

    /// Platform of the running process.
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }
}

/// Which release to download and where from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySource {
    pub version: String,
    pub distribution: String,
    pub base_url: String,
    pub download_url: Option<String>
}

impl BinarySource {
    pub fn from_config(config: &MongodConfig) -> Self {
        Self {
            version: config.version.clone(),
            distribution: config.distribution.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
            download_url: config.download_url.clone()
        }
    }

    /// Resolves the archive URL for `platform`.
    ///
    /// ```text
    /// linux: <base>/linux/mongodb-linux-<arch>-<distribution>-<version>.tgz
    /// macos: <base>/osx/mongodb-macos-<arch>-<version>.tgz
    /// ```
    pub fn resolve_url(&self, platform: &Platform) -> Result<String> {
        if let Some(url) = &self.download_url {
            return Ok(url.clone());
        }

        let unsupported = || MongodError::UnsupportedPlatform {
            os: platform.os.clone(),
            arch: platform.arch.clone()
        };

        let arch = match (platform.os.as_str(), platform.arch.as_str()) {
            ("macos", "aarch64") => "arm64",
            (_, "x86_64") => "x86_64",
            (_, "aarch64") => "aarch64",
            _ => return Err(unsupported())
        };

        let base = self.base_url.trim_end_matches('/');
        match platform.os.as_str() {
            "linux" => Ok(format!(
                "{base}/linux/mongodb-linux-{arch}-{}-{}.tgz",
                self.distribution, self.version
            )),
            "macos" => Ok(format!(
                "{base}/osx/mongodb-macos-{arch}-{}.tgz",
                self.version
            )),
            _ => Err(unsupported())
        }
    }
}

/// Fetches a release archive into a file.
///
/// This is the seam to the download collaborator; [`HttpFetcher`] is the
/// default implementation. `destination` already exists and is overwritten.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<()>;
}

/// Fetches archives over HTTP(S) with `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<()> {
        let failed = |reason: String| MongodError::DownloadFailed {
            url: url.to_string(),
            reason
        };
        let unwritable = |e: std::io::Error| MongodError::BinaryUnavailable {
            path: destination.display().to_string(),
            reason: e.to_string()
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| failed(e.to_string()))?;

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(unwritable)?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            file.write_all(&chunk).await.map_err(unwritable)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(unwritable)?;

        tracing::debug!(url = %url, bytes = written, "Archive downloaded");
        Ok(())
    }
}

/// Guarantees a `mongod` binary exists under a destination directory.
pub struct BinaryProvider {
    destination: PathBuf,
    source: BinarySource,
    platform: Platform,
    fetcher: Arc<dyn ArchiveFetcher>
}

impl BinaryProvider {
    pub fn new(destination: impl Into<PathBuf>, source: BinarySource) -> Self {
        Self {
            destination: destination.into(),
            source,
            platform: Platform::current(),
            fetcher: Arc::new(HttpFetcher::new())
        }
    }

    pub fn from_config(config: &MongodConfig) -> Self {
        Self::new(config.binary_cache_dir(), BinarySource::from_config(config))
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Where the binary lives once provisioned: `<destination>/<version>/mongod`.
    pub fn expected_path(&self) -> PathBuf {
        self.destination
            .join(&self.source.version)
            .join(BINARY_NAME)
    }

    /// Returns the cached binary, downloading it first if it is missing.
    pub async fn ensure(&self) -> Result<BinaryHandle> {
        let target = self.expected_path();
        if is_file(&target).await {
            tracing::debug!(binary = %target.display(), "Using cached mongod binary");
            return Ok(BinaryHandle::new(target));
        }

        let lock = DOWNLOAD_LOCKS.entry(target.clone()).or_default().clone();
        let _guard = lock.lock().await;

        // Another task may have finished the download while we waited.
        if is_file(&target).await {
            return Ok(BinaryHandle::new(target));
        }

        let url = self.source.resolve_url(&self.platform)?;
        tracing::info!(url = %url, binary = %target.display(), "Downloading mongod");

        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.destination.clone());
        let unavailable = |e: std::io::Error| MongodError::BinaryUnavailable {
            path: dir.display().to_string(),
            reason: e.to_string()
        };
        tokio::fs::create_dir_all(&dir).await.map_err(unavailable)?;

        // Removed on drop, whether or not extraction succeeds.
        let archive = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".tgz")
            .tempfile_in(&dir)
            .map_err(unavailable)?;
        self.fetcher.fetch(&url, archive.path()).await?;

        let extract_target = target.clone();
        tokio::task::spawn_blocking(move || extract_binary(archive.path(), &url, &extract_target))
            .await
            .map_err(|e| MongodError::BinaryUnavailable {
                path: target.display().to_string(),
                reason: format!("extraction task failed: {e}")
            })??;

        tracing::info!(binary = %target.display(), "mongod binary ready");
        Ok(BinaryHandle::new(target))
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Extracts the single `bin/mongod` entry of a gzip'd tarball to `target`.
fn extract_binary(archive: &Path, url: &str, target: &Path) -> Result<()> {
    let corrupt = |reason: String| MongodError::DownloadFailed {
        url: url.to_string(),
        reason: format!("corrupt archive: {reason}")
    };
    let unavailable = |reason: String| MongodError::BinaryUnavailable {
        path: target.display().to_string(),
        reason
    };

    let dir = target
        .parent()
        .ok_or_else(|| unavailable("destination has no parent directory".to_string()))?;

    let file = std::fs::File::open(archive).map_err(|e| unavailable(e.to_string()))?;
    let mut tarball = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = tarball.entries().map_err(|e| corrupt(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| corrupt(e.to_string()))?;
        let member = entry.path().map_err(|e| corrupt(e.to_string()))?.into_owned();
        if !member.ends_with(ARCHIVE_MEMBER) {
            continue;
        }

        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(|e| unavailable(e.to_string()))?;
        std::io::copy(&mut entry, staged.as_file_mut()).map_err(|e| corrupt(e.to_string()))?;
        make_executable(staged.as_file()).map_err(|e| unavailable(e.to_string()))?;
        staged
            .persist(target)
            .map_err(|e| unavailable(e.error.to_string()))?;

        tracing::debug!(member = %member.display(), "Extracted mongod from archive");
        return Ok(());
    }

    Err(MongodError::ArchiveMemberMissing {
        url: url.to_string(),
        member: ARCHIVE_MEMBER.to_string()
    })
}

#[cfg(unix)]
fn make_executable(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tarball(member: &str, contents: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, member, contents).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn source(url: String) -> BinarySource {
        BinarySource {
            version: "5.0.26".to_string(),
            distribution: "ubuntu2004".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            download_url: Some(url)
        }
    }

    #[test]
    fn test_resolve_url_linux() {
        let source = BinarySource::from_config(&MongodConfig::default());
        let url = source
            .resolve_url(&Platform::new("linux", "x86_64"))
            .unwrap();
        assert_eq!(
            url,
            "https://fastdl.mongodb.org/linux/mongodb-linux-x86_64-ubuntu2004-5.0.26.tgz"
        );
    }

    #[test]
    fn test_resolve_url_macos_arm() {
        let source = BinarySource::from_config(&MongodConfig::default());
        let url = source
            .resolve_url(&Platform::new("macos", "aarch64"))
            .unwrap();
        assert_eq!(
            url,
            "https://fastdl.mongodb.org/osx/mongodb-macos-arm64-5.0.26.tgz"
        );
    }

    #[test]
    fn test_resolve_url_unsupported() {
        let source = BinarySource::from_config(&MongodConfig::default());
        let result = source.resolve_url(&Platform::new("freebsd", "x86_64"));
        assert!(matches!(
            result,
            Err(MongodError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn test_resolve_url_override() {
        let source = source("https://mirror.internal/mongod.tgz".to_string());
        let url = source.resolve_url(&Platform::new("freebsd", "riscv64")).unwrap();
        assert_eq!(url, "https://mirror.internal/mongod.tgz");
    }

    #[tokio::test]
    async fn test_ensure_downloads_once() {
        let server = MockServer::start().await;
        let archive = tarball("mongodb-linux-x86_64-5.0.26/bin/mongod", b"#!/bin/sh\n");
        Mock::given(method("GET"))
            .and(path("/mongodb.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let provider = BinaryProvider::new(
            dir.path(),
            source(format!("{}/mongodb.tgz", server.uri()))
        );

        let first = provider.ensure().await.unwrap();
        let second = provider.ensure().await.unwrap();

        assert_eq!(first, second);
        assert!(first.exists());
        assert_eq!(first.path(), dir.path().join("5.0.26").join(BINARY_NAME));
        assert_eq!(std::fs::read(first.path()).unwrap(), b"#!/bin/sh\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(first.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn test_concurrent_ensure_downloads_once() {
        let server = MockServer::start().await;
        let archive = tarball("mongodb/bin/mongod", b"binary");
        Mock::given(method("GET"))
            .and(path("/mongodb.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("{}/mongodb.tgz", server.uri());
        let a = BinaryProvider::new(dir.path(), source(url.clone()));
        let b = BinaryProvider::new(dir.path(), source(url));

        let (first, second) = tokio::join!(a.ensure(), b.ensure());
        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_missing_member() {
        let server = MockServer::start().await;
        let archive = tarball("mongodb/bin/mongos", b"router");
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let provider = BinaryProvider::new(dir.path(), source(format!("{}/x.tgz", server.uri())));

        let result = provider.ensure().await;
        assert!(matches!(
            result,
            Err(MongodError::ArchiveMemberMissing { .. })
        ));
        assert!(!provider.expected_path().exists());
    }

    #[tokio::test]
    async fn test_ensure_http_error_is_provisioning_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let provider = BinaryProvider::new(dir.path(), source(format!("{}/x.tgz", server.uri())));

        let err = provider.ensure().await.unwrap_err();
        assert!(matches!(err, MongodError::DownloadFailed { .. }));
        assert_eq!(err.kind(), errors::ErrorKind::Provisioning);
    }

    #[tokio::test]
    async fn test_ensure_uses_existing_binary_without_fetching() {
        struct NeverFetch;

        #[async_trait]
        impl ArchiveFetcher for NeverFetch {
            async fn fetch(&self, url: &str, _destination: &Path) -> Result<()> {
                panic!("unexpected fetch of {url}");
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        let provider = BinaryProvider::new(dir.path(), source("https://unused".to_string()))
            .with_fetcher(Arc::new(NeverFetch));
        let target = provider.expected_path();
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"cached").unwrap();

        let handle = provider.ensure().await.unwrap();
        assert_eq!(handle.path(), target);
    }

    #[tokio::test]
    async fn test_ensure_leaves_only_the_binary() {
        let server = MockServer::start().await;
        let archive = tarball("mongodb/bin/mongod", b"binary");
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let provider = BinaryProvider::new(dir.path(), source(format!("{}/x.tgz", server.uri())));
        let handle = provider.ensure().await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(handle.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(BINARY_NAME)]);
    }

    #[tokio::test]
    async fn test_failed_extraction_removes_staged_archive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not a tarball".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let provider = BinaryProvider::new(dir.path(), source(format!("{}/x.tgz", server.uri())));

        assert!(provider.ensure().await.is_err());
        let version_dir = provider.expected_path().parent().unwrap().to_path_buf();
        assert_eq!(std::fs::read_dir(version_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_http_fetcher_streams_to_file() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..=255u8).cycle().take(256 * 1024).collect();
        Mock::given(method("GET"))
            .and(path("/big.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let destination = dir.path().join("archive.tgz");
        std::fs::write(&destination, b"stale contents that must be replaced").unwrap();

        HttpFetcher::new()
            .fetch(&format!("{}/big.tgz", server.uri()), &destination)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), body);
    }
}
