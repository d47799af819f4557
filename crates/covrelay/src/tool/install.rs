//! Resolving a [`ToolSource`] to a local executable.

use super::archive::extract_entry;
use super::checksum;
use super::fetch::Fetcher;
use super::{Platform, ToolHandle, ToolOrigin};
use crate::config::{ArchiveKind, ToolConfig, ToolSource};
use crate::exec::{is_executable, CommandExecutor, Invocation};
use crate::result::AcquisitionError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DIGEST_MARKER: &str = ".sha256";

/// Installs the configured coverage tool
#[derive(Debug, Clone)]
pub struct ToolInstaller {
    config: ToolConfig,
    fetcher: Arc<dyn Fetcher>,
    executor: Arc<dyn CommandExecutor>,
    platform: Platform,
}

impl ToolInstaller {
    /// Create an installer for the current platform
    #[must_use]
    pub fn new(
        config: ToolConfig,
        fetcher: Arc<dyn Fetcher>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            config,
            fetcher,
            executor,
            platform: Platform::current(),
        }
    }

    /// Override the platform used for download checks
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Tool settings
    #[must_use]
    pub const fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn exe_name(&self) -> String {
        format!("{}{}", self.config.name, std::env::consts::EXE_SUFFIX)
    }

    fn download_dir(&self) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}-{}", self.config.name, self.config.version))
    }

    fn cargo_root(&self) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("cargo-{}-{}", self.config.name, self.config.version))
    }

    /// Where the executable will live once acquired
    #[must_use]
    pub fn expected_path(&self) -> PathBuf {
        match &self.config.source {
            ToolSource::Path { path, .. } => path.clone(),
            ToolSource::Download { .. } => self.download_dir().join(self.exe_name()),
            ToolSource::CargoInstall => self.cargo_root().join("bin").join(self.exe_name()),
        }
    }

    /// The handle `acquire` would produce on a cold cache, without touching
    /// the network or the filesystem
    #[must_use]
    pub fn planned(&self) -> ToolHandle {
        let origin = match self.config.source {
            ToolSource::Path { .. } => ToolOrigin::Existing,
            ToolSource::Download { .. } => ToolOrigin::Downloaded,
            ToolSource::CargoInstall => ToolOrigin::CargoInstalled,
        };
        self.handle(self.expected_path(), origin)
    }

    fn handle(&self, path: PathBuf, origin: ToolOrigin) -> ToolHandle {
        ToolHandle {
            name: self.config.name.clone(),
            version: self.config.version.clone(),
            path,
            origin,
        }
    }

    /// Resolve the tool, fetching or installing it if needed
    ///
    /// # Errors
    ///
    /// Returns error if the tool cannot be fetched, verified, or installed
    pub async fn acquire(&self) -> Result<ToolHandle, AcquisitionError> {
        let handle = match &self.config.source {
            ToolSource::Path { path, sha256 } => self.use_existing(path, sha256.as_deref())?,
            ToolSource::Download {
                url,
                sha256,
                archive,
            } => self.download(url, sha256, *archive).await?,
            ToolSource::CargoInstall => self.cargo_install().await?,
        };
        tracing::info!(
            tool = %handle.name,
            version = %handle.version,
            path = %handle.path.display(),
            origin = ?handle.origin,
            "coverage tool ready"
        );
        Ok(handle)
    }

    fn use_existing(
        &self,
        path: &Path,
        sha256: Option<&str>,
    ) -> Result<ToolHandle, AcquisitionError> {
        if !path.exists() {
            return Err(AcquisitionError::NotFound {
                path: path.to_path_buf(),
            });
        }
        if !is_executable(path) {
            return Err(AcquisitionError::NotExecutable {
                path: path.to_path_buf(),
            });
        }
        if let Some(expected) = sha256 {
            checksum::verify_file(path, expected)?;
        }
        Ok(self.handle(path.to_path_buf(), ToolOrigin::Existing))
    }

    /// A cached download is reused only when the marker names the pinned
    /// artifact digest and the executable still hashes to the digest
    /// recorded when it was staged.
    fn cached_download(&self, sha256: &str) -> Option<PathBuf> {
        let dir = self.download_dir();
        let dest = dir.join(self.exe_name());
        if !is_executable(&dest) {
            return None;
        }
        let marker = std::fs::read_to_string(dir.join(DIGEST_MARKER)).ok()?;
        let mut lines = marker.lines().map(str::trim);
        let artifact = lines.next()?;
        let binary = lines.next().filter(|d| checksum::is_valid_digest(d))?;
        if !artifact.eq_ignore_ascii_case(sha256.trim()) {
            return None;
        }
        if let Err(e) = checksum::verify_file(&dest, binary) {
            tracing::warn!(path = %dest.display(), error = %e, "cached tool failed verification, refetching");
            return None;
        }
        Some(dest)
    }

    async fn download(
        &self,
        url: &str,
        sha256: &str,
        archive: ArchiveKind,
    ) -> Result<ToolHandle, AcquisitionError> {
        if !self.platform.supports_downloads() {
            return Err(AcquisitionError::UnsupportedPlatform {
                os: self.platform.os.clone(),
                arch: self.platform.arch.clone(),
            });
        }

        if let Some(dest) = self.cached_download(sha256) {
            tracing::debug!(path = %dest.display(), "reusing cached tool");
            return Ok(self.handle(dest, ToolOrigin::Cached));
        }

        let bytes = self.fetcher.fetch(url).await?;
        checksum::verify(&bytes, sha256)?;

        let dir = self.download_dir();
        std::fs::create_dir_all(&dir)?;
        let exe_name = self.exe_name();
        let dest = dir.join(&exe_name);
        let staging = dir.join(format!("{exe_name}.partial"));

        match archive {
            ArchiveKind::Raw => std::fs::write(&staging, &bytes)?,
            ArchiveKind::TarGz => extract_entry(&bytes, &exe_name, &staging)?,
        }
        let binary_digest = checksum::sha256_hex(&std::fs::read(&staging)?);
        mark_executable(&staging)?;
        std::fs::rename(&staging, &dest)?;
        std::fs::write(
            dir.join(DIGEST_MARKER),
            format!("{}\n{binary_digest}\n", sha256.trim().to_ascii_lowercase()),
        )?;

        Ok(self.handle(dest, ToolOrigin::Downloaded))
    }

    async fn cargo_install(&self) -> Result<ToolHandle, AcquisitionError> {
        let root = self.cargo_root();
        let bin = root.join("bin").join(self.exe_name());
        if is_executable(&bin) {
            tracing::debug!(path = %bin.display(), "reusing cargo-installed tool");
            return Ok(self.handle(bin, ToolOrigin::Cached));
        }

        let invocation = Invocation::new("cargo").args([
            "install".to_string(),
            self.config.name.clone(),
            "--version".to_string(),
            self.config.version.clone(),
            "--locked".to_string(),
            "--root".to_string(),
            root.display().to_string(),
        ]);
        tracing::info!(command = %invocation, "installing coverage tool");

        let outcome = self
            .executor
            .execute(&invocation)
            .await
            .map_err(|e| AcquisitionError::install(format!("failed to run cargo: {e}")))?;
        if !outcome.success() {
            return Err(AcquisitionError::install(format!(
                "`{invocation}` failed with {}",
                outcome.describe()
            )));
        }
        if !bin.exists() {
            return Err(AcquisitionError::NotFound { path: bin });
        }

        Ok(self.handle(bin, ToolOrigin::CargoInstalled))
    }
}

fn mark_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_support::{FakeFetcher, RecordingExecutor};
    use crate::tool::archive::tests::tarball;
    use tempfile::TempDir;

    const BINARY: &[u8] = b"#!/bin/sh\nexit 0\n";

    fn tool_config(temp: &TempDir, source: ToolSource) -> ToolConfig {
        ToolConfig {
            source,
            cache_dir: temp.path().join("cache"),
            ..ToolConfig::default()
        }
    }

    fn linux() -> Platform {
        Platform::new("linux", "x86_64")
    }

    mod path_source_tests {
        use super::*;

        #[tokio::test]
        async fn test_existing_executable() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("cargo-tarpaulin");
            std::fs::write(&path, BINARY).unwrap();
            mark_executable(&path).unwrap();

            let installer = ToolInstaller::new(
                tool_config(&temp, ToolSource::Path { path: path.clone(), sha256: Some(checksum::sha256_hex(BINARY)) }),
                Arc::new(FakeFetcher::unreachable()),
                Arc::new(RecordingExecutor::passing()),
            );
            let handle = installer.acquire().await.unwrap();
            assert_eq!(handle.path, path);
            assert_eq!(handle.origin, ToolOrigin::Existing);
        }

        #[tokio::test]
        async fn test_missing_path() {
            let temp = TempDir::new().unwrap();
            let installer = ToolInstaller::new(
                tool_config(&temp, ToolSource::Path { path: temp.path().join("nope"), sha256: None }),
                Arc::new(FakeFetcher::unreachable()),
                Arc::new(RecordingExecutor::passing()),
            );
            let err = installer.acquire().await.unwrap_err();
            assert!(matches!(err, AcquisitionError::NotFound { .. }));
        }

        #[tokio::test]
        async fn test_not_executable() {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("tool");
            std::fs::write(&path, BINARY).unwrap();
            let installer = ToolInstaller::new(
                tool_config(&temp, ToolSource::Path { path, sha256: None }),
                Arc::new(FakeFetcher::unreachable()),
                Arc::new(RecordingExecutor::passing()),
            );
            let err = installer.acquire().await.unwrap_err();
            assert!(matches!(err, AcquisitionError::NotExecutable { .. }));
        }
    }

    mod download_tests {
        use super::*;

        fn raw_source(sha256: String) -> ToolSource {
            ToolSource::Download {
                url: "https://example.com/cargo-tarpaulin".to_string(),
                sha256,
                archive: ArchiveKind::Raw,
            }
        }

        #[tokio::test]
        async fn test_raw_download_verified_and_cached() {
            let temp = TempDir::new().unwrap();
            let fetcher = Arc::new(FakeFetcher::serving(BINARY.to_vec()));
            let installer = ToolInstaller::new(
                tool_config(&temp, raw_source(checksum::sha256_hex(BINARY))),
                fetcher.clone(),
                Arc::new(RecordingExecutor::passing()),
            )
            .with_platform(linux());

            let first = installer.acquire().await.unwrap();
            assert_eq!(first.origin, ToolOrigin::Downloaded);
            assert!(is_executable(&first.path));
            assert_eq!(first.path, installer.expected_path());

            let second = installer.acquire().await.unwrap();
            assert_eq!(second.origin, ToolOrigin::Cached);
            assert_eq!(fetcher.calls(), 1);
        }

        #[tokio::test]
        async fn test_checksum_mismatch_writes_nothing() {
            let temp = TempDir::new().unwrap();
            let installer = ToolInstaller::new(
                tool_config(&temp, raw_source(checksum::sha256_hex(b"something else"))),
                Arc::new(FakeFetcher::serving(BINARY.to_vec())),
                Arc::new(RecordingExecutor::passing()),
            )
            .with_platform(linux());

            let err = installer.acquire().await.unwrap_err();
            assert!(matches!(err, AcquisitionError::ChecksumMismatch { .. }));
            assert!(!installer.expected_path().exists());
            assert!(!temp.path().join("cache").exists());
        }

        #[tokio::test]
        async fn test_tampered_cache_is_refetched() {
            let temp = TempDir::new().unwrap();
            let fetcher = Arc::new(FakeFetcher::serving(BINARY.to_vec()));
            let installer = ToolInstaller::new(
                tool_config(&temp, raw_source(checksum::sha256_hex(BINARY))),
                fetcher.clone(),
                Arc::new(RecordingExecutor::passing()),
            )
            .with_platform(linux());

            let handle = installer.acquire().await.unwrap();
            std::fs::write(&handle.path, b"#!/bin/sh\nevil\n").unwrap();

            let again = installer.acquire().await.unwrap();
            assert_eq!(again.origin, ToolOrigin::Downloaded);
            assert_eq!(fetcher.calls(), 2);
            assert_eq!(std::fs::read(&again.path).unwrap(), BINARY);
        }

        #[tokio::test]
        async fn test_tarball_download() {
            let temp = TempDir::new().unwrap();
            let tgz = tarball(&[("cargo-tarpaulin", BINARY)]);
            let installer = ToolInstaller::new(
                tool_config(
                    &temp,
                    ToolSource::Download {
                        url: "https://example.com/t.tar.gz".to_string(),
                        sha256: checksum::sha256_hex(&tgz),
                        archive: ArchiveKind::TarGz,
                    },
                ),
                Arc::new(FakeFetcher::serving(tgz)),
                Arc::new(RecordingExecutor::passing()),
            )
            .with_platform(linux());

            let handle = installer.acquire().await.unwrap();
            assert_eq!(std::fs::read(&handle.path).unwrap(), BINARY);
        }

        #[tokio::test]
        async fn test_tampered_tarball_cache_is_refetched() {
            let temp = TempDir::new().unwrap();
            let tgz = tarball(&[("cargo-tarpaulin", BINARY)]);
            let fetcher = Arc::new(FakeFetcher::serving(tgz.clone()));
            let installer = ToolInstaller::new(
                tool_config(
                    &temp,
                    ToolSource::Download {
                        url: "https://example.com/t.tar.gz".to_string(),
                        sha256: checksum::sha256_hex(&tgz),
                        archive: ArchiveKind::TarGz,
                    },
                ),
                fetcher.clone(),
                Arc::new(RecordingExecutor::passing()),
            )
            .with_platform(linux());

            let handle = installer.acquire().await.unwrap();
            let again = installer.acquire().await.unwrap();
            assert_eq!(again.origin, ToolOrigin::Cached);
            assert_eq!(fetcher.calls(), 1);

            std::fs::write(&handle.path, b"#!/bin/sh\nevil\n").unwrap();
            let refetched = installer.acquire().await.unwrap();
            assert_eq!(refetched.origin, ToolOrigin::Downloaded);
            assert_eq!(fetcher.calls(), 2);
            assert_eq!(std::fs::read(&refetched.path).unwrap(), BINARY);
        }

        #[tokio::test]
        async fn test_marker_without_binary_digest_is_not_trusted() {
            let temp = TempDir::new().unwrap();
            let fetcher = Arc::new(FakeFetcher::serving(BINARY.to_vec()));
            let digest = checksum::sha256_hex(BINARY);
            let installer = ToolInstaller::new(
                tool_config(&temp, raw_source(digest.clone())),
                fetcher.clone(),
                Arc::new(RecordingExecutor::passing()),
            )
            .with_platform(linux());

            let handle = installer.acquire().await.unwrap();
            let marker = handle.path.parent().unwrap().join(DIGEST_MARKER);
            std::fs::write(&marker, &digest).unwrap();

            let again = installer.acquire().await.unwrap();
            assert_eq!(again.origin, ToolOrigin::Downloaded);
            assert_eq!(fetcher.calls(), 2);
        }

        #[tokio::test]
        async fn test_fetch_failure() {
            let temp = TempDir::new().unwrap();
            let installer = ToolInstaller::new(
                tool_config(&temp, raw_source(checksum::sha256_hex(BINARY))),
                Arc::new(FakeFetcher::unreachable()),
                Arc::new(RecordingExecutor::passing()),
            )
            .with_platform(linux());
            let err = installer.acquire().await.unwrap_err();
            assert!(matches!(err, AcquisitionError::Fetch { .. }));
        }

        #[tokio::test]
        async fn test_unsupported_platform() {
            let temp = TempDir::new().unwrap();
            let fetcher = Arc::new(FakeFetcher::serving(BINARY.to_vec()));
            let installer = ToolInstaller::new(
                tool_config(&temp, raw_source(checksum::sha256_hex(BINARY))),
                fetcher.clone(),
                Arc::new(RecordingExecutor::passing()),
            )
            .with_platform(Platform::new("windows", "x86_64"));
            let err = installer.acquire().await.unwrap_err();
            assert!(matches!(err, AcquisitionError::UnsupportedPlatform { .. }));
            assert_eq!(fetcher.calls(), 0);
        }
    }

    mod cargo_install_tests {
        use super::*;

        #[tokio::test]
        async fn test_runs_pinned_cargo_install() {
            let temp = TempDir::new().unwrap();
            let executor = Arc::new(RecordingExecutor::passing());
            let installer = ToolInstaller::new(
                tool_config(&temp, ToolSource::CargoInstall),
                Arc::new(FakeFetcher::unreachable()),
                executor.clone(),
            );

            let handle = installer.acquire().await.unwrap();
            assert_eq!(handle.origin, ToolOrigin::CargoInstalled);

            let calls = executor.invocations();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].program, PathBuf::from("cargo"));
            assert_eq!(calls[0].args[..2], ["install", "cargo-tarpaulin"]);
            assert_eq!(calls[0].arg_value("--version"), Some("0.31.2"));
            assert!(calls[0].has_arg("--locked"));
            assert_eq!(handle.path, installer.planned().path);
        }

        #[tokio::test]
        async fn test_reuses_installed_binary() {
            let temp = TempDir::new().unwrap();
            let executor = Arc::new(RecordingExecutor::passing());
            let installer = ToolInstaller::new(
                tool_config(&temp, ToolSource::CargoInstall),
                Arc::new(FakeFetcher::unreachable()),
                executor.clone(),
            );
            let _ = installer.acquire().await.unwrap();
            let again = installer.acquire().await.unwrap();
            assert_eq!(again.origin, ToolOrigin::Cached);
            assert_eq!(executor.invocations().len(), 1);
        }

        #[tokio::test]
        async fn test_install_that_leaves_no_binary() {
            let temp = TempDir::new().unwrap();
            let installer = ToolInstaller::new(
                tool_config(&temp, ToolSource::CargoInstall),
                Arc::new(FakeFetcher::unreachable()),
                Arc::new(RecordingExecutor::silent()),
            );
            let err = installer.acquire().await.unwrap_err();
            assert!(matches!(err, AcquisitionError::NotFound { .. }));
        }

        #[tokio::test]
        async fn test_cargo_missing() {
            let temp = TempDir::new().unwrap();
            let installer = ToolInstaller::new(
                tool_config(&temp, ToolSource::CargoInstall),
                Arc::new(FakeFetcher::unreachable()),
                Arc::new(RecordingExecutor::unspawnable()),
            );
            let err = installer.acquire().await.unwrap_err();
            assert!(err.to_string().contains("failed to run cargo"));
        }

        #[tokio::test]
        async fn test_cargo_install_failure() {
            let temp = TempDir::new().unwrap();
            let installer = ToolInstaller::new(
                tool_config(&temp, ToolSource::CargoInstall),
                Arc::new(FakeFetcher::unreachable()),
                Arc::new(RecordingExecutor::failing_on("install", 101)),
            );
            let err = installer.acquire().await.unwrap_err();
            assert!(matches!(err, AcquisitionError::Install { .. }));
            assert!(err.to_string().contains("exit code 101"));
        }
    }
}
