//! HTTP snapshot store
//!
//! Snapshots live in a bucket laid out as
//! `{base}/{platform folder}/{revision}/{archive}.zip`, with the newest
//! revision number published at `{base}/{platform folder}/LAST_CHANGE`.
//! Downloads are unpacked into `{cache}/{platform}-{revision}/`.

use super::{Artifact, ArtifactStore, Platform, Progress};
use crate::error::{BisectError, CleanupWarning, Result};
use crate::revision::Revision;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com/chromium-browser-snapshots";

const USER_AGENT: &str = concat!("snapshot-bisect/", env!("CARGO_PKG_VERSION"));
const PROBE_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 15;

pub struct SnapshotStore {
    client: reqwest::Client,
    base_url: String,
    platform: Platform,
    cache_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(base_url: &str, platform: Platform, cache_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let parsed = url::Url::parse(base_url)
            .with_context(|| format!("Invalid snapshot base URL: {}", base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Snapshot base URL must be http(s): {}", base_url);
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            platform,
            cache_dir: cache_dir.into(),
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn archive_url(&self, revision: Revision) -> String {
        format!(
            "{}/{}/{}/{}.zip",
            self.base_url,
            self.platform.folder(),
            revision,
            self.platform.archive_name(revision)
        )
    }

    fn last_change_url(&self) -> String {
        format!("{}/{}/LAST_CHANGE", self.base_url, self.platform.folder())
    }

    /// Folder the revision is unpacked into.
    pub fn revision_dir(&self, revision: Revision) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}", self.platform.as_str(), revision))
    }

    pub fn executable_path(&self, revision: Revision) -> PathBuf {
        self.revision_dir(revision)
            .join(self.platform.relative_executable_path(revision))
    }

    /// Newest revision published for this platform.
    pub async fn latest_revision(&self) -> Result<Revision> {
        let url = self.last_change_url();
        let body = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BisectError::Metadata(format!("{}: {}", url, e)))?
            .text()
            .await
            .map_err(|e| BisectError::Metadata(format!("{}: {}", url, e)))?;

        body.parse::<Revision>()
            .map_err(|_| BisectError::Metadata(format!("unexpected LAST_CHANGE body: {:?}", body.trim())))
    }

    async fn download_archive(
        &self,
        revision: Revision,
        archive: &mut tokio::fs::File,
        on_progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> Result<()> {
        let url = self.archive_url(revision);
        tracing::debug!(%revision, %url, "downloading snapshot");

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BisectError::download(revision, e.to_string()))?;

        let total = response.content_length();
        let mut downloaded = 0u64;
        on_progress(Progress { downloaded, total });

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| BisectError::download(revision, e.to_string()))?
        {
            archive
                .write_all(&chunk)
                .await
                .map_err(|e| BisectError::download(revision, e.to_string()))?;
            downloaded += chunk.len() as u64;
            on_progress(Progress { downloaded, total });
        }

        archive
            .flush()
            .await
            .map_err(|e| BisectError::download(revision, e.to_string()))
    }
}

#[async_trait]
impl ArtifactStore for SnapshotStore {
    async fn exists(&self, revision: Revision) -> bool {
        let url = self.archive_url(revision);
        match self
            .client
            .head(&url)
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(%revision, error = %err, "existence check failed");
                false
            }
        }
    }

    fn is_local(&self, revision: Revision) -> bool {
        self.revision_dir(revision).is_dir()
    }

    async fn fetch(
        &self,
        revision: Revision,
        on_progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> Result<Artifact> {
        let folder = self.revision_dir(revision);
        let executable_path = self.executable_path(revision);

        if folder.is_dir() {
            tracing::debug!(%revision, path = %folder.display(), "using cached snapshot");
            return Ok(Artifact {
                revision,
                executable_path,
                fresh: false,
            });
        }

        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| BisectError::download(revision, format!("create cache dir: {}", e)))?;

        // Removed on drop, so an aborted download never lingers in the cache.
        let archive = tempfile::Builder::new()
            .prefix(&format!(".{}-{}-", self.platform, revision))
            .suffix(".zip")
            .tempfile_in(&self.cache_dir)
            .map_err(|e| BisectError::download(revision, format!("create archive file: {}", e)))?;
        let handle = archive
            .as_file()
            .try_clone()
            .map_err(|e| BisectError::download(revision, e.to_string()))?;
        let mut file = tokio::fs::File::from_std(handle);

        self.download_archive(revision, &mut file, on_progress).await?;
        drop(file);

        let archive_path = archive.path().to_path_buf();
        let target = folder.clone();
        tokio::task::spawn_blocking(move || extract_archive(&archive_path, &target))
            .await
            .map_err(|e| BisectError::download(revision, format!("extract task failed: {}", e)))?
            .map_err(|e| BisectError::download(revision, e))?;

        if !executable_path.exists() {
            tracing::warn!(
                %revision,
                path = %executable_path.display(),
                "snapshot unpacked but executable not found at the expected path"
            );
        }

        Ok(Artifact {
            revision,
            executable_path,
            fresh: true,
        })
    }

    async fn remove(&self, revision: Revision) {
        let folder = self.revision_dir(revision);
        if let Err(source) = tokio::fs::remove_dir_all(&folder).await {
            CleanupWarning::RemoveArtifact { revision, source }.log();
        } else {
            tracing::debug!(%revision, "removed snapshot");
        }
    }
}

/// Unpack into a sibling staging folder, then rename into place so a
/// revision folder only ever appears complete.
fn extract_archive(archive_path: &Path, target: &Path) -> std::result::Result<(), String> {
    let staging = target.with_extension("partial");
    if staging.exists() {
        let _ = fs::remove_dir_all(&staging);
    }

    let file = fs::File::open(archive_path).map_err(|e| format!("open archive: {}", e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| format!("read archive: {}", e))?;
    if let Err(err) = zip.extract(&staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(format!("extract archive: {}", err));
    }

    fs::rename(&staging, target).map_err(|e| {
        let _ = fs::remove_dir_all(&staging);
        format!("move snapshot into place: {}", e)
    })
}
