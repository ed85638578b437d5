//! Artifact store contract
//!
//! The store knows how to answer "is there a build for revision N" and how
//! to put one on disk. It owns no search logic; the prober and the engine
//! drive it.

pub mod platform;
pub mod snapshots;

pub use platform::Platform;
pub use snapshots::SnapshotStore;

use crate::error::Result;
use crate::revision::Revision;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Byte counts reported while a snapshot downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl Progress {
    /// Whole percent complete, when the server announced a length.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total?;
        if total == 0 {
            return Some(100);
        }
        let pct = self.downloaded.saturating_mul(100) / total;
        Some(pct.min(100) as u8)
    }
}

/// A snapshot available on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub revision: Revision,
    pub executable_path: PathBuf,
    /// Downloaded by this fetch, as opposed to already present locally.
    pub fresh: bool,
}

impl Artifact {
    pub fn executable_path(&self) -> &Path {
        &self.executable_path
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Cheap, side-effect free existence check against the remote index.
    async fn exists(&self, revision: Revision) -> bool;

    /// Whether the revision is already on local disk.
    fn is_local(&self, revision: Revision) -> bool;

    /// Put the revision on local disk. Failures are fatal to the run.
    async fn fetch(
        &self,
        revision: Revision,
        on_progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> Result<Artifact>;

    /// Best-effort removal of a local snapshot. Failures are only logged.
    async fn remove(&self, revision: Revision);
}
