//! End-to-end search driven by a shell evaluator over a sparse local store.
#![cfg(unix)]

use async_trait::async_trait;
use snapshot_bisect::bisect::{Bisector, StopReason};
use snapshot_bisect::evaluate::{ScriptCommand, ScriptedEvaluator};
use snapshot_bisect::revision::Revision;
use snapshot_bisect::store::{Artifact, ArtifactStore, Progress};
use snapshot_bisect::{BisectError, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;

/// Snapshots are marker files named after their revision.
struct DirStore {
    root: PathBuf,
    available: BTreeSet<u64>,
    preexisting: BTreeSet<u64>,
    removed: Mutex<Vec<u64>>,
}

impl DirStore {
    fn path(&self, revision: Revision) -> PathBuf {
        self.root.join(revision.to_string())
    }
}

#[async_trait]
impl ArtifactStore for DirStore {
    async fn exists(&self, revision: Revision) -> bool {
        self.available.contains(&revision.get())
    }

    fn is_local(&self, revision: Revision) -> bool {
        self.path(revision).exists()
    }

    async fn fetch(
        &self,
        revision: Revision,
        on_progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> Result<Artifact> {
        if !self.available.contains(&revision.get()) {
            return Err(BisectError::download(revision, "not published"));
        }
        let path = self.path(revision);
        let fresh = !path.exists();
        if fresh {
            std::fs::write(&path, revision.to_string())
                .map_err(|e| BisectError::download(revision, e.to_string()))?;
        }
        on_progress(Progress {
            downloaded: 1,
            total: Some(1),
        });
        Ok(Artifact {
            revision,
            executable_path: path,
            fresh,
        })
    }

    async fn remove(&self, revision: Revision) {
        let _ = std::fs::remove_file(self.path(revision));
        self.removed.lock().unwrap().push(revision.get());
    }
}

#[tokio::test]
async fn test_shell_evaluator_finds_regression() {
    let tmp = tempfile::tempdir().unwrap();
    let available: BTreeSet<u64> = (1000..=1100).filter(|r| r % 7 != 0).collect();
    let preexisting: BTreeSet<u64> = [1051].into_iter().collect();
    for r in &preexisting {
        std::fs::write(tmp.path().join(r.to_string()), r.to_string()).unwrap();
    }
    let store = DirStore {
        root: tmp.path().to_path_buf(),
        available,
        preexisting,
        removed: Mutex::new(Vec::new()),
    };

    // Regressed in 1064, which has no snapshot (1064 = 7 * 152).
    let check = r#"test "$(cat "$CHROME_PATH")" -lt 1064"#;
    let mut evaluator = ScriptedEvaluator::new(ScriptCommand::Shell(check.to_string()));

    let result = Bisector::new(&store)
        .run(Revision(1000), Revision(1100), &mut evaluator)
        .await
        .unwrap();

    assert_eq!(result.good(), Revision(1063));
    assert_eq!(result.bad(), Revision(1065));
    assert_eq!(result.stop, StopReason::NoCandidate);

    // Only downloads made by this run are released.
    for r in store.preexisting.iter() {
        assert!(tmp.path().join(r.to_string()).exists());
        assert!(!store.removed.lock().unwrap().contains(r));
    }
    let left: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
    assert_eq!(left.len(), store.preexisting.len());
}

#[tokio::test]
async fn test_missing_evaluator_aborts_run() {
    let tmp = tempfile::tempdir().unwrap();
    let store = DirStore {
        root: tmp.path().to_path_buf(),
        available: (0..=10).collect(),
        preexisting: BTreeSet::new(),
        removed: Mutex::new(Vec::new()),
    };
    let mut evaluator =
        ScriptedEvaluator::new(ScriptCommand::Script(PathBuf::from("/no/such/check")));

    let err = Bisector::new(&store)
        .run(Revision(0), Revision(10), &mut evaluator)
        .await
        .unwrap_err();
    assert!(matches!(err, BisectError::EvaluationSpawn { .. }));
    assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
}
