//! Availability prober
//!
//! Finds the revision nearest to a target that actually has a snapshot.
//! Each expansion step checks one revision below and one above the target
//! at the same time; the lower side wins when both are available.

use crate::revision::Revision;
use crate::store::ArtifactStore;
use futures::future::{self, Either};

/// Nearest revision to `target` within `[low, high]` that the store can
/// provide, or `None` when no revision in the range is available.
pub async fn find_nearest_available<S>(
    store: &S,
    target: Revision,
    low: Revision,
    high: Revision,
) -> Option<Revision>
where
    S: ArtifactStore + ?Sized,
{
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    let target = target.clamp(low, high);
    tracing::debug!(%target, %low, %high, "looking for an available snapshot");

    if probe(store, Some(target)).await {
        return Some(target);
    }

    let mut down = target;
    let mut up = target;
    loop {
        let next_down = down.prev().filter(|r| *r >= low);
        let next_up = up.next().filter(|r| *r <= high);
        if next_down.is_none() && next_up.is_none() {
            return None;
        }
        if let Some(r) = next_down {
            down = r;
        }
        if let Some(r) = next_up {
            up = r;
        }

        if let Some(found) = race_step(store, next_down, next_up).await {
            return Some(found);
        }
    }
}

/// Probe both fronts of one expansion step concurrently.
///
/// A successful downward probe settles the step immediately and the upward
/// future is dropped in flight. An upward success still has to wait for the
/// downward answer, since the lower revision takes precedence.
async fn race_step<S>(store: &S, down: Option<Revision>, up: Option<Revision>) -> Option<Revision>
where
    S: ArtifactStore + ?Sized,
{
    let down_probe = Box::pin(probe(store, down));
    let up_probe = Box::pin(probe(store, up));

    match future::select(down_probe, up_probe).await {
        Either::Left((true, _)) => down,
        Either::Left((false, pending_up)) => {
            if pending_up.await {
                up
            } else {
                None
            }
        }
        Either::Right((up_ok, pending_down)) => {
            if pending_down.await {
                down
            } else if up_ok {
                up
            } else {
                None
            }
        }
    }
}

async fn probe<S>(store: &S, revision: Option<Revision>) -> bool
where
    S: ArtifactStore + ?Sized,
{
    let Some(revision) = revision else {
        return false;
    };
    let available = store.exists(revision).await;
    tracing::debug!(%revision, available, "probe");
    available
}
