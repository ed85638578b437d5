//! Bisection engine
//!
//! Narrows a `(good, bad)` pair until no downloadable snapshot remains
//! strictly between the two. Each iteration asks the prober for the
//! available revision nearest the midpoint, fetches it, evaluates it and
//! moves one bound onto it. Iterations are strictly sequential: the next
//! midpoint depends on the previous outcome.

use crate::error::{BisectError, Result};
use crate::evaluate::{Evaluator, Outcome};
use crate::probe::find_nearest_available;
use crate::revision::{Revision, SearchInterval};
use crate::store::{ArtifactStore, Progress};

/// Record of one evaluated revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub revision: Revision,
    pub outcome: Outcome,
    /// Interval after applying the outcome.
    pub interval: SearchInterval,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "- r{} was {}. Bisecting {} - {} revisions and ~{} iterations",
            self.revision,
            self.outcome,
            self.interval,
            self.interval.span(),
            self.interval.estimated_iterations()
        )
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `good == bad`.
    Collapsed,
    /// Nothing downloadable strictly between the bounds.
    NoCandidate,
}

/// Minimal bracketing interval and how it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalRange {
    pub interval: SearchInterval,
    pub steps: Vec<Step>,
    pub stop: StopReason,
}

impl FinalRange {
    pub fn good(&self) -> Revision {
        self.interval.good
    }

    pub fn bad(&self) -> Revision {
        self.interval.bad
    }
}

/// Observer for engine progress; the CLI renders these, tests ignore them.
pub trait BisectObserver: Send + Sync {
    fn on_step(&self, _step: &Step) {}
    fn on_download(&self, _revision: Revision, _progress: Progress) {}
}

/// Observer that discards every notification.
pub struct Silent;

impl BisectObserver for Silent {}

pub struct Bisector<'a, S: ArtifactStore + ?Sized> {
    store: &'a S,
    observer: &'a dyn BisectObserver,
}

impl<'a, S: ArtifactStore + ?Sized> Bisector<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            observer: &Silent,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn BisectObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Run the search. `good` and `bad` may be ordered either way.
    pub async fn run(
        &self,
        good: Revision,
        bad: Revision,
        evaluator: &mut dyn Evaluator,
    ) -> Result<FinalRange> {
        if good == bad {
            return Err(BisectError::InvalidRange(format!(
                "good and bad are both r{}",
                good
            )));
        }

        let mut interval = SearchInterval::new(good, bad);
        let mut steps = Vec::new();
        tracing::info!(%good, %bad, span = interval.span(), "starting bisection");

        let stop = loop {
            if interval.is_collapsed() {
                break StopReason::Collapsed;
            }

            let mid = interval.midpoint();
            let candidate =
                find_nearest_available(self.store, mid, interval.low(), interval.high()).await;
            let revision = match candidate {
                Some(r) if !interval.is_endpoint(r) => r,
                other => {
                    tracing::debug!(%mid, candidate = ?other, "interval cannot be narrowed further");
                    break StopReason::NoCandidate;
                }
            };

            let outcome = self.evaluate_revision(revision, evaluator).await?;
            match outcome {
                Outcome::Bad => interval.bad = revision,
                Outcome::Good => interval.good = revision,
            }

            let step = Step {
                revision,
                outcome,
                interval,
            };
            tracing::info!(%revision, ?outcome, span = interval.span(), "narrowed");
            self.observer.on_step(&step);
            steps.push(step);
        };

        Ok(FinalRange {
            interval,
            steps,
            stop,
        })
    }

    /// Fetch, evaluate and release one revision. A freshly downloaded
    /// snapshot is removed even when the evaluation fails.
    async fn evaluate_revision(
        &self,
        revision: Revision,
        evaluator: &mut dyn Evaluator,
    ) -> Result<Outcome> {
        let was_local = self.store.is_local(revision);
        let observer = self.observer;
        let artifact = self
            .store
            .fetch(revision, &move |progress| observer.on_download(revision, progress))
            .await?;

        let outcome = evaluator.evaluate(&artifact).await;

        if artifact.fresh && !was_local {
            self.store.remove(revision).await;
        }
        outcome
    }
}
