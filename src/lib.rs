//! snapshot-bisect library crate
//!
//! Binary search over prebuilt browser snapshots. The engine and prober
//! work against any [`store::ArtifactStore`]; the lifecycle manager keeps
//! launched snapshots from outliving the host.

pub mod bisect;
pub mod config;
pub mod crrev;
pub mod error;
pub mod evaluate;
pub mod lifecycle;
pub mod logging;
pub mod probe;
pub mod revision;
pub mod store;

pub use bisect::{BisectObserver, Bisector, FinalRange, Step, StopReason};
pub use error::{BisectError, CleanupWarning, Result};
pub use evaluate::{Evaluator, Outcome};
pub use revision::{Revision, SearchInterval};
