//! Revision numbers and the good/bad search interval
//!
//! Snapshot histories are linear and integer indexed, but the interval may
//! be given in either direction: a regression search has `good < bad`, a
//! "find the fix" search has `good > bad`. Everything here works on the
//! absolute span so callers never have to normalize.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Integer identifier of a build snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    pub fn get(self) -> u64 {
        self.0
    }

    /// One step towards zero, or `None` at the bottom of the index space.
    pub fn prev(self) -> Option<Revision> {
        self.0.checked_sub(1).map(Revision)
    }

    pub fn next(self) -> Option<Revision> {
        self.0.checked_add(1).map(Revision)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Revision(value)
    }
}

impl FromStr for Revision {
    type Err = std::num::ParseIntError;

    /// Accepts `123456` as well as the `r123456` spelling used in reports.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('r').unwrap_or(trimmed);
        digits.parse().map(Revision)
    }
}

/// Current known-good and known-bad bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchInterval {
    pub good: Revision,
    pub bad: Revision,
}

impl SearchInterval {
    pub fn new(good: Revision, bad: Revision) -> Self {
        Self { good, bad }
    }

    pub fn low(&self) -> Revision {
        self.good.min(self.bad)
    }

    pub fn high(&self) -> Revision {
        self.good.max(self.bad)
    }

    /// Absolute distance between the bounds.
    pub fn span(&self) -> u64 {
        self.good.0.abs_diff(self.bad.0)
    }

    pub fn is_collapsed(&self) -> bool {
        self.good == self.bad
    }

    /// `round((good + bad) / 2)` with halves rounding up, computed without
    /// overflowing for revisions near `u64::MAX`.
    pub fn midpoint(&self) -> Revision {
        let low = self.low().0;
        let span = self.span();
        Revision(low + span / 2 + span % 2)
    }

    /// True when `revision` lies inside `[low, high]`.
    pub fn contains(&self, revision: Revision) -> bool {
        self.low() <= revision && revision <= self.high()
    }

    /// True when `revision` is one of the two current bounds.
    pub fn is_endpoint(&self, revision: Revision) -> bool {
        revision == self.good || revision == self.bad
    }

    /// Rough number of remaining iterations: bit length of the span.
    pub fn estimated_iterations(&self) -> u32 {
        u64::BITS - self.span().leading_zeros()
    }
}

impl fmt::Display for SearchInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low(), self.high())
    }
}
