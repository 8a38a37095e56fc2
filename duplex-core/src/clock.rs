//! Vector clocks: per-actor causal counters.
//!
//! All operations are pure: they return new clocks and never mutate their
//! inputs. Actors absent from a clock count as zero.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Causal relationship between two clocks, from the point of view of the
/// left-hand clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockOrdering {
    /// Left happened-before right.
    Before,
    /// Right happened-before left.
    After,
    /// Identical counters for every actor.
    Equal,
    /// Neither dominates the other.
    Concurrent,
}

impl ClockOrdering {
    /// `true` for [`ClockOrdering::Concurrent`].
    pub fn is_concurrent(self) -> bool {
        matches!(self, ClockOrdering::Concurrent)
    }
}

/// Actor id → monotonically increasing counter.
///
/// Backed by a `BTreeMap` so serialization is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for `actor` (zero when unseen).
    pub fn get(&self, actor: &str) -> u64 {
        self.0.get(actor).copied().unwrap_or(0)
    }

    pub fn actors(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|&c| c == 0)
    }

    /// A copy of this clock with `actor`'s counter bumped by one.
    pub fn increment(&self, actor: &str) -> VectorClock {
        let mut next = self.0.clone();
        let counter = next.entry(actor.to_owned()).or_insert(0);
        *counter = counter.saturating_add(1);
        VectorClock(next)
    }

    /// Pointwise maximum over the union of both actor sets.
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut merged = self.0.clone();
        for (actor, &count) in &other.0 {
            let slot = merged.entry(actor.clone()).or_insert(0);
            *slot = (*slot).max(count);
        }
        VectorClock(merged)
    }

    /// Classify `self` against `other`.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;
        for actor in self.0.keys().chain(other.0.keys()) {
            match self.get(actor).cmp(&other.get(actor)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return ClockOrdering::Concurrent;
            }
        }
        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// `true` when `self` strictly happened-after `other`.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::After
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (actor, count)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{actor}:{count}")?;
        }
        f.write_str("}")
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        VectorClock(iter.into_iter().map(|(a, c)| (a.into(), c)).collect())
    }
}
