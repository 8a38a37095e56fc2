//! Conflict detection.
//!
//! Precedence, for every entry point:
//! 1. Checksum equality short-circuits (no-op / converged), whatever the
//!    clocks say.
//! 2. Vector-clock causality decides between a sequential update and a
//!    conflict.
//!
//! Detection is pure: it reads the prior [`SyncState`] and returns a verdict.
//! Persisting the verdict is the orchestrator's job.

use duplex_core::{
    fingerprint, ClockOrdering, ConflictType, EscalationPolicy, SyncState, VectorClock,
};

/// Verdict for a single-direction sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Content matches the last synced checksum.
    NoOp { checksum: String },
    /// Sequential update: the stored clock happened-before the incoming one.
    Accept { checksum: String, clock: VectorClock },
    /// The incoming edit was not based on the stored state.
    Escalate {
        checksum: String,
        clock: VectorClock,
        ordering: ClockOrdering,
    },
}

/// Check `content` written by `actor_id` against the prior state.
///
/// `base_clock` is the clock the writer last observed. When absent the writer
/// is assumed to have seen the stored state, which makes every changed
/// content a sequential update.
pub fn detect(
    state: Option<&SyncState>,
    content: &str,
    actor_id: &str,
    base_clock: Option<&VectorClock>,
) -> Detection {
    let checksum = fingerprint::checksum(content);
    if state.is_some_and(|s| s.last_sync_checksum == checksum) {
        return Detection::NoOp { checksum };
    }

    let stored = stored_clock(state);
    let clock = base_clock.unwrap_or(&stored).increment(actor_id);
    let ordering = stored.compare(&clock);
    tracing::debug!(
        actor = actor_id,
        stored = %stored,
        incoming = %clock,
        ?ordering,
        "single-direction detection",
    );

    match ordering {
        ClockOrdering::Before => Detection::Accept { checksum, clock },
        // Concurrent, or based on a state older than the stored one.
        ClockOrdering::Concurrent | ClockOrdering::After | ClockOrdering::Equal => {
            Detection::Escalate {
                checksum,
                clock,
                ordering,
            }
        }
    }
}

/// One side of a bidirectional sync.
#[derive(Debug, Clone, Copy)]
pub struct Replica<'a> {
    pub content: &'a str,
    /// Clock of this replica's current version, when the caller tracks one.
    pub clock: Option<&'a VectorClock>,
}

impl<'a> Replica<'a> {
    pub fn new(content: &'a str) -> Self {
        Self {
            content,
            clock: None,
        }
    }

    pub fn with_clock(mut self, clock: &'a VectorClock) -> Self {
        self.clock = Some(clock);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

/// Verdict for a bidirectional sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidiDetection {
    /// Both sides carry the same content. `changed` is false when it also
    /// matches the last synced checksum.
    Converged {
        checksum: String,
        clock: VectorClock,
        changed: bool,
    },
    /// Only one side moved on (causal escalation policy).
    FastForward {
        winner: Side,
        checksum: String,
        clock: VectorClock,
    },
    Escalate {
        conflict_type: ConflictType,
        local_checksum: String,
        remote_checksum: String,
        local_clock: VectorClock,
        remote_clock: VectorClock,
    },
}

/// Check both replicas at once.
///
/// Missing clocks are derived from the stored one: the local side is the
/// acting replica's next event, the remote side is the stored clock.
pub fn detect_bidirectional(
    state: Option<&SyncState>,
    local: Replica<'_>,
    remote: Replica<'_>,
    actor_id: &str,
    policy: EscalationPolicy,
) -> BidiDetection {
    let stored = stored_clock(state);
    let local_checksum = fingerprint::checksum(local.content);
    let remote_checksum = fingerprint::checksum(remote.content);
    let local_clock = local
        .clock
        .cloned()
        .unwrap_or_else(|| stored.increment(actor_id));
    let remote_clock = remote.clock.cloned().unwrap_or_else(|| stored.clone());
    let merged = stored.merge(&local_clock).merge(&remote_clock);

    if local_checksum == remote_checksum {
        let changed = state.map_or(true, |s| s.last_sync_checksum != local_checksum);
        return BidiDetection::Converged {
            checksum: local_checksum,
            clock: merged,
            changed,
        };
    }

    let ordering = local_clock.compare(&remote_clock);
    tracing::debug!(
        actor = actor_id,
        local = %local_clock,
        remote = %remote_clock,
        ?ordering,
        ?policy,
        "bidirectional detection",
    );

    if policy == EscalationPolicy::Causal {
        let winner = causal_winner(
            state,
            &local,
            &remote,
            ordering,
            &local_checksum,
            &remote_checksum,
        );
        if let Some(winner) = winner {
            let checksum = match winner {
                Side::Local => local_checksum,
                Side::Remote => remote_checksum,
            };
            return BidiDetection::FastForward {
                winner,
                checksum,
                clock: merged,
            };
        }
    }

    let conflict_type = if ordering.is_concurrent() {
        ConflictType::Concurrent
    } else {
        ConflictType::Content
    };
    BidiDetection::Escalate {
        conflict_type,
        local_checksum,
        remote_checksum,
        local_clock,
        remote_clock,
    }
}

fn causal_winner(
    state: Option<&SyncState>,
    local: &Replica<'_>,
    remote: &Replica<'_>,
    ordering: ClockOrdering,
    local_checksum: &str,
    remote_checksum: &str,
) -> Option<Side> {
    if local.clock.is_some() && remote.clock.is_some() {
        match ordering {
            ClockOrdering::After => return Some(Side::Local),
            ClockOrdering::Before => return Some(Side::Remote),
            ClockOrdering::Concurrent => return None,
            ClockOrdering::Equal => {}
        }
    }

    let last = state.map(|s| s.last_sync_checksum.as_str())?;
    match (local_checksum == last, remote_checksum == last) {
        (true, false) => Some(Side::Remote),
        (false, true) => Some(Side::Local),
        _ => None,
    }
}

fn stored_clock(state: Option<&SyncState>) -> VectorClock {
    state.map(|s| s.vector_clock.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state_for(content: &str, clock: VectorClock) -> SyncState {
        let checksum = fingerprint::checksum(content);
        SyncState {
            last_sync_checksum: checksum.clone(),
            last_sync_time: Utc::now(),
            version: 1,
            vector_clock: clock,
            base_content: Some(content.to_string()),
            base_checksum: Some(checksum),
        }
    }

    fn clock(pairs: &[(&str, u64)]) -> VectorClock {
        pairs.iter().map(|(a, c)| (*a, *c)).collect()
    }

    #[test]
    fn unchanged_checksum_wins_over_clock_state() {
        let state = state_for("hello", clock(&[("remote", 9)]));
        let stale = clock(&[("local", 1)]);
        let verdict = detect(Some(&state), "hello", "local", Some(&stale));
        assert!(matches!(verdict, Detection::NoOp { .. }));
    }

    #[test]
    fn cold_start_accepts() {
        let verdict = detect(None, "first", "local", None);
        match verdict {
            Detection::Accept { clock, .. } => assert_eq!(clock.get("local"), 1),
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn up_to_date_writer_is_sequential() {
        let state = state_for("v1", clock(&[("local", 1), ("remote", 2)]));
        let verdict = detect(Some(&state), "v2", "remote", None);
        match verdict {
            Detection::Accept { clock, .. } => {
                assert_eq!(clock.get("remote"), 3);
                assert_eq!(clock.get("local"), 1);
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn writer_that_missed_an_update_is_concurrent() {
        let state = state_for("v2", clock(&[("local", 1), ("remote", 1)]));
        let seen = clock(&[("local", 1)]);
        let verdict = detect(Some(&state), "v2-local", "local", Some(&seen));
        match verdict {
            Detection::Escalate { ordering, .. } => {
                assert_eq!(ordering, ClockOrdering::Concurrent)
            }
            other => panic!("expected escalate, got {other:?}"),
        }
    }

    #[test]
    fn replayed_old_write_escalates() {
        let state = state_for("v3", clock(&[("local", 3)]));
        let seen = clock(&[("local", 1)]);
        let verdict = detect(Some(&state), "old", "local", Some(&seen));
        assert!(matches!(verdict, Detection::Escalate { .. }));
    }

    #[test]
    fn identical_sides_converge_regardless_of_clocks() {
        let state = state_for("old", VectorClock::new());
        let a = clock(&[("local", 2)]);
        let b = clock(&[("remote", 2)]);
        let verdict = detect_bidirectional(
            Some(&state),
            Replica::new("same").with_clock(&a),
            Replica::new("same").with_clock(&b),
            "local",
            EscalationPolicy::Strict,
        );
        match verdict {
            BidiDetection::Converged { changed, clock, .. } => {
                assert!(changed);
                assert_eq!(clock.get("local"), 2);
                assert_eq!(clock.get("remote"), 2);
            }
            other => panic!("expected converged, got {other:?}"),
        }
    }

    #[test]
    fn strict_policy_escalates_sequential_mismatch_as_content() {
        let state = state_for("base", clock(&[("local", 1)]));
        let verdict = detect_bidirectional(
            Some(&state),
            Replica::new("local edit"),
            Replica::new("base"),
            "local",
            EscalationPolicy::Strict,
        );
        match verdict {
            BidiDetection::Escalate { conflict_type, .. } => {
                assert_eq!(conflict_type, ConflictType::Content)
            }
            other => panic!("expected escalate, got {other:?}"),
        }
    }

    #[test]
    fn causal_policy_fast_forwards_the_only_changed_side() {
        let state = state_for("base", clock(&[("local", 1)]));
        let verdict = detect_bidirectional(
            Some(&state),
            Replica::new("base"),
            Replica::new("remote edit"),
            "local",
            EscalationPolicy::Causal,
        );
        assert!(matches!(
            verdict,
            BidiDetection::FastForward {
                winner: Side::Remote,
                ..
            }
        ));
    }

    #[test]
    fn causal_policy_follows_dominating_clock() {
        let older = clock(&[("local", 1)]);
        let newer = clock(&[("local", 1), ("remote", 1)]);
        let verdict = detect_bidirectional(
            None,
            Replica::new("a").with_clock(&older),
            Replica::new("b").with_clock(&newer),
            "local",
            EscalationPolicy::Causal,
        );
        assert!(matches!(
            verdict,
            BidiDetection::FastForward {
                winner: Side::Remote,
                ..
            }
        ));
    }

    #[test]
    fn causal_policy_still_escalates_concurrent_clocks() {
        let a = clock(&[("local", 2)]);
        let b = clock(&[("remote", 1)]);
        let verdict = detect_bidirectional(
            None,
            Replica::new("a").with_clock(&a),
            Replica::new("b").with_clock(&b),
            "local",
            EscalationPolicy::Causal,
        );
        assert!(matches!(
            verdict,
            BidiDetection::Escalate {
                conflict_type: ConflictType::Concurrent,
                ..
            }
        ));
    }
}
