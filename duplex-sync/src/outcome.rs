//! What a sync call returned.

use duplex_core::{Conflict, ConflictResolution, SyncEventKind, SyncStatus};

/// Result of one sync operation.
///
/// A conflict is an outcome, not an error: it carries the stored conflict so
/// the caller can surface it or resolve it.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Content matched the last synced checksum. The sync is still recorded:
    /// version, sync time and clock advance and an event is logged.
    Unchanged { status: SyncStatus },
    /// State advanced. `content` is what both replicas now hold.
    Synced {
        status: SyncStatus,
        content: String,
        kind: SyncEventKind,
    },
    /// Escalated to a pending conflict.
    Conflict { status: SyncStatus, conflict: Conflict },
    /// The remote rejected the write or the state moved underneath us.
    Failed { status: SyncStatus, reason: String },
}

impl SyncOutcome {
    pub fn status(&self) -> &SyncStatus {
        match self {
            SyncOutcome::Unchanged { status }
            | SyncOutcome::Synced { status, .. }
            | SyncOutcome::Conflict { status, .. }
            | SyncOutcome::Failed { status, .. } => status,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. } | SyncOutcome::Unchanged { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncOutcome::Conflict { .. })
    }

    /// Content both replicas should now hold, when the sync advanced state.
    pub fn resolved_content(&self) -> Option<&str> {
        match self {
            SyncOutcome::Synced { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            SyncOutcome::Conflict { conflict, .. } => Some(conflict),
            _ => None,
        }
    }
}

/// Result of [`resolve_conflict`](crate::SyncOrchestrator::resolve_conflict).
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(ConflictResolution),
    /// The requested merge overlapped. The conflict is still pending and
    /// carries the marker draft in `merge_draft`.
    Drafted(Conflict),
}

impl ResolveOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolveOutcome::Resolved(_))
    }

    pub fn resolution(&self) -> Option<&ConflictResolution> {
        match self {
            ResolveOutcome::Resolved(resolution) => Some(resolution),
            ResolveOutcome::Drafted(_) => None,
        }
    }

    pub fn into_resolution(self) -> Option<ConflictResolution> {
        match self {
            ResolveOutcome::Resolved(resolution) => Some(resolution),
            ResolveOutcome::Drafted(_) => None,
        }
    }

    /// The still-pending conflict, when the merge left a draft.
    pub fn drafted(&self) -> Option<&Conflict> {
        match self {
            ResolveOutcome::Drafted(conflict) => Some(conflict),
            ResolveOutcome::Resolved(_) => None,
        }
    }
}
