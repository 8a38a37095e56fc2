//! Conflict and resolution storage.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use duplex_core::{Conflict, ConflictId, ConflictResolution, ConflictStatus};

use crate::error::SyncError;

/// `get`/`put`/`list` access to conflicts plus the append-only resolution
/// audit trail.
pub trait ConflictStore: Send + Sync {
    fn get(&self, id: &ConflictId) -> Option<Conflict>;

    /// Insert or replace a conflict.
    fn put(&self, conflict: Conflict) -> Result<(), SyncError>;

    /// Every conflict, oldest first.
    fn list(&self) -> Vec<Conflict>;

    /// Move a pending conflict to `status`. Fails if the conflict is unknown
    /// or no longer pending, so a conflict leaves `Pending` at most once.
    fn transition(&self, id: &ConflictId, status: ConflictStatus)
        -> Result<Conflict, SyncError>;

    /// Attach a merge draft, only while the conflict is still pending.
    fn set_draft(&self, id: &ConflictId, draft: String) -> Result<Conflict, SyncError>;

    fn record_resolution(&self, resolution: ConflictResolution) -> Result<(), SyncError>;

    fn resolutions(&self) -> Vec<ConflictResolution>;
}

#[derive(Debug, Default)]
pub struct MemoryConflictStore {
    conflicts: RwLock<HashMap<ConflictId, Conflict>>,
    resolutions: RwLock<Vec<ConflictResolution>>,
}

impl MemoryConflictStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `change` under the write lock if the conflict is pending.
    fn update_pending(
        &self,
        id: &ConflictId,
        change: impl FnOnce(&mut Conflict),
    ) -> Result<Conflict, SyncError> {
        let mut conflicts = self.conflicts.write().unwrap_or_else(PoisonError::into_inner);
        let conflict = conflicts
            .get_mut(id)
            .ok_or_else(|| SyncError::ConflictNotFound(id.clone()))?;
        if conflict.status != ConflictStatus::Pending {
            return Err(SyncError::ConflictNotPending {
                id: id.clone(),
                status: conflict.status,
            });
        }
        change(conflict);
        Ok(conflict.clone())
    }
}

impl ConflictStore for MemoryConflictStore {
    fn get(&self, id: &ConflictId) -> Option<Conflict> {
        let conflicts = self.conflicts.read().unwrap_or_else(PoisonError::into_inner);
        conflicts.get(id).cloned()
    }

    fn put(&self, conflict: Conflict) -> Result<(), SyncError> {
        let mut conflicts = self.conflicts.write().unwrap_or_else(PoisonError::into_inner);
        conflicts.insert(conflict.id.clone(), conflict);
        Ok(())
    }

    fn list(&self) -> Vec<Conflict> {
        let conflicts = self.conflicts.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Conflict> = conflicts.values().cloned().collect();
        all.sort_by(|a, b| {
            a.detected_at
                .cmp(&b.detected_at)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        all
    }

    fn transition(
        &self,
        id: &ConflictId,
        status: ConflictStatus,
    ) -> Result<Conflict, SyncError> {
        self.update_pending(id, |conflict| conflict.status = status)
    }

    fn set_draft(&self, id: &ConflictId, draft: String) -> Result<Conflict, SyncError> {
        self.update_pending(id, |conflict| conflict.merge_draft = Some(draft))
    }

    fn record_resolution(&self, resolution: ConflictResolution) -> Result<(), SyncError> {
        let mut resolutions = self.resolutions.write().unwrap_or_else(PoisonError::into_inner);
        resolutions.push(resolution);
        Ok(())
    }

    fn resolutions(&self) -> Vec<ConflictResolution> {
        let resolutions = self.resolutions.read().unwrap_or_else(PoisonError::into_inner);
        resolutions.clone()
    }
}
