//! Sync orchestrator: the public entry point.
//!
//! Every operation runs to completion on the calling task. State reads hit
//! the store's in-memory view; state writes go through `spawn_blocking`
//! because the file-backed store does synchronous I/O.
//!
//! Per-artifact state machine:
//!
//! ```text
//! no-state ──sync──▶ synced ◀──resolve── conflict
//!                      │                    ▲
//!                      └──────escalate──────┘
//! ```
//!
//! `error` is reachable from any operation and never touches `SyncState`,
//! so retrying is always safe.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use duplex_core::{
    fingerprint, ArtifactKey, ArtifactRef, Conflict, ConflictId, ConflictResolution,
    ConflictStatus, ConflictType, ResolutionStrategy, StatusKind, SyncConfig, SyncDirection,
    SyncEvent, SyncEventKind, SyncState, SyncStatus, VectorClock,
};

use crate::conflict_store::{ConflictStore, MemoryConflictStore};
use crate::detector::{self, BidiDetection, Detection, Replica, Side};
use crate::error::SyncError;
use crate::merge::{self, MergeDecision, MergeEngine, MergeOutcome};
use crate::outcome::{ResolveOutcome, SyncOutcome};
use crate::remote::{self, RemoteApplier};
use crate::state_store::{JsonFileStateStore, MemoryStateStore, SyncStateStore};

/// Oldest events are dropped past this many.
pub const EVENT_LOG_CAPACITY: usize = 1024;

/// One single-direction write.
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    pub artifact: &'a ArtifactRef,
    pub content: &'a str,
    pub actor_id: &'a str,
    /// Clock the writer last observed. `None` means "the stored state".
    pub base_clock: Option<&'a VectorClock>,
}

impl<'a> SyncRequest<'a> {
    pub fn new(artifact: &'a ArtifactRef, content: &'a str, actor_id: &'a str) -> Self {
        Self {
            artifact,
            content,
            actor_id,
            base_clock: None,
        }
    }

    pub fn based_on(mut self, clock: &'a VectorClock) -> Self {
        self.base_clock = Some(clock);
        self
    }
}

pub struct SyncOrchestrator {
    config: SyncConfig,
    engine: MergeEngine,
    states: Arc<dyn SyncStateStore>,
    conflicts: Arc<dyn ConflictStore>,
    remote: Arc<dyn RemoteApplier>,
    events: RwLock<VecDeque<SyncEvent>>,
    /// Last failure per artifact, cleared by the next successful call.
    errors: RwLock<HashMap<ArtifactKey, String>>,
}

impl SyncOrchestrator {
    /// Build an orchestrator from configuration.
    ///
    /// With a `storage_root` the state store is file-backed and loaded
    /// eagerly; if the root cannot be opened the orchestrator logs a warning
    /// and runs on an in-memory store.
    pub async fn open(
        config: SyncConfig,
        remote: Arc<dyn RemoteApplier>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let states: Arc<dyn SyncStateStore> = match config.storage_root.clone() {
            Some(root) => {
                let opened = tokio::task::spawn_blocking(move || JsonFileStateStore::open(root))
                    .await
                    .map_err(|err| SyncError::Join(format!("state store open: {err}")))?;
                match opened {
                    Ok(store) => {
                        tracing::info!(
                            root = %store.root().display(),
                            records = store.list().len(),
                            "loaded sync state",
                        );
                        Arc::new(store)
                    }
                    Err(SyncError::Io { path, source }) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %source,
                            "state store unavailable; sync state will not be durable",
                        );
                        Arc::new(MemoryStateStore::new())
                    }
                    Err(err) => return Err(err),
                }
            }
            None => Arc::new(MemoryStateStore::new()),
        };

        Self::with_stores(config, states, Arc::new(MemoryConflictStore::new()), remote)
    }

    /// Build an orchestrator over caller-supplied stores.
    pub fn with_stores(
        config: SyncConfig,
        states: Arc<dyn SyncStateStore>,
        conflicts: Arc<dyn ConflictStore>,
        remote: Arc<dyn RemoteApplier>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            engine: MergeEngine::new(config.strategy),
            config,
            states,
            conflicts,
            remote,
            events: RwLock::new(VecDeque::new()),
            errors: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Single-direction sync
    // -----------------------------------------------------------------------

    /// Push local content to the remote replica, then record it as synced.
    ///
    /// The remote write gates the state update: if it fails after all
    /// retries the outcome is `Failed` and the state is untouched.
    pub async fn sync_to_remote(&self, request: SyncRequest<'_>) -> Result<SyncOutcome, SyncError> {
        self.sync_one_way(SyncDirection::ToRemote, request).await
    }

    /// Record content that arrived from the remote replica.
    pub async fn sync_from_remote(
        &self,
        request: SyncRequest<'_>,
    ) -> Result<SyncOutcome, SyncError> {
        self.sync_one_way(SyncDirection::FromRemote, request).await
    }

    async fn sync_one_way(
        &self,
        direction: SyncDirection,
        request: SyncRequest<'_>,
    ) -> Result<SyncOutcome, SyncError> {
        let artifact = request.artifact;
        let key = artifact.key();
        let state = self.states.get(&key);

        let detection = detector::detect(
            state.as_ref(),
            request.content,
            request.actor_id,
            request.base_clock,
        );

        match detection {
            Detection::NoOp { checksum } => {
                tracing::debug!(artifact = %key, %direction, "content unchanged");
                let stored = state
                    .as_ref()
                    .map(|s| s.vector_clock.clone())
                    .unwrap_or_default();
                let clock = match request.base_clock {
                    Some(seen) => stored.merge(seen),
                    None => stored,
                };
                let next = next_state(state.as_ref(), request.content, checksum, clock);
                let expected = state.map(|s| s.last_sync_checksum);
                self.advance(
                    artifact,
                    direction,
                    expected,
                    next,
                    request.content,
                    SyncEventKind::Unchanged,
                    request.actor_id,
                )
                .await
            }
            Detection::Accept { checksum, clock } => {
                if direction == SyncDirection::ToRemote {
                    if let Err(err) = self.push(artifact, request.content).await {
                        return Ok(self.failed(artifact, direction, &err).await);
                    }
                }
                let next = next_state(state.as_ref(), request.content, checksum, clock);
                let expected = state.map(|s| s.last_sync_checksum);
                self.advance(
                    artifact,
                    direction,
                    expected,
                    next,
                    request.content,
                    SyncEventKind::Applied,
                    request.actor_id,
                )
                .await
            }
            Detection::Escalate {
                checksum,
                clock,
                ordering,
            } => {
                tracing::info!(
                    artifact = %key,
                    %direction,
                    ?ordering,
                    "edit not based on the synced state; raising conflict",
                );
                let stored_clock = state
                    .as_ref()
                    .map(|s| s.vector_clock.clone())
                    .unwrap_or_default();
                let baseline = state.as_ref().and_then(|s| s.base_content.clone());
                let synced = Incoming {
                    content: baseline.clone().unwrap_or_default(),
                    checksum: state
                        .as_ref()
                        .map(|s| s.last_sync_checksum.clone())
                        .unwrap_or_default(),
                    clock: stored_clock,
                };
                let incoming = Incoming {
                    content: request.content.to_string(),
                    checksum,
                    clock,
                };
                // The incoming side is whichever replica wrote; the other side
                // is the last synced content.
                let (local, remote) = match direction {
                    SyncDirection::FromRemote => (synced, incoming),
                    _ => (incoming, synced),
                };
                let conflict = new_conflict(
                    artifact,
                    direction,
                    request.actor_id,
                    ConflictType::Concurrent,
                    baseline,
                    local,
                    remote,
                );
                self.raise(conflict).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Bidirectional sync
    // -----------------------------------------------------------------------

    /// Reconcile both replicas at once.
    ///
    /// Identical content converges without consulting clocks. Otherwise the
    /// mismatch is escalated to a conflict and, unless the strategy is
    /// manual, handed to the merge engine.
    pub async fn bidirectional_sync(
        &self,
        artifact: &ArtifactRef,
        local: Replica<'_>,
        remote: Replica<'_>,
        actor_id: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let direction = SyncDirection::Bidirectional;
        let key = artifact.key();
        let state = self.states.get(&key);
        let expected = state.as_ref().map(|s| s.last_sync_checksum.clone());

        let detection = detector::detect_bidirectional(
            state.as_ref(),
            local,
            remote,
            actor_id,
            self.config.escalation,
        );

        match detection {
            BidiDetection::Converged {
                changed: false, ..
            } => {
                self.supersede_pending(artifact, None);
                self.clear_error(&key).await;
                Ok(SyncOutcome::Unchanged {
                    status: self.status_of(artifact, Some(direction)).await,
                })
            }
            BidiDetection::Converged {
                checksum, clock, ..
            } => {
                let next = next_state(state.as_ref(), local.content, checksum, clock);
                self.advance(
                    artifact,
                    direction,
                    expected,
                    next,
                    local.content,
                    SyncEventKind::Converged,
                    actor_id,
                )
                .await
            }
            BidiDetection::FastForward {
                winner,
                checksum,
                clock,
            } => {
                let content = match winner {
                    Side::Local => {
                        if let Err(err) = self.push(artifact, local.content).await {
                            return Ok(self.failed(artifact, direction, &err).await);
                        }
                        local.content
                    }
                    Side::Remote => remote.content,
                };
                tracing::debug!(artifact = %key, ?winner, "fast-forwarding newer side");
                let next = next_state(state.as_ref(), content, checksum, clock);
                self.advance(
                    artifact,
                    direction,
                    expected,
                    next,
                    content,
                    SyncEventKind::Applied,
                    actor_id,
                )
                .await
            }
            BidiDetection::Escalate {
                conflict_type,
                local_checksum,
                remote_checksum,
                local_clock,
                remote_clock,
            } => {
                let baseline = state.as_ref().and_then(|s| s.base_content.clone());
                let mut conflict = new_conflict(
                    artifact,
                    direction,
                    actor_id,
                    conflict_type,
                    baseline,
                    Incoming {
                        content: local.content.to_string(),
                        checksum: local_checksum,
                        clock: local_clock,
                    },
                    Incoming {
                        content: remote.content.to_string(),
                        checksum: remote_checksum,
                        clock: remote_clock,
                    },
                );

                match self.engine.resolve(&conflict) {
                    MergeDecision::Manual => self.raise(conflict).await,
                    MergeDecision::Markers { draft } => {
                        conflict.merge_draft = Some(draft);
                        self.raise(conflict).await
                    }
                    MergeDecision::Resolved { content, strategy } => {
                        self.auto_resolve(state.as_ref(), conflict, content, strategy)
                            .await
                    }
                }
            }
        }
    }

    /// Store a pending conflict and report it.
    ///
    /// An artifact has at most one pending conflict. If the pending one is
    /// for the same pair of checksums it is returned unchanged; otherwise the
    /// new conflict replaces it and the old one is marked ignored.
    async fn raise(&self, conflict: Conflict) -> Result<SyncOutcome, SyncError> {
        let open = self
            .get_pending_conflicts(Some(&conflict.artifact))
            .into_iter()
            .find(|c| {
                c.local_checksum == conflict.local_checksum
                    && c.remote_checksum == conflict.remote_checksum
            });
        if let Some(open) = open {
            tracing::debug!(
                artifact = %open.artifact,
                conflict = %open.id,
                "same conflict already pending",
            );
            self.clear_error(&open.artifact.key()).await;
            return Ok(SyncOutcome::Conflict {
                status: self.status_of(&open.artifact, Some(conflict.direction)).await,
                conflict: open,
            });
        }

        tracing::info!(
            artifact = %conflict.artifact,
            conflict = %conflict.id,
            conflict_type = %conflict.conflict_type,
            strategy = %self.engine.strategy(),
            "conflict raised",
        );
        self.conflicts.put(conflict.clone())?;
        self.supersede_pending(&conflict.artifact, Some(&conflict.id));
        self.clear_error(&conflict.artifact.key()).await;
        Ok(SyncOutcome::Conflict {
            status: self.status_of(&conflict.artifact, Some(conflict.direction)).await,
            conflict,
        })
    }

    /// Apply an automatic resolution produced during a bidirectional sync.
    async fn auto_resolve(
        &self,
        state: Option<&SyncState>,
        mut conflict: Conflict,
        content: String,
        strategy: ResolutionStrategy,
    ) -> Result<SyncOutcome, SyncError> {
        let artifact = conflict.artifact.clone();
        let direction = conflict.direction;
        let checksum = fingerprint::checksum(&content);

        if checksum != conflict.remote_checksum {
            if let Err(err) = self.push(&artifact, &content).await {
                return Ok(self.failed(&artifact, direction, &err).await);
            }
        }

        let clock = merged_clock(state, &conflict);
        let next = next_state(state, &content, checksum, clock);
        let expected = state.map(|s| s.last_sync_checksum.clone());
        let outcome = self
            .advance(
                &artifact,
                direction,
                expected,
                next,
                &content,
                SyncEventKind::Merged,
                &conflict.actor_id,
            )
            .await?;
        if !outcome.is_synced() {
            return Ok(outcome);
        }

        conflict.status = ConflictStatus::Resolved;
        let resolution = ConflictResolution {
            conflict_id: conflict.id.clone(),
            strategy,
            resolved_content: content,
            resolved_by: format!("system:{}", self.engine.strategy()),
            resolved_at: Utc::now(),
        };
        tracing::info!(
            artifact = %artifact,
            conflict = %conflict.id,
            %strategy,
            "conflict resolved automatically",
        );
        self.conflicts.put(conflict)?;
        self.conflicts.record_resolution(resolution)?;
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Conflict lifecycle
    // -----------------------------------------------------------------------

    /// Resolve a pending conflict.
    ///
    /// `resolved_content` is required for [`ResolutionStrategy::Manual`] and
    /// ignored otherwise. A merge strategy whose merge overlaps does not
    /// resolve: the conflict stays pending with the marker draft attached and
    /// comes back as [`ResolveOutcome::Drafted`]. A conflict is resolved at
    /// most once; later attempts fail with [`SyncError::ConflictNotPending`].
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        resolved_content: Option<&str>,
        resolved_by: &str,
    ) -> Result<ResolveOutcome, SyncError> {
        let conflict = self
            .conflicts
            .get(id)
            .ok_or_else(|| SyncError::ConflictNotFound(id.clone()))?;
        if !conflict.is_pending() {
            return Err(SyncError::ConflictNotPending {
                id: id.clone(),
                status: conflict.status,
            });
        }

        let merged = match strategy {
            ResolutionStrategy::KeepLocal => MergeOutcome::Clean(conflict.local_content.clone()),
            ResolutionStrategy::KeepRemote => MergeOutcome::Clean(conflict.remote_content.clone()),
            ResolutionStrategy::Merge => {
                merge::two_way(&conflict.local_content, &conflict.remote_content)
            }
            ResolutionStrategy::ThreeWay => merge::three_way_or_two_way(
                conflict.base_content.as_deref(),
                &conflict.local_content,
                &conflict.remote_content,
            ),
            ResolutionStrategy::Manual => MergeOutcome::Clean(
                resolved_content
                    .map(str::to_owned)
                    .ok_or_else(|| SyncError::MissingResolvedContent(id.clone()))?,
            ),
        };
        let content = match merged {
            MergeOutcome::Clean(content) => content,
            MergeOutcome::Conflicted { draft, regions } => {
                tracing::info!(
                    artifact = %conflict.artifact,
                    conflict = %id,
                    %strategy,
                    regions,
                    "merge overlaps; conflict stays pending with a draft",
                );
                let drafted = self.conflicts.set_draft(id, draft)?;
                return Ok(ResolveOutcome::Drafted(drafted));
            }
        };

        // Claim the conflict before any side effect so concurrent resolvers
        // cannot both apply.
        self.conflicts.transition(id, ConflictStatus::Resolved)?;

        let artifact = &conflict.artifact;
        let key = artifact.key();
        let checksum = fingerprint::checksum(&content);

        if checksum != conflict.remote_checksum {
            if let Err(err) = self.push(artifact, &content).await {
                self.reopen(&conflict);
                self.record_error(&key, &err).await;
                return Err(err);
            }
        }

        let state = self.states.get(&key);
        let clock = merged_clock(state.as_ref(), &conflict);
        let next = next_state(state.as_ref(), &content, checksum.clone(), clock);
        let version = next.version;
        let expected = state.map(|s| s.last_sync_checksum);
        if let Err(err) = self.commit(&key, expected, next).await {
            self.reopen(&conflict);
            self.record_error(&key, &err).await;
            return Err(err);
        }

        let resolution = ConflictResolution {
            conflict_id: id.clone(),
            strategy,
            resolved_content: content,
            resolved_by: resolved_by.to_string(),
            resolved_at: Utc::now(),
        };
        self.conflicts.record_resolution(resolution.clone())?;
        self.clear_error(&key).await;
        self.record_event(SyncEvent {
            artifact: artifact.clone(),
            direction: conflict.direction,
            kind: SyncEventKind::Resolved,
            checksum,
            version,
            actor_id: resolved_by.to_string(),
            at: resolution.resolved_at,
        })
        .await;
        tracing::info!(
            artifact = %key,
            conflict = %id,
            %strategy,
            resolved_by,
            version,
            "conflict resolved",
        );
        Ok(ResolveOutcome::Resolved(resolution))
    }

    /// Mark a pending conflict ignored. State is left as it was.
    pub async fn ignore_conflict(&self, id: &ConflictId) -> Result<Conflict, SyncError> {
        let conflict = self.conflicts.transition(id, ConflictStatus::Ignored)?;
        let state = self.states.get(&conflict.artifact.key());
        self.record_event(SyncEvent {
            artifact: conflict.artifact.clone(),
            direction: conflict.direction,
            kind: SyncEventKind::Ignored,
            checksum: state
                .as_ref()
                .map_or_else(|| conflict.local_checksum.clone(), |s| s.last_sync_checksum.clone()),
            version: state.as_ref().map_or(0, |s| s.version),
            actor_id: conflict.actor_id.clone(),
            at: Utc::now(),
        })
        .await;
        tracing::info!(artifact = %conflict.artifact, conflict = %id, "conflict ignored");
        Ok(conflict)
    }

    /// Mark every pending conflict of `artifact` except `keep` ignored.
    fn supersede_pending(&self, artifact: &ArtifactRef, keep: Option<&ConflictId>) {
        for stale in self.get_pending_conflicts(Some(artifact)) {
            if keep == Some(&stale.id) {
                continue;
            }
            match self.conflicts.transition(&stale.id, ConflictStatus::Ignored) {
                Ok(_) => tracing::info!(
                    artifact = %artifact,
                    conflict = %stale.id,
                    "pending conflict superseded",
                ),
                Err(err) => tracing::debug!(
                    conflict = %stale.id,
                    error = %err,
                    "conflict left pending before it could be superseded",
                ),
            }
        }
    }

    /// Put a claimed conflict back to pending after a failed resolution.
    fn reopen(&self, conflict: &Conflict) {
        let mut pending = conflict.clone();
        pending.status = ConflictStatus::Pending;
        if let Err(err) = self.conflicts.put(pending) {
            tracing::warn!(conflict = %conflict.id, error = %err, "failed to reopen conflict");
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_sync_status(&self, artifact: &ArtifactRef) -> SyncStatus {
        self.status_of(artifact, None).await
    }

    /// Pending conflicts, oldest first, optionally for one artifact.
    pub fn get_pending_conflicts(&self, artifact: Option<&ArtifactRef>) -> Vec<Conflict> {
        self.conflicts
            .list()
            .into_iter()
            .filter(|c| c.is_pending())
            .filter(|c| artifact.map_or(true, |a| &c.artifact == a))
            .collect()
    }

    pub fn get_conflict(&self, id: &ConflictId) -> Option<Conflict> {
        self.conflicts.get(id)
    }

    pub fn get_resolutions(&self) -> Vec<ConflictResolution> {
        self.conflicts.resolutions()
    }

    /// Event log, oldest first, optionally for one artifact.
    pub async fn get_sync_events(&self, artifact: Option<&ArtifactRef>) -> Vec<SyncEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| artifact.map_or(true, |a| &e.artifact == a))
            .cloned()
            .collect()
    }

    /// Flush every cached state record to durable storage.
    pub async fn persist_all(&self) -> Result<(), SyncError> {
        let states = Arc::clone(&self.states);
        tokio::task::spawn_blocking(move || states.persist_all())
            .await
            .map_err(|err| SyncError::Join(format!("persist_all: {err}")))?
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn status_of(
        &self,
        artifact: &ArtifactRef,
        direction: Option<SyncDirection>,
    ) -> SyncStatus {
        let key = artifact.key();
        let state = self.states.get(&key);
        let pending = self.get_pending_conflicts(Some(artifact)).pop();
        let error = self.errors.read().await.get(&key).cloned();
        let direction = match direction {
            Some(direction) => Some(direction),
            None => match &pending {
                Some(conflict) => Some(conflict.direction),
                None => self.last_direction(artifact).await,
            },
        };

        let status = if pending.is_some() {
            StatusKind::Conflict
        } else if error.is_some() {
            StatusKind::Error
        } else if state.is_some() {
            StatusKind::Synced
        } else {
            StatusKind::Pending
        };

        SyncStatus {
            status,
            direction,
            last_sync_time: state.as_ref().map(|s| s.last_sync_time),
            conflict_reason: pending.as_ref().map(Conflict::reason),
            error: if status == StatusKind::Error { error } else { None },
            vector_clock: state.map(|s| s.vector_clock).unwrap_or_default(),
        }
    }

    async fn last_direction(&self, artifact: &ArtifactRef) -> Option<SyncDirection> {
        let events = self.events.read().await;
        events
            .iter()
            .rev()
            .find(|e| &e.artifact == artifact)
            .map(|e| e.direction)
    }

    /// Push through the remote collaborator with the configured retries.
    async fn push(&self, artifact: &ArtifactRef, content: &str) -> Result<(), SyncError> {
        remote::apply_with_retry(
            self.remote.as_ref(),
            artifact,
            content,
            self.config.max_retries,
            self.config.retry_backoff(),
        )
        .await
        .map(|attempts| {
            tracing::debug!(artifact = %artifact, attempts, "remote apply succeeded");
        })
        .map_err(|(attempts, source)| SyncError::Remote { attempts, source })
    }

    /// Write `next` if the stored checksum is still `expected`.
    ///
    /// An I/O failure leaves the state live in memory and is only logged.
    async fn commit(
        &self,
        key: &ArtifactKey,
        expected: Option<String>,
        next: SyncState,
    ) -> Result<(), SyncError> {
        let states = Arc::clone(&self.states);
        let write_key = key.clone();
        let written = tokio::task::spawn_blocking(move || {
            states.compare_and_put(&write_key, expected.as_deref(), next)
        })
        .await
        .map_err(|err| SyncError::Join(format!("state write: {err}")))?;

        match written {
            Err(SyncError::Io { path, source }) => {
                tracing::warn!(
                    artifact = %key,
                    path = %path.display(),
                    error = %source,
                    "sync state not persisted; continuing in memory",
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Commit and report the sync, or `Failed` on a stale write.
    #[allow(clippy::too_many_arguments)]
    async fn advance(
        &self,
        artifact: &ArtifactRef,
        direction: SyncDirection,
        expected: Option<String>,
        next: SyncState,
        content: &str,
        kind: SyncEventKind,
        actor_id: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let key = artifact.key();
        let checksum = next.last_sync_checksum.clone();
        let version = next.version;
        let at = next.last_sync_time;

        match self.commit(&key, expected, next).await {
            Ok(()) => {}
            Err(err @ SyncError::StaleWrite { .. }) => {
                return Ok(self.failed(artifact, direction, &err).await);
            }
            Err(err) => return Err(err),
        }

        if direction == SyncDirection::Bidirectional {
            self.supersede_pending(artifact, None);
        }
        self.clear_error(&key).await;
        self.record_event(SyncEvent {
            artifact: artifact.clone(),
            direction,
            kind,
            checksum,
            version,
            actor_id: actor_id.to_string(),
            at,
        })
        .await;
        tracing::info!(artifact = %key, %direction, %kind, version, "synced");

        let status = self.status_of(artifact, Some(direction)).await;
        Ok(match kind {
            SyncEventKind::Unchanged => SyncOutcome::Unchanged { status },
            _ => SyncOutcome::Synced {
                status,
                content: content.to_string(),
                kind,
            },
        })
    }

    async fn failed(
        &self,
        artifact: &ArtifactRef,
        direction: SyncDirection,
        err: &SyncError,
    ) -> SyncOutcome {
        let key = artifact.key();
        tracing::warn!(artifact = %key, %direction, error = %err, "sync failed");
        self.record_error(&key, err).await;
        SyncOutcome::Failed {
            status: self.status_of(artifact, Some(direction)).await,
            reason: err.to_string(),
        }
    }

    async fn record_error(&self, key: &ArtifactKey, err: &SyncError) {
        self.errors.write().await.insert(key.clone(), err.to_string());
    }

    async fn clear_error(&self, key: &ArtifactKey) {
        self.errors.write().await.remove(key);
    }

    async fn record_event(&self, event: SyncEvent) {
        let mut events = self.events.write().await;
        if events.len() == EVENT_LOG_CAPACITY {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// One side of a conflict as it is being built.
struct Incoming {
    content: String,
    checksum: String,
    clock: VectorClock,
}

fn new_conflict(
    artifact: &ArtifactRef,
    direction: SyncDirection,
    actor_id: &str,
    conflict_type: ConflictType,
    base_content: Option<String>,
    local: Incoming,
    remote: Incoming,
) -> Conflict {
    Conflict {
        id: ConflictId::generate(),
        artifact: artifact.clone(),
        local_content: local.content,
        remote_content: remote.content,
        base_content,
        local_checksum: local.checksum,
        remote_checksum: remote.checksum,
        local_clock: local.clock,
        remote_clock: remote.clock,
        conflict_type,
        status: ConflictStatus::Pending,
        direction,
        actor_id: actor_id.to_string(),
        detected_at: Utc::now(),
        merge_draft: None,
    }
}

/// Stored clock joined with both sides of the conflict.
fn merged_clock(state: Option<&SyncState>, conflict: &Conflict) -> VectorClock {
    state
        .map(|s| s.vector_clock.clone())
        .unwrap_or_default()
        .merge(&conflict.local_clock)
        .merge(&conflict.remote_clock)
}

/// State after `content` becomes the agreed version.
fn next_state(
    prev: Option<&SyncState>,
    content: &str,
    checksum: String,
    clock: VectorClock,
) -> SyncState {
    SyncState {
        last_sync_checksum: checksum.clone(),
        last_sync_time: Utc::now(),
        version: prev.map_or(1, |s| s.version + 1),
        vector_clock: clock,
        base_content: Some(content.to_string()),
        base_checksum: Some(checksum),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::NoopRemote;
    use duplex_core::MergeStrategy;

    fn orchestrator(strategy: MergeStrategy) -> SyncOrchestrator {
        SyncOrchestrator::with_stores(
            SyncConfig::default().with_strategy(strategy),
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemoryConflictStore::new()),
            Arc::new(NoopRemote),
        )
        .unwrap()
    }

    fn artifact() -> ArtifactRef {
        ArtifactRef::new("acme", "brief", "B-1")
    }

    #[tokio::test]
    async fn unknown_artifact_is_pending() {
        let orch = orchestrator(MergeStrategy::Manual);
        let status = orch.get_sync_status(&artifact()).await;
        assert_eq!(status.status, StatusKind::Pending);
        assert!(status.direction.is_none());
        assert!(status.last_sync_time.is_none());
    }

    #[tokio::test]
    async fn first_push_creates_version_one() {
        let orch = orchestrator(MergeStrategy::Manual);
        let a = artifact();
        let outcome = orch
            .sync_to_remote(SyncRequest::new(&a, "v1", "local"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            SyncOutcome::Synced {
                kind: SyncEventKind::Applied,
                ..
            }
        ));
        let state = orch.states.get(&a.key()).unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.vector_clock.get("local"), 1);
        assert_eq!(state.base_content.as_deref(), Some("v1"));
        assert_eq!(orch.get_sync_events(Some(&a)).await.len(), 1);
    }

    #[tokio::test]
    async fn repeated_content_is_unchanged() {
        let orch = orchestrator(MergeStrategy::Manual);
        let a = artifact();
        let _ = orch
            .sync_to_remote(SyncRequest::new(&a, "v1", "local"))
            .await
            .unwrap();
        let before = orch.states.get(&a.key()).unwrap();

        let outcome = orch
            .sync_from_remote(SyncRequest::new(&a, "v1", "remote"))
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Unchanged { .. }));
        let after = orch.states.get(&a.key()).unwrap();
        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.last_sync_checksum, before.last_sync_checksum);
        assert_eq!(after.base_content.as_deref(), Some("v1"));
        assert!(after.last_sync_time >= before.last_sync_time);
        assert_eq!(after.vector_clock, before.vector_clock);

        let events = orch.get_sync_events(None).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, SyncEventKind::Unchanged);
        assert_eq!(events[1].direction, SyncDirection::FromRemote);
    }

    #[tokio::test]
    async fn no_op_absorbs_the_writers_clock() {
        let orch = orchestrator(MergeStrategy::Manual);
        let a = artifact();
        let _ = orch
            .sync_to_remote(SyncRequest::new(&a, "v1", "local"))
            .await
            .unwrap();
        let seen: VectorClock = [("remote", 4)].into_iter().collect();

        let outcome = orch
            .sync_from_remote(SyncRequest::new(&a, "v1", "remote").based_on(&seen))
            .await
            .unwrap();
        assert_eq!(outcome.status().vector_clock.get("remote"), 4);
        assert_eq!(outcome.status().vector_clock.get("local"), 1);
    }

    #[tokio::test]
    async fn repeated_stale_write_reuses_pending_conflict() {
        let orch = orchestrator(MergeStrategy::Manual);
        let a = artifact();
        let _ = orch
            .sync_to_remote(SyncRequest::new(&a, "v1", "local"))
            .await
            .unwrap();
        let seen = orch.states.get(&a.key()).unwrap().vector_clock;
        let _ = orch
            .sync_from_remote(SyncRequest::new(&a, "v2-remote", "remote"))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let outcome = orch
                .sync_to_remote(SyncRequest::new(&a, "v2-local", "local").based_on(&seen))
                .await
                .unwrap();
            ids.push(outcome.conflict().expect("conflict").id.clone());
        }
        assert_eq!(ids[0], ids[1]);
        assert_eq!(orch.get_pending_conflicts(Some(&a)).len(), 1);
    }

    #[tokio::test]
    async fn stale_single_direction_write_raises_conflict_without_state_change() {
        let orch = orchestrator(MergeStrategy::Manual);
        let a = artifact();
        let _ = orch
            .sync_to_remote(SyncRequest::new(&a, "v1", "local"))
            .await
            .unwrap();
        let seen = orch.states.get(&a.key()).unwrap().vector_clock;
        let _ = orch
            .sync_from_remote(SyncRequest::new(&a, "v2-remote", "remote"))
            .await
            .unwrap();
        let before = orch.states.get(&a.key()).unwrap();

        let outcome = orch
            .sync_to_remote(SyncRequest::new(&a, "v2-local", "local").based_on(&seen))
            .await
            .unwrap();
        let conflict = outcome.conflict().expect("conflict").clone();
        assert_eq!(conflict.conflict_type, ConflictType::Concurrent);
        assert_eq!(conflict.local_content, "v2-local");
        assert_eq!(conflict.remote_content, "v2-remote");
        assert_eq!(outcome.status().status, StatusKind::Conflict);
        assert_eq!(orch.states.get(&a.key()).unwrap(), before);
    }

    #[tokio::test]
    async fn event_log_is_capped() {
        let orch = orchestrator(MergeStrategy::Manual);
        let a = artifact();
        for i in 0..EVENT_LOG_CAPACITY + 5 {
            let content = format!("v{i}");
            let _ = orch
                .sync_to_remote(SyncRequest::new(&a, &content, "local"))
                .await
                .unwrap();
        }
        let events = orch.get_sync_events(None).await;
        assert_eq!(events.len(), EVENT_LOG_CAPACITY);
        assert_eq!(events[0].version, 6);
    }

    #[tokio::test]
    async fn ignored_conflict_is_no_longer_pending() {
        let orch = orchestrator(MergeStrategy::Manual);
        let a = artifact();
        let outcome = orch
            .bidirectional_sync(&a, Replica::new("left"), Replica::new("right"), "local")
            .await
            .unwrap();
        let id = outcome.conflict().unwrap().id.clone();

        let ignored = orch.ignore_conflict(&id).await.unwrap();
        assert_eq!(ignored.status, ConflictStatus::Ignored);
        assert!(orch.get_pending_conflicts(Some(&a)).is_empty());
        assert!(orch.resolve_conflict(&id, ResolutionStrategy::KeepLocal, None, "me")
            .await
            .is_err());
        assert_eq!(orch.get_sync_status(&a).await.status, StatusKind::Pending);
    }
}
