//! Domain types for replica synchronisation.
//!
//! Persisted records serialise with camelCase field names; enums use
//! snake_case tags.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::VectorClock;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Composite storage key: `project:artifact_type:artifact_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey(pub String);

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ArtifactKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ArtifactKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of one synchronised unit of content. Its meaning is owned by the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub project: String,
    pub artifact_type: String,
    pub artifact_id: String,
}

impl ArtifactRef {
    pub fn new(
        project: impl Into<String>,
        artifact_type: impl Into<String>,
        artifact_id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            artifact_type: artifact_type.into(),
            artifact_id: artifact_id.into(),
        }
    }

    pub fn key(&self) -> ArtifactKey {
        ArtifactKey(format!(
            "{}:{}:{}",
            self.project, self.artifact_type, self.artifact_id
        ))
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key().fmt(f)
    }
}

/// Conflict identifier (UUID v4, hyphenated).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(pub String);

impl ConflictId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ConflictId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConflictId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which way content moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    ToRemote,
    FromRemote,
    Bidirectional,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::ToRemote => write!(f, "to_remote"),
            SyncDirection::FromRemote => write!(f, "from_remote"),
            SyncDirection::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Synced,
    #[default]
    Pending,
    Conflict,
    Error,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Synced => write!(f, "synced"),
            StatusKind::Pending => write!(f, "pending"),
            StatusKind::Conflict => write!(f, "conflict"),
            StatusKind::Error => write!(f, "error"),
        }
    }
}

/// Why a conflict was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Checksums differ but the clocks do not prove concurrency.
    Content,
    /// The clocks are mutually non-dominating.
    Concurrent,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::Content => write!(f, "content"),
            ConflictType::Concurrent => write!(f, "concurrent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[default]
    Pending,
    Resolved,
    Ignored,
}

/// Terminal resolution chosen for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    KeepLocal,
    KeepRemote,
    /// Two-way auto-merge.
    Merge,
    ThreeWay,
    /// Caller-supplied content.
    Manual,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStrategy::KeepLocal => write!(f, "keep_local"),
            ResolutionStrategy::KeepRemote => write!(f, "keep_remote"),
            ResolutionStrategy::Merge => write!(f, "merge"),
            ResolutionStrategy::ThreeWay => write!(f, "three_way"),
            ResolutionStrategy::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    /// A single-direction sync carried the already-synced content.
    Unchanged,
    /// A single side was accepted as-is.
    Applied,
    /// Both sides already agreed.
    Converged,
    /// An automatic merge strategy produced the new baseline.
    Merged,
    /// An explicit `resolve_conflict` call produced the new baseline.
    Resolved,
    Ignored,
}

impl fmt::Display for SyncEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEventKind::Unchanged => write!(f, "unchanged"),
            SyncEventKind::Applied => write!(f, "applied"),
            SyncEventKind::Converged => write!(f, "converged"),
            SyncEventKind::Merged => write!(f, "merged"),
            SyncEventKind::Resolved => write!(f, "resolved"),
            SyncEventKind::Ignored => write!(f, "ignored"),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Durable per-artifact sync record. Created on first successful sync and
/// never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub last_sync_checksum: String,
    pub last_sync_time: DateTime<Utc>,
    pub version: u64,
    #[serde(default)]
    pub vector_clock: VectorClock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_checksum: Option<String>,
}

/// Point-in-time status for one artifact. Recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub status: StatusKind,
    pub direction: Option<SyncDirection>,
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_reason: Option<String>,
    /// Failure message when `status` is [`StatusKind::Error`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub vector_clock: VectorClock,
}

/// Two replicas that could not be reconciled automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: ConflictId,
    pub artifact: ArtifactRef,
    pub local_content: String,
    pub remote_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_content: Option<String>,
    pub local_checksum: String,
    pub remote_checksum: String,
    pub local_clock: VectorClock,
    pub remote_clock: VectorClock,
    pub conflict_type: ConflictType,
    pub status: ConflictStatus,
    pub direction: SyncDirection,
    pub actor_id: String,
    pub detected_at: DateTime<Utc>,
    /// Marker-annotated text left by an automatic merge that could not
    /// finish cleanly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_draft: Option<String>,
}

impl Conflict {
    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }

    /// Human-readable reason, surfaced through [`SyncStatus::conflict_reason`].
    pub fn reason(&self) -> String {
        match self.conflict_type {
            ConflictType::Concurrent => format!(
                "concurrent edits (local {} vs remote {})",
                self.local_clock, self.remote_clock
            ),
            ConflictType::Content => "local and remote content differ".to_string(),
        }
    }
}

/// Immutable audit record, one per resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub conflict_id: ConflictId,
    pub strategy: ResolutionStrategy,
    pub resolved_content: String,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
}

/// Entry in the in-memory sync event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub artifact: ArtifactRef,
    pub direction: SyncDirection,
    pub kind: SyncEventKind,
    pub checksum: String,
    pub version: u64,
    pub actor_id: String,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
