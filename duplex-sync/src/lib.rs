//! # duplex-sync
//!
//! Conflict detection, merging and sync orchestration between a local and a
//! remote replica of each artifact.
//!
//! Build a [`SyncOrchestrator`] with [`SyncOrchestrator::open`] and call
//! [`sync_to_remote`](SyncOrchestrator::sync_to_remote),
//! [`sync_from_remote`](SyncOrchestrator::sync_from_remote) or
//! [`bidirectional_sync`](SyncOrchestrator::bidirectional_sync). Conflicts
//! come back as [`SyncOutcome::Conflict`] and are settled with
//! [`resolve_conflict`](SyncOrchestrator::resolve_conflict).

pub mod autosync;
pub mod conflict_store;
pub mod detector;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod outcome;
pub mod remote;
pub mod state_store;

pub use autosync::{AutoSyncHandle, PassSummary, ReplicaPair, ReplicaSource};
pub use conflict_store::{ConflictStore, MemoryConflictStore};
pub use detector::Replica;
pub use error::{RemoteError, SyncError};
pub use merge::{MergeEngine, MergeOutcome};
pub use orchestrator::{SyncOrchestrator, SyncRequest};
pub use outcome::{ResolveOutcome, SyncOutcome};
pub use remote::{NoopRemote, RemoteApplier};
pub use state_store::{JsonFileStateStore, MemoryStateStore, SyncStateStore};
