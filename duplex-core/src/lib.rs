//! Duplex core library: domain types, vector clocks, fingerprints, config.
//!
//! - [`clock`]: [`VectorClock`] and [`ClockOrdering`]
//! - [`fingerprint`]: content normalisation and SHA-256 checksums
//! - [`types`]: artifacts, sync state, conflicts, resolutions, events
//! - [`config`]: [`SyncConfig`] loading and validation
//! - [`error`]: [`ConfigError`]

pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod types;

pub use clock::{ClockOrdering, VectorClock};
pub use config::{EscalationPolicy, MergeStrategy, SyncConfig};
pub use error::ConfigError;
pub use types::{
    ArtifactKey, ArtifactRef, Conflict, ConflictId, ConflictResolution, ConflictStatus,
    ConflictType, ResolutionStrategy, StatusKind, SyncDirection, SyncEvent, SyncEventKind,
    SyncState, SyncStatus,
};
