//! Periodic bidirectional sync of tracked artifacts.
//!
//! The driver owns no replicas: each tick it asks a [`ReplicaSource`] for
//! the current local and remote snapshots and hands them to
//! [`SyncOrchestrator::bidirectional_sync`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use duplex_core::{ArtifactRef, VectorClock};

use crate::detector::Replica;
use crate::error::RemoteError;
use crate::orchestrator::SyncOrchestrator;
use crate::outcome::SyncOutcome;

/// Current content of both replicas of one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaPair {
    pub local: String,
    pub remote: String,
    pub local_clock: Option<VectorClock>,
    pub remote_clock: Option<VectorClock>,
}

impl ReplicaPair {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            local_clock: None,
            remote_clock: None,
        }
    }
}

/// Where the driver reads replicas from.
#[async_trait]
pub trait ReplicaSource: Send + Sync {
    /// Artifacts to reconcile on each pass.
    async fn tracked(&self) -> Vec<ArtifactRef>;

    /// Both replicas of `artifact`, or `None` if one side is gone.
    async fn snapshot(&self, artifact: &ArtifactRef) -> Result<Option<ReplicaPair>, RemoteError>;

    /// Called with every outcome, e.g. to write merged content back locally.
    async fn on_outcome(&self, _artifact: &ArtifactRef, _outcome: &SyncOutcome) {}
}

/// Counts from one pass over the tracked artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub synced: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Handle to a running driver.
pub struct AutoSyncHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    /// Signal the driver to stop and wait for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "auto-sync task ended abnormally");
        }
    }
}

/// Start the driver if `auto_sync` is enabled in the orchestrator's config.
pub fn spawn(
    orchestrator: Arc<SyncOrchestrator>,
    source: Arc<dyn ReplicaSource>,
    actor_id: impl Into<String>,
) -> Option<AutoSyncHandle> {
    if !orchestrator.config().auto_sync {
        tracing::debug!("auto-sync disabled");
        return None;
    }
    let actor_id = actor_id.into();
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let task = tokio::spawn(run(orchestrator, source, actor_id, shutdown_rx));
    Some(AutoSyncHandle { shutdown_tx, task })
}

async fn run(
    orchestrator: Arc<SyncOrchestrator>,
    source: Arc<dyn ReplicaSource>,
    actor_id: String,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let period = orchestrator.config().auto_sync_interval();
    tracing::info!(interval_secs = period.as_secs(), "auto-sync started");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                run_pass(&orchestrator, source.as_ref(), &actor_id).await;
            }
        }
    }
    tracing::info!("auto-sync stopped");
}

/// Reconcile every tracked artifact once.
pub async fn run_pass(
    orchestrator: &SyncOrchestrator,
    source: &dyn ReplicaSource,
    actor_id: &str,
) -> PassSummary {
    let started = Instant::now();
    let mut summary = PassSummary::default();

    for artifact in source.tracked().await {
        let pair = match source.snapshot(&artifact).await {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                summary.skipped += 1;
                continue;
            }
            Err(err) => {
                tracing::warn!(artifact = %artifact, error = %err, "snapshot failed; skipping");
                summary.skipped += 1;
                continue;
            }
        };

        let mut local = Replica::new(&pair.local);
        if let Some(clock) = &pair.local_clock {
            local = local.with_clock(clock);
        }
        let mut remote = Replica::new(&pair.remote);
        if let Some(clock) = &pair.remote_clock {
            remote = remote.with_clock(clock);
        }

        let outcome = match orchestrator
            .bidirectional_sync(&artifact, local, remote, actor_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(artifact = %artifact, error = %err, "auto-sync failed");
                summary.failed += 1;
                continue;
            }
        };

        match &outcome {
            SyncOutcome::Unchanged { .. } => summary.unchanged += 1,
            SyncOutcome::Synced { .. } => summary.synced += 1,
            SyncOutcome::Conflict { .. } => summary.conflicts += 1,
            SyncOutcome::Failed { .. } => summary.failed += 1,
        }
        source.on_outcome(&artifact, &outcome).await;
    }

    tracing::info!(
        synced = summary.synced,
        unchanged = summary.unchanged,
        conflicts = summary.conflicts,
        failed = summary.failed,
        skipped = summary.skipped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "auto-sync pass complete",
    );
    summary
}
