//! Pushing content into the remote replica.
//!
//! The transport (REST call, queue, file copy) lives outside this crate; the
//! orchestrator only needs its success/failure signal.

use std::time::Duration;

use async_trait::async_trait;

use duplex_core::ArtifactRef;

use crate::error::RemoteError;

#[async_trait]
pub trait RemoteApplier: Send + Sync {
    /// Persist `content` as the remote replica of `artifact`.
    async fn apply(&self, artifact: &ArtifactRef, content: &str) -> Result<(), RemoteError>;
}

/// Accepts every write. For deployments where the caller writes the remote
/// replica itself and only wants the bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRemote;

#[async_trait]
impl RemoteApplier for NoopRemote {
    async fn apply(&self, artifact: &ArtifactRef, _content: &str) -> Result<(), RemoteError> {
        tracing::trace!(artifact = %artifact, "noop remote apply");
        Ok(())
    }
}

/// Call `applier` up to `1 + max_retries` times, sleeping `backoff` between
/// attempts. Returns the number of attempts used, or the last error with the
/// attempt count.
pub async fn apply_with_retry(
    applier: &dyn RemoteApplier,
    artifact: &ArtifactRef,
    content: &str,
    max_retries: u32,
    backoff: Duration,
) -> Result<u32, (u32, RemoteError)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match applier.apply(artifact, content).await {
            Ok(()) => return Ok(attempt),
            Err(err) if attempt <= max_retries => {
                tracing::warn!(
                    artifact = %artifact,
                    attempt,
                    max_retries,
                    error = %err,
                    "remote apply failed; retrying",
                );
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
            Err(err) => return Err((attempt, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteApplier for Flaky {
        async fn apply(&self, _artifact: &ArtifactRef, _content: &str) -> Result<(), RemoteError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(RemoteError::new(format!("boom #{call}")))
            } else {
                Ok(())
            }
        }
    }

    fn artifact() -> ArtifactRef {
        ArtifactRef::new("acme", "diagram", "D-1")
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let flaky = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let attempts = apply_with_retry(&flaky, &artifact(), "x", 3, Duration::ZERO)
            .await
            .expect("third attempt succeeds");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let flaky = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let (attempts, err) = apply_with_retry(&flaky, &artifact(), "x", 1, Duration::ZERO)
            .await
            .expect_err("always failing");
        assert_eq!(attempts, 2);
        assert_eq!(err.to_string(), "boom #2");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let flaky = Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        };
        assert!(apply_with_retry(&flaky, &artifact(), "x", 0, Duration::ZERO)
            .await
            .is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }
}
