//! Concurrent fetch orchestration.
//!
//! Runs every requested adapter fetch concurrently and waits for all of
//! them to settle. Each adapter's outcome is collected as a
//! [`FetchResult`]; one provider failing never cancels or blocks the
//! others. Providers whose credentials are invalid are disabled up front
//! without issuing a fetch.

use crate::adapter::{FetchResult, ProviderAdapter};
use futures::future::join_all;
use geofuse_common::{FailureKind, ProviderKind, Region};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// The settled outcome of one provider's fetch.
#[derive(Debug)]
pub struct ProviderOutcome {
    pub kind: ProviderKind,
    pub result: FetchResult,
}

/// Fetch from all adapters concurrently, optionally bounded by
/// `concurrency` simultaneous fetches, and collect every outcome in input
/// order.
pub async fn fetch_all(
    adapters: &[Arc<dyn ProviderAdapter>],
    region: &Region,
    resolution: f64,
    concurrency: Option<usize>,
) -> Vec<ProviderOutcome> {
    let semaphore = concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));

    let futures = adapters.iter().map(|adapter| {
        let adapter = adapter.clone();
        let semaphore = semaphore.clone();
        async move {
            let kind = adapter.kind();
            if !adapter.validate_credentials() {
                warn!(provider = %kind, "credentials invalid, provider disabled for this request");
                return ProviderOutcome {
                    kind,
                    result: FetchResult::Failure(
                        FailureKind::AuthInvalid,
                        format!("{} credentials rejected", kind),
                    ),
                };
            }

            let _permit = match &semaphore {
                Some(s) => Some(s.clone().acquire_owned().await.expect("semaphore closed")),
                None => None,
            };

            let result = adapter.fetch(region, resolution).await;
            info!(provider = %kind, success = result.is_success(), "fetch settled");
            ProviderOutcome { kind, result }
        }
    });

    join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Artifact, LayerSet, ProviderError};
    use async_trait::async_trait;
    use geofuse_common::{GridSpec, SourceStatus};
    use std::time::Duration;

    struct StubAdapter {
        kind: ProviderKind,
        credentials: bool,
        delay: Duration,
        outcome: SourceStatus,
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn validate_credentials(&self) -> bool {
            self.credentials
        }

        fn cache_key(&self, _region: &Region, _resolution: f64) -> String {
            format!("{}_stub", self.kind)
        }

        async fn fetch(&self, _region: &Region, _resolution: f64) -> FetchResult {
            tokio::time::sleep(self.delay).await;
            match &self.outcome {
                SourceStatus::Ok => {
                    FetchResult::Success(Artifact::LocalRasters(Vec::new()))
                }
                SourceStatus::NoData => FetchResult::NoData,
                SourceStatus::Error(reason) => {
                    FetchResult::Failure(FailureKind::NetworkTransient, reason.clone())
                }
            }
        }

        fn resample_to_grid(
            &self,
            _artifact: &Artifact,
            _spec: &GridSpec,
        ) -> Result<LayerSet, ProviderError> {
            Ok(LayerSet::new())
        }

        fn fallback_layers(&self, _spec: &GridSpec) -> LayerSet {
            LayerSet::new()
        }
    }

    fn region() -> Region {
        Region::from_bounds(44.97, 44.99, -93.28, -93.25).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_never_blocks_the_others() {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(StubAdapter {
                kind: ProviderKind::Elevation,
                credentials: true,
                delay: Duration::from_secs(1),
                outcome: SourceStatus::Ok,
            }),
            Arc::new(StubAdapter {
                kind: ProviderKind::Embedding,
                credentials: true,
                delay: Duration::from_secs(2),
                outcome: SourceStatus::Error("service exploded".into()),
            }),
            Arc::new(StubAdapter {
                kind: ProviderKind::Vector,
                credentials: true,
                delay: Duration::from_secs(1),
                outcome: SourceStatus::NoData,
            }),
        ];

        let outcomes = fetch_all(&adapters, &region(), 10.0, None).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_success());
        assert!(matches!(
            outcomes[1].result,
            FetchResult::Failure(FailureKind::NetworkTransient, _)
        ));
        assert!(matches!(outcomes[2].result, FetchResult::NoData));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_run_concurrently() {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = (0..3)
            .map(|_| {
                Arc::new(StubAdapter {
                    kind: ProviderKind::Local,
                    credentials: true,
                    delay: Duration::from_secs(10),
                    outcome: SourceStatus::Ok,
                }) as Arc<dyn ProviderAdapter>
            })
            .collect();

        let started = tokio::time::Instant::now();
        let outcomes = fetch_all(&adapters, &region(), 10.0, None).await;
        assert_eq!(outcomes.len(), 3);
        // Concurrent, not sequential: 10s of virtual time, not 30s.
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_serializes_excess() {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = (0..3)
            .map(|_| {
                Arc::new(StubAdapter {
                    kind: ProviderKind::Local,
                    credentials: true,
                    delay: Duration::from_secs(10),
                    outcome: SourceStatus::Ok,
                }) as Arc<dyn ProviderAdapter>
            })
            .collect();

        let started = tokio::time::Instant::now();
        fetch_all(&adapters, &region(), 10.0, Some(1)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_invalid_credentials_disable_provider_without_fetch() {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![Arc::new(StubAdapter {
            kind: ProviderKind::Embedding,
            credentials: false,
            delay: Duration::from_secs(3600),
            outcome: SourceStatus::Ok,
        })];

        // Finishes immediately: the fetch (and its hour-long sleep) never runs.
        let outcomes = fetch_all(&adapters, &region(), 10.0, None).await;
        assert!(matches!(
            outcomes[0].result,
            FetchResult::Failure(FailureKind::AuthInvalid, _)
        ));
    }
}
