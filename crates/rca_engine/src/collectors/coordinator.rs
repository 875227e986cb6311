//! Parallel collection fan-out.
//!
//! One task per enabled collector, each under its own deadline. The
//! join waits for every task to settle; a collector that failed or
//! timed out is simply absent from the bundle. Total collection time
//! is bounded by the longest single deadline, not the sum.

use std::sync::Arc;
use std::time::Duration;

use rca_common::{CollectionConfig, ContextBundle, FailureEvent};
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{CollectParams, Collector, CollectorRegistry};

pub struct CollectionCoordinator {
    registry: CollectorRegistry,
    params: CollectParams,
}

impl CollectionCoordinator {
    pub fn new(registry: CollectorRegistry, config: &CollectionConfig) -> Self {
        Self {
            registry,
            params: CollectParams::new(
                Duration::from_secs(config.collector_timeout_secs),
                config.lookback_hours,
            ),
        }
    }

    /// Run every enabled collector concurrently and assemble the bundle
    /// once all have settled. Partial bundles are the normal case; no
    /// retries happen at this layer. Dropping the returned future
    /// aborts in-flight collector tasks.
    pub async fn collect_all(&self, event: &FailureEvent) -> ContextBundle {
        let mut bundle = ContextBundle::for_event(event);
        let mut tasks: JoinSet<(String, Option<rca_common::CollectorOutput>)> = JoinSet::new();

        for collector in self.registry.enabled() {
            let collector: Arc<dyn Collector> = Arc::clone(collector);
            let event = event.clone();
            let params = self.params.clone();
            tasks.spawn(async move {
                let name = collector.name().to_string();
                let output = collector.safe_collect(&event, &params).await;
                (name, output)
            });
        }

        let total = tasks.len();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Some(output))) => bundle.insert(name, output),
                Ok((_, None)) => {}
                // safe_collect cannot fail, so a join error means the
                // task itself panicked or was aborted; record nothing.
                Err(e) => warn!(error = %e, "Collector task did not settle cleanly"),
            }
        }

        info!(
            dag_id = %event.dag_id,
            task_id = %event.task_id,
            collectors_run = total,
            collectors_contributed = bundle.entries.len(),
            "Context collection complete"
        );
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use rca_common::{CollectorOutput, GitContext, MetricsSnapshot};
    use std::time::Instant;

    struct GitFake;

    #[async_trait]
    impl Collector for GitFake {
        fn name(&self) -> &str {
            "git"
        }

        async fn collect(
            &self,
            _event: &FailureEvent,
            _params: &CollectParams,
        ) -> Result<Option<CollectorOutput>> {
            Ok(Some(CollectorOutput::Git(GitContext::default())))
        }
    }

    struct MetricsFake;

    #[async_trait]
    impl Collector for MetricsFake {
        fn name(&self) -> &str {
            "metrics"
        }

        async fn collect(
            &self,
            _event: &FailureEvent,
            _params: &CollectParams,
        ) -> Result<Option<CollectorOutput>> {
            Ok(Some(CollectorOutput::Metrics(MetricsSnapshot {
                timestamp: chrono::Utc::now(),
                cpu_percent: Some(91.0),
                memory_percent: Some(97.5),
                memory_used_gb: None,
                disk_percent: None,
                active_connections: None,
                worker_slots_available: Some(0),
            })))
        }
    }

    struct HangingCollector;

    #[async_trait]
    impl Collector for HangingCollector {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn collect(
            &self,
            _event: &FailureEvent,
            _params: &CollectParams,
        ) -> Result<Option<CollectorOutput>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
    }

    fn event() -> FailureEvent {
        FailureEvent::new("etl_sales_daily", "load_to_warehouse", "run_1").unwrap()
    }

    fn config(timeout_secs: u64) -> CollectionConfig {
        CollectionConfig {
            collector_timeout_secs: timeout_secs,
            lookback_hours: 24,
        }
    }

    #[tokio::test]
    async fn all_settled_results_land_in_bundle() {
        let registry = CollectorRegistry::new()
            .with(Arc::new(GitFake))
            .with(Arc::new(MetricsFake));
        let coordinator = CollectionCoordinator::new(registry, &config(5));

        let bundle = coordinator.collect_all(&event()).await;
        assert_eq!(
            bundle.collector_names(),
            vec!["git".to_string(), "metrics".to_string()]
        );
        assert!(bundle.git().is_some());
        assert!(bundle.metrics().is_some());
    }

    #[tokio::test]
    async fn empty_registry_yields_empty_bundle() {
        let coordinator = CollectionCoordinator::new(CollectorRegistry::new(), &config(5));
        let bundle = coordinator.collect_all(&event()).await;
        assert!(bundle.is_empty());
        assert_eq!(bundle.error_text(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_collector_does_not_block_the_others() {
        let registry = CollectorRegistry::new()
            .with(Arc::new(HangingCollector))
            .with(Arc::new(GitFake));
        let coordinator = CollectionCoordinator::new(registry, &config(1));

        let bundle = coordinator.collect_all(&event()).await;
        assert_eq!(bundle.collector_names(), vec!["git".to_string()]);
    }

    #[tokio::test]
    async fn total_time_is_bounded_by_the_deadline() {
        let registry = CollectorRegistry::new().with(Arc::new(HangingCollector));
        let coordinator = CollectionCoordinator::new(registry, &config(1));

        let started = Instant::now();
        let bundle = coordinator.collect_all(&event()).await;
        assert!(bundle.is_empty());
        // 1s deadline plus scheduling slack, nowhere near the 3600s nap
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
