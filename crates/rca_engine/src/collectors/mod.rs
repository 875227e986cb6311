//! Collector capability contract and registry.
//!
//! A collector is a pluggable context source. Concrete log/API clients
//! live outside this crate and plug in through the `Collector` trait;
//! the engine only depends on `safe_collect`, which never lets a
//! collector failure cross its boundary. Absent output is a legitimate
//! outcome, not an error: the source simply had nothing relevant.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rca_common::{CollectorOutput, FailureEvent};
use tracing::{debug, warn};

pub mod coordinator;

pub use coordinator::CollectionCoordinator;

/// Shared parameters passed to every collector in a run.
#[derive(Debug, Clone)]
pub struct CollectParams {
    /// Deadline for this collector's `collect` call
    pub timeout: Duration,
    /// How far back to look for relevant history
    pub lookback_hours: u32,
}

impl CollectParams {
    pub fn new(timeout: Duration, lookback_hours: u32) -> Self {
        Self {
            timeout,
            lookback_hours,
        }
    }
}

/// A pluggable context source.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable name used as the bundle key
    fn name(&self) -> &str;

    /// Disabled collectors are skipped without invocation
    fn enabled(&self) -> bool {
        true
    }

    /// Gather context for the event. `Ok(None)` means the source had
    /// nothing relevant; errors are absorbed by `safe_collect`.
    async fn collect(
        &self,
        event: &FailureEvent,
        params: &CollectParams,
    ) -> Result<Option<CollectorOutput>>;

    /// Fault-swallowing wrapper around `collect`: skips when disabled,
    /// bounds the call with the per-collector deadline, and converts
    /// every failure (error, timeout, panic-free malformed result) into
    /// a logged absent outcome.
    async fn safe_collect(
        &self,
        event: &FailureEvent,
        params: &CollectParams,
    ) -> Option<CollectorOutput> {
        if !self.enabled() {
            debug!(collector = self.name(), "Collector disabled, skipping");
            return None;
        }

        match tokio::time::timeout(params.timeout, self.collect(event, params)).await {
            Ok(Ok(output)) => {
                debug!(
                    collector = self.name(),
                    present = output.is_some(),
                    "Collection completed"
                );
                output
            }
            Ok(Err(e)) => {
                warn!(collector = self.name(), error = %e, "Collection failed");
                None
            }
            Err(_) => {
                warn!(
                    collector = self.name(),
                    timeout_secs = params.timeout.as_secs(),
                    "Collection timed out"
                );
                None
            }
        }
    }
}

/// Ordered set of registered collectors for one engine instance.
///
/// Built from injected implementations rather than process-wide state;
/// enable/disable decisions belong to the collector itself.
#[derive(Default, Clone)]
pub struct CollectorRegistry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collector: Arc<dyn Collector>) -> &mut Self {
        self.collectors.push(collector);
        self
    }

    pub fn with(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    /// Collectors that will actually run this diagnosis.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Collector>> {
        self.collectors.iter().filter(|c| c.enabled())
    }
}
