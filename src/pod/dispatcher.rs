//! Bounded offload of blocking pod operations from the caller's scheduling
//! context, sized by `INSPECT_MAX_POD_OPS` (default `4 * logical CPUs`).

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config;

/// A visibility counter the harness can read to render in-flight pod
/// operation counts, analogous to the original's `pod-op` gauge.
#[derive(Debug, Default)]
pub struct PodOpGauge {
    in_flight: AtomicUsize,
}

impl PodOpGauge {
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

/// A bounded-parallelism dispatcher for blocking pod work.
pub struct PodOpDispatcher {
    permits: Arc<Semaphore>,
    gauge: Arc<PodOpGauge>,
}

impl PodOpDispatcher {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config::max_pod_ops())),
            gauge: Arc::new(PodOpGauge::default()),
        }
    }

    pub fn gauge(&self) -> Arc<PodOpGauge> {
        self.gauge.clone()
    }

    /// Runs `op` once a permit is available, incrementing and decrementing
    /// the visibility gauge around the call.
    pub async fn submit<F, T>(&self, op: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.permits.acquire().await.expect("semaphore open");
        self.gauge.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = op.await;
        self.gauge.in_flight.fetch_sub(1, Ordering::Relaxed);
        result
    }
}

impl Default for PodOpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submits_and_tracks_in_flight_count() {
        let dispatcher = PodOpDispatcher::new();
        let gauge = dispatcher.gauge();
        assert_eq!(gauge.in_flight(), 0);
        let result = dispatcher.submit(async { 1 + 1 }).await;
        assert_eq!(result, 2);
        assert_eq!(gauge.in_flight(), 0);
    }
}
