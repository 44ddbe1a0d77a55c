//! Periodic request trace records.
//!
//! Every `interval_secs` one record is emitted under the configured logger
//! name, tagged with the process name, carrying the request counts seen since
//! the previous record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::RequestTracerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceCounts {
    pub requests: u64,
    pub failures: u64,
    pub modified: u64,
}

#[derive(Debug)]
pub struct RequestTracer {
    config: RequestTracerConfig,
    process: String,
    requests: AtomicU64,
    failures: AtomicU64,
    modified: AtomicU64,
}

impl RequestTracer {
    pub fn new(config: RequestTracerConfig, process: impl Into<String>) -> Self {
        Self {
            config,
            process: process.into(),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            modified: AtomicU64::new(0),
        }
    }

    /// Count one finished exchange. 5xx statuses count as failures.
    pub fn record(&self, status: u16, modified: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if status >= 500 {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if modified {
            self.modified.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read and reset the counters.
    pub fn take_counts(&self) -> TraceCounts {
        TraceCounts {
            requests: self.requests.swap(0, Ordering::Relaxed),
            failures: self.failures.swap(0, Ordering::Relaxed),
            modified: self.modified.swap(0, Ordering::Relaxed),
        }
    }

    fn emit(&self) {
        let counts = self.take_counts();
        tracing::info!(
            target: "flex_proxy::request_trace",
            logger = %self.config.logger_name,
            process = %self.process,
            pid = std::process::id(),
            requests = counts.requests,
            failures = counts.failures,
            modified = counts.modified,
            "Request trace"
        );
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Request tracer disabled");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.emit(),
                _ = shutdown.recv() => {
                    tracing::info!("Request tracer received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_reset_after_read() {
        let tracer = RequestTracer::new(RequestTracerConfig::default(), "proxy.local");
        tracer.record(200, true);
        tracer.record(502, false);
        tracer.record(404, false);

        assert_eq!(
            tracer.take_counts(),
            TraceCounts {
                requests: 3,
                failures: 1,
                modified: 1
            }
        );
        assert_eq!(tracer.take_counts().requests, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let tracer = Arc::new(RequestTracer::new(RequestTracerConfig::default(), "proxy.local"));
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(tracer.run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
