//! Throughput counters and the periodic reporter that logs them.
//!
//! Each responder owns its own [`Counter`]; connection tasks add to it and a
//! single [`Reporter`] task reads it once per interval until shut down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Monotonic counter shared between a responder and its reporter.
///
/// Only additions are possible; the value wraps silently on overflow.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Release);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// What the reported counter measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// HTTP requests handled
    Requests,
    /// TCP bytes read
    Bytes,
}

/// A single reading of the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub value: u64,
    pub runtime: Duration,
}

/// What a reporter logged before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub reports: u64,
    /// The snapshot carried by the most recent report
    pub last: Option<Snapshot>,
}

/// Periodic task logging a counter and the time since the responder started.
#[derive(Debug)]
pub struct Reporter {
    kind: ReportKind,
    counter: Counter,
    start: Instant,
    period: Duration,
}

impl Reporter {
    pub fn new(kind: ReportKind, counter: Counter, start: Instant, period: Duration) -> Self {
        Self {
            kind,
            counter,
            start,
            period,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            value: self.counter.get(),
            runtime: self.start.elapsed(),
        }
    }

    /// Spawn the reporter. The task ends when `shutdown` is cancelled and
    /// yields a summary of what it logged.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<ReportSummary> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) -> ReportSummary {
        // First report one full period after start, not immediately
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        let mut summary = ReportSummary::default();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let snapshot = self.snapshot();
                    self.report(snapshot);
                    summary.reports += 1;
                    summary.last = Some(snapshot);
                }
            }
        }

        summary
    }

    fn report(&self, snapshot: Snapshot) {
        match self.kind {
            ReportKind::Requests => info!(
                requests = snapshot.value,
                runtime = ?snapshot.runtime,
                "requests handled"
            ),
            ReportKind::Bytes => info!(
                bytes = snapshot.value,
                runtime = ?snapshot.runtime,
                "bytes read"
            ),
        }
    }
}
