//! Host loop driving reconciliation passes on a fixed cadence

use crate::engine::{PassOutcome, Replicator};
use crate::monitoring::PassMonitor;
use log::{info, warn};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Runs one pass at a time, forever, until cancelled
///
/// After a warm-up delay the first pass starts immediately; later passes
/// start on the interval. A pass that overruns the interval swallows the
/// missed ticks instead of triggering a burst of catch-up passes.
pub struct ReplicationService {
    replicator: Replicator,
    monitor: PassMonitor,
    interval: Duration,
    warmup: Duration,
}

impl ReplicationService {
    /// A pass that outlasts the interval is reported as slow
    pub fn new(replicator: Replicator, interval: Duration, warmup: Duration) -> Self {
        // tokio intervals cannot have a zero period
        let interval = interval.max(Duration::from_millis(1));
        Self {
            replicator,
            monitor: PassMonitor::new().with_slow_pass_threshold(interval),
            interval,
            warmup,
        }
    }

    /// Use a monitor shared with the caller, keeping its own threshold
    pub fn with_monitor(mut self, monitor: PassMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn monitor(&self) -> &PassMonitor {
        &self.monitor
    }

    /// Run a single pass and record it
    pub async fn run_once(&self, token: &CancellationToken) -> PassOutcome {
        let outcome = self.replicator.run_pass(token).await;

        if !outcome.is_clean() {
            warn!("Pass reported {} failure(s):", outcome.failures.len());
            for failure in &outcome.failures {
                warn!("  {}", failure);
            }
        }

        self.monitor.record_pass(&outcome);
        self.monitor.collect_metrics();
        outcome
    }

    /// Run passes until the token is cancelled
    ///
    /// Returns the number of passes run.
    pub async fn run(&self, token: &CancellationToken) -> usize {
        if !self.warmup.is_zero() {
            info!("Waiting {:?} before the first pass", self.warmup);
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Cancelled during warm-up");
                    return 0;
                }
                _ = tokio::time::sleep(self.warmup) => {}
            }
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut passes = 0;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.run_once(token).await;
            passes += 1;

            if token.is_cancelled() {
                break;
            }
        }

        info!("Replication service stopped after {} pass(es)", passes);
        passes
    }
}
