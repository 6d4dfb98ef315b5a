//! Self-monitoring for the replicator
//!
//! Keeps a bounded history of recent reconciliation passes and derives the
//! health figures an operator cares about: how long passes take, how many
//! twin submissions succeed, and whether passes keep failing back to back.

use crate::engine::PassOutcome;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Health metrics derived from recent passes
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationMetrics {
    /// Passes currently held in the history
    pub passes_recorded: usize,
    /// Average pass duration in milliseconds
    pub avg_pass_duration_ms: f64,
    /// Passes that took longer than the slow-pass threshold
    pub slow_passes: usize,
    /// Twin patches applied across recorded passes
    pub twins_updated: usize,
    /// Twin patches rejected across recorded passes
    pub twins_failed: usize,
    /// Twin submission success rate as a percentage (0-100)
    pub twin_success_rate: f64,
    /// Most recent passes that reported at least one failure, unbroken
    pub consecutive_failed_passes: usize,
    /// Start of the most recent pass
    pub last_pass_at: Option<DateTime<Utc>>,
    /// Resident memory of the process in bytes, 0 if unknown
    pub memory_usage_bytes: u64,
    /// When these metrics were collected
    pub timestamp: DateTime<Utc>,
}

/// Condensed record of one pass
#[derive(Debug, Clone)]
struct PassSample {
    started_at: DateTime<Utc>,
    duration: Duration,
    twins_updated: usize,
    twins_failed: usize,
    clean: bool,
}

impl From<&PassOutcome> for PassSample {
    fn from(outcome: &PassOutcome) -> Self {
        Self {
            started_at: outcome.started_at,
            duration: outcome.duration,
            twins_updated: outcome.twins_updated(),
            twins_failed: outcome.twins_failed(),
            clean: outcome.is_clean(),
        }
    }
}

/// Rolling history of reconciliation passes
#[derive(Debug, Clone)]
pub struct PassMonitor {
    samples: Arc<Mutex<VecDeque<PassSample>>>,
    max_samples: usize,
    slow_pass_threshold: Duration,
}

impl Default for PassMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMonitor {
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// Keep at most `max_samples` passes
    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::new())),
            max_samples: max_samples.max(1),
            slow_pass_threshold: Duration::from_secs(60),
        }
    }

    /// Passes longer than this count as slow
    pub fn with_slow_pass_threshold(mut self, threshold: Duration) -> Self {
        self.slow_pass_threshold = threshold;
        self
    }

    /// Record the outcome of a finished pass
    pub fn record_pass(&self, outcome: &PassOutcome) {
        debug!("Recording pass outcome: {:?}", outcome.duration);

        let mut samples = self.samples.lock().unwrap();
        samples.push_back(PassSample::from(outcome));

        while samples.len() > self.max_samples {
            samples.pop_front();
        }
    }

    pub fn passes_recorded(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    /// Resident memory of this process
    fn memory_usage(&self) -> u64 {
        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                let rss_kb = status
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok());
                if let Some(kb) = rss_kb {
                    return kb * 1024;
                }
            }
        }

        0
    }

    /// Derive current metrics and log them
    pub fn collect_metrics(&self) -> ReplicationMetrics {
        let samples = self.samples.lock().unwrap();

        let avg_pass_duration_ms = if samples.is_empty() {
            0.0
        } else {
            let total_ms: f64 = samples.iter().map(|s| s.duration.as_millis() as f64).sum();
            total_ms / samples.len() as f64
        };

        let slow_passes = samples
            .iter()
            .filter(|s| s.duration > self.slow_pass_threshold)
            .count();

        let twins_updated: usize = samples.iter().map(|s| s.twins_updated).sum();
        let twins_failed: usize = samples.iter().map(|s| s.twins_failed).sum();
        let attempted = twins_updated + twins_failed;
        let twin_success_rate = if attempted == 0 {
            100.0
        } else {
            (twins_updated as f64 / attempted as f64) * 100.0
        };

        let consecutive_failed_passes = samples.iter().rev().take_while(|s| !s.clean).count();

        let metrics = ReplicationMetrics {
            passes_recorded: samples.len(),
            avg_pass_duration_ms,
            slow_passes,
            twins_updated,
            twins_failed,
            twin_success_rate,
            consecutive_failed_passes,
            last_pass_at: samples.back().map(|s| s.started_at),
            memory_usage_bytes: self.memory_usage(),
            timestamp: Utc::now(),
        };
        drop(samples);

        info!(
            "Replicator health: passes={}, avg_pass={:.1}ms, twin_success={:.1}%, memory={}MB",
            metrics.passes_recorded,
            metrics.avg_pass_duration_ms,
            metrics.twin_success_rate,
            metrics.memory_usage_bytes / 1024 / 1024
        );

        if metrics.slow_passes > 0 {
            warn!(
                "{} of {} recent passes took longer than {:?} ({:.1}ms on average)",
                metrics.slow_passes,
                metrics.passes_recorded,
                self.slow_pass_threshold,
                metrics.avg_pass_duration_ms
            );
        }

        if metrics.twin_success_rate < 90.0 && attempted > 0 {
            warn!(
                "Low twin update success rate: {:.1}%",
                metrics.twin_success_rate
            );
        }

        if metrics.consecutive_failed_passes >= 3 {
            warn!(
                "{} consecutive passes reported failures",
                metrics.consecutive_failed_passes
            );
        }

        metrics
    }
}
