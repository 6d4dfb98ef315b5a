use crate::classification::ClassificationTable;
use crate::config::ReplicationConfig;
use crate::engine::assembly::{assemble_patch, telemetry_selectors};
use crate::engine::timeslice::earliest_slice;
use crate::error::{SourceError, TwinError};
use crate::observation::Timestamp;
use crate::patch::TwinId;
use crate::source::{TelemetrySource, TelemetryWindow};
use crate::twins::TwinDirectory;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Static inputs of a reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub struct PassSettings {
    /// Model identifiers whose twins are reconciled
    pub models: Vec<String>,
    /// Telemetry alignment window
    pub window: TelemetryWindow,
    /// Devices reconciled at the same time
    pub concurrency: usize,
}

impl From<&ReplicationConfig> for PassSettings {
    fn from(config: &ReplicationConfig) -> Self {
        Self {
            models: config.models.clone(),
            window: TelemetryWindow {
                lookback: config.lookback(),
                bucket_width: config.bucket_width(),
            },
            concurrency: config.concurrency,
        }
    }
}

/// Why a device was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Known to the twin graph, but the telemetry store has nothing for it
    NoTelemetry,
    /// Every component patch came out empty
    NothingToSubmit,
}

/// Final state of one device within a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Updated,
    Skipped(SkipReason),
    Failed,
    /// Not started, or interrupted before all its twins were submitted
    Cancelled,
}

/// What happened to one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub device: String,
    pub status: DeviceStatus,
    pub twins_updated: usize,
    /// Twins whose patch was empty and therefore not sent
    pub twins_skipped: usize,
    pub twins_failed: usize,
}

impl DeviceReport {
    fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            status: DeviceStatus::Cancelled,
            twins_updated: 0,
            twins_skipped: 0,
            twins_failed: 0,
        }
    }
}

/// A recoverable failure recorded during a pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassFailure {
    /// Listing the twins of one model failed
    Discovery { model: String, error: TwinError },
    /// Fetching telemetry for a device failed
    Device { device: String, error: SourceError },
    /// Submitting one twin's patch failed
    Twin { twin_id: TwinId, error: TwinError },
}

impl fmt::Display for PassFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassFailure::Discovery { model, error } => {
                write!(f, "discovery of model {} failed: {}", model, error)
            }
            PassFailure::Device { device, error } => {
                write!(f, "device {} failed: {}", device, error)
            }
            PassFailure::Twin { twin_id, error } => {
                write!(f, "twin {} failed: {}", twin_id, error)
            }
        }
    }
}

/// Structured result of one reconciliation pass
///
/// A pass never fails as a whole; partial failures are enumerated here.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome {
    pub started_at: Timestamp,
    pub duration: Duration,
    /// One report per discovered device, sorted by device id
    pub devices: Vec<DeviceReport>,
    /// Discovery failures first, then device and twin failures by device id
    pub failures: Vec<PassFailure>,
    /// Cancellation was observed before the pass finished
    pub cancelled: bool,
}

impl PassOutcome {
    pub fn devices_discovered(&self) -> usize {
        self.devices.len()
    }

    fn count_status(&self, matches: impl Fn(DeviceStatus) -> bool) -> usize {
        self.devices.iter().filter(|d| matches(d.status)).count()
    }

    pub fn devices_updated(&self) -> usize {
        self.count_status(|s| s == DeviceStatus::Updated)
    }

    pub fn devices_skipped(&self) -> usize {
        self.count_status(|s| matches!(s, DeviceStatus::Skipped(_)))
    }

    pub fn devices_failed(&self) -> usize {
        self.count_status(|s| s == DeviceStatus::Failed)
    }

    pub fn twins_updated(&self) -> usize {
        self.devices.iter().map(|d| d.twins_updated).sum()
    }

    pub fn twins_failed(&self) -> usize {
        self.devices.iter().map(|d| d.twins_failed).sum()
    }

    pub fn report_for(&self, device: &str) -> Option<&DeviceReport> {
        self.devices.iter().find(|d| d.device == device)
    }

    /// No failures of any kind were recorded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of reconciling one device, before folding into the pass
struct DeviceOutcome {
    report: DeviceReport,
    failures: Vec<PassFailure>,
}

impl DeviceOutcome {
    fn new(device: &str) -> Self {
        Self {
            report: DeviceReport::new(device),
            failures: Vec::new(),
        }
    }

    fn finish(mut self, status: DeviceStatus) -> Self {
        self.report.status = status;
        self
    }

    fn fetch_failed(mut self, error: SourceError) -> Self {
        self.failures.push(PassFailure::Device {
            device: self.report.device.clone(),
            error,
        });
        self.finish(DeviceStatus::Failed)
    }
}

/// Run an external call unless the token fires first
async fn until_cancelled<F: Future>(token: &CancellationToken, call: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = call => Some(output),
    }
}

/// Reconciliation engine
///
/// Discovers devices through the twin directory, reads their state from the
/// telemetry store and pushes one patch per component twin. The
/// classification table is fixed at construction.
pub struct Replicator {
    source: Arc<dyn TelemetrySource>,
    directory: Arc<dyn TwinDirectory>,
    table: ClassificationTable,
    settings: PassSettings,
}

impl Replicator {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        directory: Arc<dyn TwinDirectory>,
        table: ClassificationTable,
        settings: PassSettings,
    ) -> Self {
        Self {
            source,
            directory,
            table,
            settings,
        }
    }

    pub fn settings(&self) -> &PassSettings {
        &self.settings
    }

    /// Run one full reconciliation pass
    pub async fn run_pass(&self, token: &CancellationToken) -> PassOutcome {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            "Starting reconciliation pass over {} model(s)",
            self.settings.models.len()
        );

        let (devices, discovery_failures) = self.discover(token).await;
        if devices.is_empty() {
            info!("No devices to reconcile");
        }

        let mut outcomes: Vec<DeviceOutcome> = stream::iter(devices.iter())
            .map(|device| self.reconcile_device(device, token))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.report.device.cmp(&b.report.device));

        let (reports, failures) = outcomes.into_iter().fold(
            (Vec::with_capacity(devices.len()), discovery_failures),
            |(mut reports, mut failures), outcome| {
                reports.push(outcome.report);
                failures.extend(outcome.failures);
                (reports, failures)
            },
        );

        let outcome = PassOutcome {
            started_at,
            duration: start.elapsed(),
            devices: reports,
            failures,
            cancelled: token.is_cancelled(),
        };

        info!(
            "Pass finished in {:?}: {} device(s), {} updated, {} skipped, {} failed, {} twin(s) updated",
            outcome.duration,
            outcome.devices_discovered(),
            outcome.devices_updated(),
            outcome.devices_skipped(),
            outcome.devices_failed(),
            outcome.twins_updated()
        );
        if outcome.cancelled {
            warn!("Pass was cancelled before completion");
        }

        outcome
    }

    /// Union of the devices of every configured model
    async fn discover(&self, token: &CancellationToken) -> (BTreeSet<String>, Vec<PassFailure>) {
        let mut devices = BTreeSet::new();
        let mut failures = Vec::new();

        for model in &self.settings.models {
            match until_cancelled(token, self.directory.list_devices_of_model(model)).await {
                None => break,
                Some(Ok(found)) => {
                    debug!("Model {}: {} device(s)", model, found.len());
                    devices.extend(found);
                }
                Some(Err(e)) => {
                    error!("Failed to list devices of model {}: {}", model, e);
                    failures.push(PassFailure::Discovery {
                        model: model.clone(),
                        error: e,
                    });
                }
            }
        }

        (devices, failures)
    }

    async fn reconcile_device(&self, device: &str, token: &CancellationToken) -> DeviceOutcome {
        let mut outcome = DeviceOutcome::new(device);

        let properties = match until_cancelled(token, self.source.latest_device_properties(device)).await {
            None => return outcome.finish(DeviceStatus::Cancelled),
            Some(Err(e)) => {
                warn!("Device {}: failed to fetch latest properties: {}", device, e);
                return outcome.fetch_failed(e);
            }
            Some(Ok(properties)) => properties,
        };

        if properties.is_empty() {
            warn!("Device {}: no telemetry found, skipping", device);
            return outcome.finish(DeviceStatus::Skipped(SkipReason::NoTelemetry));
        }

        let selectors = telemetry_selectors(&self.table, &properties);
        let slice = if selectors.is_empty() {
            None
        } else {
            debug!("Device {}: aligning {} telemetry series", device, selectors.len());
            let fetch = self
                .source
                .selected_metrics(device, &selectors, self.settings.window);
            match until_cancelled(token, fetch).await {
                None => return outcome.finish(DeviceStatus::Cancelled),
                Some(Err(e)) => {
                    warn!("Device {}: failed to fetch telemetry: {}", device, e);
                    return outcome.fetch_failed(e);
                }
                Some(Ok(metrics)) => {
                    let slice = earliest_slice(&metrics);
                    match &slice {
                        Some(slice) => debug!(
                            "Device {}: using bucket {} ({} observation(s))",
                            device,
                            slice.time,
                            slice.observations.len()
                        ),
                        None => warn!("Device {}: empty time-slice, skipping telemetry", device),
                    }
                    slice
                }
            }
        };

        let patch = assemble_patch(device, &self.table, &properties, slice.as_ref());

        let mut interrupted = false;
        for (twin_id, document) in patch.twins() {
            if document.is_empty() {
                debug!("Twin {}: nothing to update", twin_id);
                outcome.report.twins_skipped += 1;
                continue;
            }
            if token.is_cancelled() {
                interrupted = true;
                break;
            }

            match self.directory.apply_patch(&twin_id, document).await {
                Ok(()) => outcome.report.twins_updated += 1,
                Err(e) => {
                    warn!("Twin {}: patch failed: {}", twin_id, e);
                    outcome.report.twins_failed += 1;
                    outcome.failures.push(PassFailure::Twin { twin_id, error: e });
                }
            }
        }

        let status = if outcome.report.twins_failed > 0 {
            DeviceStatus::Failed
        } else if interrupted {
            DeviceStatus::Cancelled
        } else if outcome.report.twins_updated == 0 {
            DeviceStatus::Skipped(SkipReason::NothingToSubmit)
        } else {
            DeviceStatus::Updated
        };
        outcome.finish(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Observation, Scalar};
    use crate::patch::PatchDocument;
    use crate::source::MockSource;
    use crate::twins::{MockDirectory, TwinFuture};
    use chrono::TimeZone;

    const MODEL: &str = "dtmi:x;1";

    fn minute(m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2023, 5, 1, 12, m, 0).unwrap()
    }

    fn settings(models: &[&str]) -> PassSettings {
        PassSettings {
            models: models.iter().map(|m| m.to_string()).collect(),
            window: TelemetryWindow {
                lookback: Duration::from_secs(300),
                bucket_width: Duration::from_secs(60),
            },
            concurrency: 4,
        }
    }

    fn table() -> ClassificationTable {
        ClassificationTable::new()
            .with_model(MODEL, ["t", "h"])
            .with_model("dtmi:boiler;1", ["temp"])
            .with_model("dtmi:valve;1", Vec::<String>::new())
    }

    fn status(device: &str, value: &str) -> Observation {
        Observation::new(device, None, MODEL, "Status", minute(0), value)
    }

    fn replicator(source: &Arc<MockSource>, directory: &Arc<MockDirectory>) -> Replicator {
        Replicator::new(source.clone(), directory.clone(), table(), settings(&[MODEL]))
    }

    #[tokio::test]
    async fn test_properties_and_current_snapshot_submitted() {
        let properties = vec![
            Observation::new("A", None, MODEL, "t", minute(0), 20.0),
            status("A", "OK"),
        ];
        // Buckets arrive as T2, T1, T3
        let metrics = vec![
            Observation::new("A", None, MODEL, "t", minute(2), 22.0),
            Observation::new("A", None, MODEL, "t", minute(1), 21.5),
            Observation::new("A", None, MODEL, "t", minute(3), 23.0),
        ];
        let source = Arc::new(
            MockSource::new()
                .with_properties("A", properties)
                .with_metrics("A", metrics),
        );
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["A"]));

        let outcome = replicator(&source, &directory)
            .run_pass(&CancellationToken::new())
            .await;

        assert!(outcome.is_clean());
        assert_eq!(outcome.devices_updated(), 1);

        let patch = directory.patch_for("A-Device").unwrap();
        assert_eq!(patch.value_at("/Currentt"), Some(&Scalar::Float(21.5)));
        assert_eq!(patch.value_at("/Status"), Some(&Scalar::Text("OK".to_string())));
        assert_eq!(patch.value_at("/t"), None);

        let calls = source.metric_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].metrics.len(), 1);
        assert_eq!(calls[0].window, settings(&[]).window);
    }

    #[tokio::test]
    async fn test_one_failing_device_does_not_affect_others() {
        let source = Arc::new(
            MockSource::new()
                .with_properties("A", vec![status("A", "OK")])
                .with_properties_error("B", SourceError::HttpError("connection reset".to_string()))
                .with_properties("C", vec![status("C", "OK")]),
        );
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["A", "B", "C"]));

        let outcome = replicator(&source, &directory)
            .run_pass(&CancellationToken::new())
            .await;

        assert_eq!(outcome.devices_discovered(), 3);
        assert_eq!(outcome.devices_updated(), 2);
        assert_eq!(outcome.devices_failed(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            &outcome.failures[0],
            PassFailure::Device { device, .. } if device == "B"
        ));
        assert!(directory.patch_for("A-Device").is_some());
        assert!(directory.patch_for("B-Device").is_none());
        assert!(directory.patch_for("C-Device").is_some());
    }

    #[tokio::test]
    async fn test_telemetry_fetch_failure_fails_device() {
        let source = Arc::new(
            MockSource::new()
                .with_properties("A", vec![Observation::new("A", None, MODEL, "t", minute(0), 1.0)])
                .with_metrics_error("A", SourceError::QueryFailed {
                    status: 500,
                    body: "boom".to_string(),
                }),
        );
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["A"]));

        let outcome = replicator(&source, &directory)
            .run_pass(&CancellationToken::new())
            .await;

        assert_eq!(outcome.report_for("A").unwrap().status, DeviceStatus::Failed);
        assert_eq!(directory.attempts(), 0);
    }

    #[tokio::test]
    async fn test_device_without_telemetry_is_skipped() {
        let source = Arc::new(MockSource::new());
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["ghost"]));

        let outcome = replicator(&source, &directory)
            .run_pass(&CancellationToken::new())
            .await;

        assert!(outcome.is_clean());
        assert_eq!(outcome.devices_skipped(), 1);
        assert_eq!(
            outcome.report_for("ghost").unwrap().status,
            DeviceStatus::Skipped(SkipReason::NoTelemetry)
        );
        assert_eq!(directory.attempts(), 0);
        assert!(source.metric_calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_telemetry_selectors_means_no_alignment_fetch() {
        let source = Arc::new(MockSource::new().with_properties("A", vec![status("A", "OK")]));
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["A"]));

        replicator(&source, &directory)
            .run_pass(&CancellationToken::new())
            .await;

        assert!(source.metric_calls().is_empty());
        assert_eq!(directory.applied().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_time_slice_still_submits_properties() {
        let source = Arc::new(MockSource::new().with_properties(
            "A",
            vec![
                Observation::new("A", None, MODEL, "t", minute(0), 1.0),
                status("A", "OK"),
            ],
        ));
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["A"]));

        let outcome = replicator(&source, &directory)
            .run_pass(&CancellationToken::new())
            .await;

        assert_eq!(outcome.devices_updated(), 1);
        let patch = directory.patch_for("A-Device").unwrap();
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.value_at("/Currentt"), None);
    }

    #[tokio::test]
    async fn test_telemetry_only_device_with_empty_slice_is_skipped() {
        let source = Arc::new(MockSource::new().with_properties(
            "A",
            vec![Observation::new("A", None, MODEL, "h", minute(0), 40.0)],
        ));
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["A"]));

        let outcome = replicator(&source, &directory)
            .run_pass(&CancellationToken::new())
            .await;

        let report = outcome.report_for("A").unwrap();
        assert_eq!(report.status, DeviceStatus::Skipped(SkipReason::NothingToSubmit));
        assert_eq!(report.twins_skipped, 1);
        assert_eq!(directory.attempts(), 0);
    }

    #[tokio::test]
    async fn test_twin_failure_is_isolated() {
        let properties = vec![
            status("A", "OK"),
            Observation::new("A", Some("Boiler"), "dtmi:boiler;1", "Mode", minute(0), "heat"),
            Observation::new("A", Some("Valve"), "dtmi:valve;1", "Open", minute(0), true),
        ];
        let boiler = TwinId::for_component("A", Some("Boiler"));
        let source = Arc::new(
            MockSource::new()
                .with_properties("A", properties)
                .with_properties("B", vec![status("B", "OK")]),
        );
        let directory = Arc::new(
            MockDirectory::new()
                .with_devices(MODEL, ["A", "B"])
                .with_patch_error(boiler.clone(), TwinError::NotFound(boiler.to_string())),
        );

        let outcome = replicator(&source, &directory)
            .run_pass(&CancellationToken::new())
            .await;

        let report = outcome.report_for("A").unwrap();
        assert_eq!(report.status, DeviceStatus::Failed);
        assert_eq!(report.twins_updated, 2);
        assert_eq!(report.twins_failed, 1);
        assert_eq!(outcome.report_for("B").unwrap().status, DeviceStatus::Updated);

        assert_eq!(
            outcome.failures,
            vec![PassFailure::Twin {
                twin_id: boiler,
                error: TwinError::NotFound("A-Boiler".to_string()),
            }]
        );
        assert!(directory.patch_for("A-Device").is_some());
        assert!(directory.patch_for("A-Valve").is_some());
        assert_eq!(directory.attempts(), 4);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_recorded_per_model() {
        let source = Arc::new(MockSource::new().with_properties("A", vec![status("A", "OK")]));
        let directory = Arc::new(
            MockDirectory::new()
                .with_discovery_error(
                    "dtmi:broken;1",
                    TwinError::RequestFailed {
                        status: 403,
                        body: "forbidden".to_string(),
                    },
                )
                .with_devices(MODEL, ["A"]),
        );
        let replicator = Replicator::new(
            source.clone(),
            directory.clone(),
            table(),
            settings(&["dtmi:broken;1", MODEL]),
        );

        let outcome = replicator.run_pass(&CancellationToken::new()).await;

        assert_eq!(outcome.devices_updated(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            &outcome.failures[0],
            PassFailure::Discovery { model, .. } if model == "dtmi:broken;1"
        ));
    }

    #[tokio::test]
    async fn test_device_in_several_models_reconciled_once() {
        let source = Arc::new(MockSource::new().with_properties("A", vec![status("A", "OK")]));
        let directory = Arc::new(
            MockDirectory::new()
                .with_devices(MODEL, ["A"])
                .with_devices("dtmi:y;1", ["A"]),
        );
        let replicator = Replicator::new(
            source.clone(),
            directory.clone(),
            table(),
            settings(&[MODEL, "dtmi:y;1"]),
        );

        let outcome = replicator.run_pass(&CancellationToken::new()).await;

        assert_eq!(outcome.devices_discovered(), 1);
        assert_eq!(source.property_calls(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_reports_sorted_by_device() {
        let source = Arc::new(MockSource::new());
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["c", "a", "b"]));

        let outcome = replicator(&source, &directory)
            .run_pass(&CancellationToken::new())
            .await;

        let devices: Vec<&str> = outcome.devices.iter().map(|d| d.device.as_str()).collect();
        assert_eq!(devices, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_pass_does_nothing() {
        let source = Arc::new(MockSource::new().with_properties("A", vec![status("A", "OK")]));
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["A"]));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = replicator(&source, &directory).run_pass(&token).await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.devices_discovered(), 0);
        assert!(source.property_calls().is_empty());
        assert_eq!(directory.attempts(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_inflight_fetch() {
        let source = Arc::new(
            MockSource::new()
                .with_properties("A", vec![status("A", "OK")])
                .with_delay(Duration::from_secs(30)),
        );
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["A"]));
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = replicator(&source, &directory).run_pass(&token).await;

        assert!(outcome.cancelled);
        assert!(outcome.is_clean());
        assert_eq!(outcome.report_for("A").unwrap().status, DeviceStatus::Cancelled);
        assert_eq!(directory.attempts(), 0);
    }

    /// Directory that fires the token once a patch has been applied
    struct CancellingDirectory {
        inner: MockDirectory,
        token: CancellationToken,
    }

    impl TwinDirectory for CancellingDirectory {
        fn list_devices_of_model<'a>(
            &'a self,
            model: &'a str,
        ) -> TwinFuture<'a, BTreeSet<String>> {
            self.inner.list_devices_of_model(model)
        }

        fn apply_patch<'a>(
            &'a self,
            twin_id: &'a TwinId,
            patch: &'a PatchDocument,
        ) -> TwinFuture<'a, ()> {
            Box::pin(async move {
                let result = self.inner.apply_patch(twin_id, patch).await;
                self.token.cancel();
                result
            })
        }
    }

    #[tokio::test]
    async fn test_cancellation_between_twin_submissions() {
        let mut source = MockSource::new();
        for device in ["A", "B", "C"] {
            source = source.with_properties(
                device,
                vec![
                    status(device, "OK"),
                    Observation::new(device, Some("Boiler"), "dtmi:boiler;1", "Mode", minute(0), "heat"),
                ],
            );
        }
        let source = Arc::new(source);
        let token = CancellationToken::new();
        let directory = Arc::new(CancellingDirectory {
            inner: MockDirectory::new().with_devices(MODEL, ["A", "B", "C"]),
            token: token.clone(),
        });
        let mut settings = settings(&[MODEL]);
        settings.concurrency = 1;

        let outcome = Replicator::new(source.clone(), directory.clone(), table(), settings)
            .run_pass(&token)
            .await;

        assert!(outcome.cancelled);
        assert!(outcome.is_clean());

        // Root twin went through, the Boiler twin was never attempted
        assert_eq!(directory.inner.attempts(), 1);
        assert!(directory.inner.patch_for("A-Device").is_some());

        let first = outcome.report_for("A").unwrap();
        assert_eq!(first.status, DeviceStatus::Cancelled);
        assert_eq!(first.twins_updated, 1);
        assert_eq!(first.twins_failed, 0);

        for device in ["B", "C"] {
            let report = outcome.report_for(device).unwrap();
            assert_eq!(report.status, DeviceStatus::Cancelled);
            assert_eq!(report.twins_updated, 0);
        }
        assert_eq!(source.property_calls(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_progresses() {
        let source = Arc::new(MockSource::new().with_properties("A", vec![status("A", "OK")]));
        let directory = Arc::new(MockDirectory::new().with_devices(MODEL, ["A"]));
        let mut settings = settings(&[MODEL]);
        settings.concurrency = 0;

        let outcome = Replicator::new(source.clone(), directory.clone(), table(), settings)
            .run_pass(&CancellationToken::new())
            .await;

        assert_eq!(outcome.devices_updated(), 1);
    }

    #[test]
    fn test_pass_settings_from_config() {
        let config = ReplicationConfig {
            models: vec![MODEL.to_string()],
            lookback_seconds: 600,
            bucket_seconds: 30,
            concurrency: 8,
            ..ReplicationConfig::default()
        };

        let settings = PassSettings::from(&config);
        assert_eq!(settings.models, vec![MODEL.to_string()]);
        assert_eq!(settings.window.lookback, Duration::from_secs(600));
        assert_eq!(settings.window.bucket_width, Duration::from_secs(30));
        assert_eq!(settings.concurrency, 8);
    }

    #[test]
    fn test_failure_display() {
        let failure = PassFailure::Twin {
            twin_id: TwinId::for_component("A", Some("Boiler")),
            error: TwinError::NotFound("A-Boiler".to_string()),
        };
        assert_eq!(failure.to_string(), "twin A-Boiler failed: Twin not found: A-Boiler");
    }
}
