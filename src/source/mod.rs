/// Telemetry store port and its implementations
pub mod annotated_csv;
pub mod flux;
pub mod influxdb;
pub mod mock;

pub use influxdb::InfluxDbSource;
pub use mock::MockSource;

use crate::error::SourceError;
use crate::observation::{MetricSelector, Observation};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by telemetry store calls
pub type SourceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Observation>, SourceError>> + Send + 'a>>;

/// Time window for aligned telemetry queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryWindow {
    /// How far back from now to look
    pub lookback: Duration,
    /// Width of each mean-aggregated bucket
    pub bucket_width: Duration,
}

/// Capability the engine needs from the telemetry store
pub trait TelemetrySource: Send + Sync {
    /// Latest known value of every field, across every component of a device
    fn latest_device_properties<'a>(&'a self, device_id: &'a str) -> SourceFuture<'a>;

    /// Mean-aggregated samples of the selected series, bucketed over the window
    ///
    /// Buckets without samples are omitted rather than zero-filled.
    fn selected_metrics<'a>(
        &'a self,
        device_id: &'a str,
        metrics: &'a [MetricSelector],
        window: TelemetryWindow,
    ) -> SourceFuture<'a>;
}
