use crate::error::SourceError;
use crate::observation::{MetricSelector, Observation};
use crate::source::{SourceFuture, TelemetrySource, TelemetryWindow};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Recorded call to `selected_metrics`
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRequest {
    pub device_id: String,
    pub metrics: Vec<MetricSelector>,
    pub window: TelemetryWindow,
}

/// Mock telemetry store for testing and development
///
/// Responses are scripted per device. Devices without a scripted response
/// return no observations. Calls are recorded so tests can assert on what
/// the engine asked for.
#[derive(Default)]
pub struct MockSource {
    properties: HashMap<String, Result<Vec<Observation>, SourceError>>,
    metrics: HashMap<String, Result<Vec<Observation>, SourceError>>,
    delay: Option<Duration>,
    property_calls: Arc<Mutex<Vec<String>>>,
    metric_calls: Arc<Mutex<Vec<MetricsRequest>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the latest-properties response for a device
    pub fn with_properties(mut self, device_id: &str, observations: Vec<Observation>) -> Self {
        self.properties
            .insert(device_id.to_string(), Ok(observations));
        self
    }

    /// Script the aligned-telemetry response for a device
    pub fn with_metrics(mut self, device_id: &str, observations: Vec<Observation>) -> Self {
        self.metrics.insert(device_id.to_string(), Ok(observations));
        self
    }

    /// Make the latest-properties call for a device fail
    pub fn with_properties_error(mut self, device_id: &str, error: SourceError) -> Self {
        self.properties.insert(device_id.to_string(), Err(error));
        self
    }

    /// Make the aligned-telemetry call for a device fail
    pub fn with_metrics_error(mut self, device_id: &str, error: SourceError) -> Self {
        self.metrics.insert(device_id.to_string(), Err(error));
        self
    }

    /// Add a delay to all responses
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Devices whose latest properties were requested, in call order
    pub fn property_calls(&self) -> Vec<String> {
        self.property_calls.lock().unwrap().clone()
    }

    /// Aligned-telemetry requests, in call order
    pub fn metric_calls(&self) -> Vec<MetricsRequest> {
        self.metric_calls.lock().unwrap().clone()
    }

    async fn respond(
        &self,
        scripted: Option<&Result<Vec<Observation>, SourceError>>,
    ) -> Result<Vec<Observation>, SourceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        scripted.cloned().unwrap_or_else(|| Ok(Vec::new()))
    }
}

impl TelemetrySource for MockSource {
    fn latest_device_properties<'a>(&'a self, device_id: &'a str) -> SourceFuture<'a> {
        Box::pin(async move {
            self.property_calls
                .lock()
                .unwrap()
                .push(device_id.to_string());
            self.respond(self.properties.get(device_id)).await
        })
    }

    fn selected_metrics<'a>(
        &'a self,
        device_id: &'a str,
        metrics: &'a [MetricSelector],
        window: TelemetryWindow,
    ) -> SourceFuture<'a> {
        Box::pin(async move {
            self.metric_calls.lock().unwrap().push(MetricsRequest {
                device_id: device_id.to_string(),
                metrics: metrics.to_vec(),
                window,
            });
            self.respond(self.metrics.get(device_id)).await
        })
    }
}
