use crate::config::InfluxDbConfig;
use crate::error::SourceError;
use crate::observation::{MetricSelector, Observation};
use crate::source::annotated_csv::decode_observations;
use crate::source::flux;
use crate::source::{SourceFuture, TelemetrySource, TelemetryWindow};
use chrono::Utc;
use log::{debug, error, info};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Telemetry store backed by the InfluxDB v2 query API
///
/// Each call builds Flux text, posts it to `/api/v2/query` and decodes the
/// annotated CSV response into observations.
pub struct InfluxDbSource {
    client: Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
    property_lookback: Duration,
}

/// Request body for the InfluxDB query API
#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    query_type: &'static str,
    dialect: Dialect,
}

/// CSV dialect requested from InfluxDB
#[derive(Debug, Serialize)]
struct Dialect {
    header: bool,
    annotations: [&'static str; 3],
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            header: true,
            annotations: ["datatype", "group", "default"],
        }
    }
}

impl InfluxDbSource {
    /// Create a source from its connection settings
    ///
    /// # Errors
    ///
    /// Returns `SourceError::HttpError` if the HTTP client cannot be built.
    pub fn new(config: &InfluxDbConfig, property_lookback: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        info!("Created InfluxDB client on {}", config.url);

        Ok(Self {
            client,
            url: config.url.clone(),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            property_lookback,
        })
    }

    /// Format the query API endpoint URL
    fn api_url(&self) -> String {
        format!("{}/api/v2/query", self.url.trim_end_matches('/'))
    }

    /// Run one Flux query and decode the result
    async fn query(&self, flux: &str) -> Result<Vec<Observation>, SourceError> {
        debug!("InfluxDB query: {}", flux);

        let request = QueryRequest {
            query: flux,
            query_type: "flux",
            dialect: Dialect::default(),
        };

        let response = self
            .client
            .post(self.api_url())
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/csv")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("InfluxDB: query failed: {}", e);
                SourceError::from(e)
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("InfluxDB: query returned {}: {}", status, body);
            return Err(SourceError::QueryFailed {
                status: status.as_u16(),
                body,
            });
        }

        decode_observations(&body)
    }
}

impl TelemetrySource for InfluxDbSource {
    fn latest_device_properties<'a>(&'a self, device_id: &'a str) -> SourceFuture<'a> {
        Box::pin(async move {
            let flux =
                flux::latest_properties_query(&self.bucket, device_id, self.property_lookback);
            self.query(&flux).await
        })
    }

    fn selected_metrics<'a>(
        &'a self,
        device_id: &'a str,
        metrics: &'a [MetricSelector],
        window: TelemetryWindow,
    ) -> SourceFuture<'a> {
        Box::pin(async move {
            // Common end time so every series shares its bucket boundaries
            let stop = Utc::now().timestamp();

            let mut result = Vec::new();
            for metric in metrics {
                let flux = flux::selected_metric_query(
                    &self.bucket,
                    device_id,
                    metric,
                    window.lookback,
                    window.bucket_width,
                    stop,
                );
                result.extend(self.query(&flux).await?);
            }

            debug!(
                "Fetched {} aggregated sample(s) for {} metric(s) of {}",
                result.len(),
                metrics.len(),
                device_id
            );
            Ok(result)
        })
    }
}
