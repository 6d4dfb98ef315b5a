use crate::config::TwinsConfig;
use crate::error::TwinError;
use crate::patch::{PatchDocument, TwinId};
use crate::twins::{TwinDirectory, TwinFuture};
use log::{debug, error, info};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Twin graph backed by the Azure Digital Twins data-plane REST API
///
/// Authentication is handled elsewhere: the client sends a pre-issued bearer
/// token with every request.
pub struct DigitalTwinsClient {
    client: Client,
    base_url: Url,
    token: String,
    api_version: String,
}

/// Request body for the query API; either a query or a continuation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<String>,
}

/// One page of query results
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    value: Vec<TwinRecord>,
    #[serde(default)]
    continuation_token: Option<String>,
}

/// The part of a twin the replicator reads
#[derive(Debug, Deserialize)]
struct TwinRecord {
    #[serde(rename = "$dtId")]
    dt_id: String,
}

impl DigitalTwinsClient {
    /// Create a client from its connection settings
    ///
    /// # Errors
    ///
    /// Returns `TwinError::InvalidResponse` if the URL does not parse, or
    /// `TwinError::HttpError` if the HTTP client cannot be built.
    pub fn new(config: &TwinsConfig) -> Result<Self, TwinError> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| TwinError::InvalidResponse(format!("bad twins url '{}': {}", config.url, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        info!("Created Digital Twins client on {}", base_url);

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
            api_version: config.api_version.clone(),
        })
    }

    /// Build `{base}/{segments...}?api-version=...`, escaping each segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TwinError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TwinError::InvalidResponse(format!("twins url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    /// Query text selecting every twin of a model
    pub fn model_query(model: &str) -> String {
        format!("SELECT * FROM digitaltwins WHERE IS_OF_MODEL('{}')", model)
    }

    async fn query_page(&self, request: &QueryRequest<'_>) -> Result<QueryResponse, TwinError> {
        let response = self
            .client
            .post(self.endpoint(&["query"])?)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Digital Twins: query returned {}: {}", status, body);
            return Err(TwinError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| TwinError::InvalidResponse(format!("Failed to parse query response: {}", e)))
    }
}

impl TwinDirectory for DigitalTwinsClient {
    fn list_devices_of_model<'a>(&'a self, model: &'a str) -> TwinFuture<'a, BTreeSet<String>> {
        Box::pin(async move {
            let query = Self::model_query(model);
            debug!("Digital Twins query: {}", query);

            let mut devices = BTreeSet::new();
            let mut request = QueryRequest {
                query: Some(&query),
                continuation_token: None,
            };

            loop {
                let page = self.query_page(&request).await?;
                devices.extend(
                    page.value
                        .iter()
                        .map(|twin| TwinId::device_of(&twin.dt_id).to_string()),
                );

                match page.continuation_token {
                    Some(token) if !token.is_empty() => {
                        request = QueryRequest {
                            query: None,
                            continuation_token: Some(token),
                        };
                    }
                    _ => break,
                }
            }

            debug!("Found {} device(s) of model {}", devices.len(), model);
            Ok(devices)
        })
    }

    fn apply_patch<'a>(
        &'a self,
        twin_id: &'a TwinId,
        patch: &'a PatchDocument,
    ) -> TwinFuture<'a, ()> {
        Box::pin(async move {
            let response = self
                .client
                .patch(self.endpoint(&["digitaltwins", twin_id.as_str()])?)
                .bearer_auth(&self.token)
                .header("Content-Type", "application/json-patch+json")
                .body(serde_json::to_vec(patch).map_err(|e| {
                    TwinError::InvalidResponse(format!("Failed to encode patch: {}", e))
                })?)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(TwinError::NotFound(twin_id.to_string()));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TwinError::RequestFailed {
                    status: status.as_u16(),
                    body,
                });
            }

            info!(
                "OK. Updated digital twin {}. Result: {}",
                twin_id, status
            );
            Ok(())
        })
    }
}
