//! HTTP adapters for the metrics store, health probe and compute control plane.
//!
//! Endpoints:
//! - `GET  {metrics}/v1/targets/{id}/samples?since=..&until=..`
//! - `GET  {probe}/v1/targets/{id}/probe`
//! - `GET  {compute}/v1/services/{id}/scaling`
//! - `PUT  {compute}/v1/services/{id}/scaling`
//! - `POST {compute}/v1/services/{id}/restart`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::traits::*;
use crate::heal::models::{InstanceBounds, MetricSample};

/// Build the shared JSON client used by every adapter.
pub fn build_client(timeout: Duration) -> Result<Client, BackendError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Network(format!("Failed to create HTTP client: {}", e)))
}

/// Turn a non-success response into a classified error.
async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::from_status(status.as_u16(), body))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    check(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| BackendError::Parse(e.to_string()))
}

fn trim_base(url: impl Into<String>) -> String {
    url.into().trim_end_matches('/').to_string()
}

//=============================================================================
// METRICS STORE
//=============================================================================

pub struct HttpMetricsStore {
    client: Client,
    base_url: String,
}

impl HttpMetricsStore {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
        }
    }
}

#[async_trait]
impl MetricsStore for HttpMetricsStore {
    async fn query_window(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, BackendError> {
        let url = format!("{}/v1/targets/{}/samples", self.base_url, target_id);
        debug!(%url, %since, %until, "Querying metrics window");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("since", since.to_rfc3339_opts(SecondsFormat::Millis, true)),
                ("until", until.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ])
            .send()
            .await?;

        read_json(response).await
    }
}

//=============================================================================
// HEALTH PROBE
//=============================================================================

pub struct HttpHealthProbe {
    client: Client,
    base_url: String,
}

impl HttpHealthProbe {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, target_id: &str) -> Result<MetricSample, BackendError> {
        let url = format!("{}/v1/targets/{}/probe", self.base_url, target_id);
        let response = self.client.get(&url).send().await?;
        read_json(response).await
    }
}

//=============================================================================
// COMPUTE CONTROL
//=============================================================================

pub struct HttpComputeControl {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpComputeControl {
    pub fn new(client: Client, base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
            api_token,
        }
    }

    fn service_url(&self, target_id: &str, suffix: &str) -> String {
        format!("{}/v1/services/{}/{}", self.base_url, target_id, suffix)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }
}

#[async_trait]
impl ComputeControl for HttpComputeControl {
    async fn instance_bounds(&self, target_id: &str) -> Result<InstanceBounds, BackendError> {
        let request = self.client.get(self.service_url(target_id, "scaling"));
        let response = self.authorize(request).send().await?;
        read_json(response).await
    }

    async fn set_instance_bounds(
        &self,
        target_id: &str,
        bounds: InstanceBounds,
    ) -> Result<(), BackendError> {
        let request = self
            .client
            .put(self.service_url(target_id, "scaling"))
            .json(&bounds);
        let response = self.authorize(request).send().await?;
        check(response).await.map(|_| ())
    }

    async fn restart(&self, target_id: &str) -> Result<(), BackendError> {
        let request = self.client.post(self.service_url(target_id, "restart"));
        let response = self.authorize(request).send().await?;
        check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Client {
        build_client(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_query_window_parses_samples() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/targets/user-api/samples"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "timestamp": "2025-11-20T10:00:00Z",
                    "service_id": "user-api",
                    "latency_ms": 52.0,
                    "kafka_lag": 15,
                    "error_rate": 0.006,
                    "cpu_usage": 0.48,
                    "memory_usage": 0.63
                }
            ])))
            .mount(&server)
            .await;

        let store = HttpMetricsStore::new(client(), server.uri());
        let now = Utc::now();
        let samples = store
            .query_window("user-api", now - chrono::Duration::minutes(5), now)
            .await
            .unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].queue_lag, 15.0);
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = HttpMetricsStore::new(client(), server.uri());
        let now = Utc::now();
        let err = store.query_window("user-api", now, now).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_set_bounds_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/services/user-api/scaling"))
            .respond_with(ResponseTemplate::new(422).set_body_string("max_instances exceeds 100"))
            .mount(&server)
            .await;

        let compute = HttpComputeControl::new(client(), server.uri(), None);
        let err = compute
            .set_instance_bounds("user-api", InstanceBounds::new(3, 150))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_restart_ack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/services/user-api/restart"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let compute = HttpComputeControl::new(client(), server.uri(), Some("token".into()));
        assert!(compute.restart("user-api").await.is_ok());
    }
}
