//! Collaborator abstraction layer.
//!
//! Provides trait-based interfaces for everything the healing loop talks to:
//! - HTTP adapters for the metrics store, health probe and compute API
//! - OpenAI-compatible reasoning oracle
//! - In-memory mocks for testing and demo mode

pub mod http;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use openai::OpenAiOracle;
pub use traits::{
    BackendError, ComputeControl, HealthProbe, MetricsStore, OracleRequest, ReasoningOracle,
};

use crate::config::BackendsConfig;

/// The set of collaborators one orchestrator works against
#[derive(Clone)]
pub struct Backends {
    pub metrics: Arc<dyn MetricsStore>,
    pub oracle: Arc<dyn ReasoningOracle>,
    pub compute: Arc<dyn ComputeControl>,
    pub probe: Arc<dyn HealthProbe>,
}

impl Backends {
    /// Wire HTTP adapters from configuration.
    pub fn from_config(config: &BackendsConfig) -> Result<Self, BackendError> {
        let client = http::build_client(Duration::from_millis(config.request_timeout_ms))?;

        Ok(Self {
            metrics: Arc::new(http::HttpMetricsStore::new(
                client.clone(),
                &config.metrics_url,
            )),
            oracle: Arc::new(OpenAiOracle::new(
                client.clone(),
                &config.oracle_url,
                &config.oracle_model,
                config.oracle_api_key.clone(),
            )),
            compute: Arc::new(http::HttpComputeControl::new(
                client.clone(),
                &config.compute_url,
                config.compute_api_token.clone(),
            )),
            probe: Arc::new(http::HttpHealthProbe::new(client, &config.probe_url)),
        })
    }
}
