//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Sensor registry client and cached sensor directory."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! The directory keeps the last successfully fetched sensor list. A failed
//! refresh leaves the cache untouched so the loop keeps producing readings
//! for the sensors it already knows about.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ems_sim_common::SimulatorConfig;
use reqwest::Client;
use tracing::{info, warn};

use crate::errors::RegistryError;
use crate::model::{RegistryEnvelope, Sensor};

pub const SENSORS_PATH: &str = "sensors";

/// Source of the sensor list.
#[async_trait]
pub trait SensorRegistry: Send + Sync + 'static {
    async fn fetch_sensors(&self) -> Result<Vec<Sensor>, RegistryError>;
}

/// `GET {base}/sensors` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSensorRegistry {
    client: Client,
    endpoint: String,
}

impl HttpSensorRegistry {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn from_config(config: &SimulatorConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.endpoint(SENSORS_PATH), config.request_timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SensorRegistry for HttpSensorRegistry {
    async fn fetch_sensors(&self) -> Result<Vec<Sensor>, RegistryError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status(status.as_u16()));
        }

        let envelope: RegistryEnvelope = response.json().await.map_err(|err| {
            if err.is_timeout() {
                RegistryError::Timeout
            } else {
                RegistryError::Malformed(err.to_string())
            }
        })?;
        envelope.into_sensors()
    }
}

fn transport_error(err: reqwest::Error) -> RegistryError {
    if err.is_timeout() {
        RegistryError::Timeout
    } else {
        RegistryError::Unavailable(err.to_string())
    }
}

/// Cached view of the registry.
pub struct SensorDirectory {
    registry: Box<dyn SensorRegistry>,
    cache: Vec<Sensor>,
    last_success: Option<DateTime<Utc>>,
}

impl SensorDirectory {
    pub fn new(registry: impl SensorRegistry) -> Self {
        Self::from_boxed(Box::new(registry))
    }

    pub fn from_boxed(registry: Box<dyn SensorRegistry>) -> Self {
        Self {
            registry,
            cache: Vec::new(),
            last_success: None,
        }
    }

    /// Fetch the registry and replace the cache on success.
    ///
    /// Returns the number of sensors now cached. On error the previous cache
    /// is retained and the error is returned for the caller to record.
    pub async fn refresh(&mut self) -> Result<usize, RegistryError> {
        match self.registry.fetch_sensors().await {
            Ok(sensors) => {
                self.cache = sensors;
                self.last_success = Some(Utc::now());
                info!(sensors = self.cache.len(), "sensor list refreshed");
                Ok(self.cache.len())
            }
            Err(err) => {
                warn!(
                    error = %err,
                    cached = self.cache.len(),
                    "sensor refresh failed; keeping cached list"
                );
                Err(err)
            }
        }
    }

    /// Cached sensors whose status is `Active`, in registry order.
    pub fn active_sensors(&self) -> Vec<&Sensor> {
        self.cache.iter().filter(|s| s.status.is_active()).collect()
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.cache
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }
}

impl std::fmt::Debug for SensorDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorDirectory")
            .field("cached", &self.cache.len())
            .field("last_success", &self.last_success)
            .finish()
    }
}
