//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Ingestion client submitting synthesized readings."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use ems_sim_common::SimulatorConfig;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::errors::IngestionError;
use crate::model::Reading;

/// Resource path of the ingestion endpoint relative to the API base URL.
pub const INGEST_PATH: &str = "energy/ingest";

/// Classified result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint answered `201 Created`.
    Delivered,
    /// The endpoint answered with any other status.
    Rejected { status: u16 },
    /// Transport-level failure before a response arrived.
    Unreachable { reason: String },
    /// The bounded wait elapsed.
    Timeout,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Rejected { .. } => "rejected",
            DeliveryOutcome::Unreachable { .. } => "unreachable",
            DeliveryOutcome::Timeout => "timeout",
        }
    }

    pub fn into_result(self) -> Result<(), IngestionError> {
        match self {
            DeliveryOutcome::Delivered => Ok(()),
            DeliveryOutcome::Rejected { status } => Err(IngestionError::Rejected { status }),
            DeliveryOutcome::Unreachable { reason } => Err(IngestionError::Unreachable(reason)),
            DeliveryOutcome::Timeout => Err(IngestionError::Timeout),
        }
    }
}

/// Destination for synthesized readings. One call is one attempt; no retries.
#[async_trait]
pub trait IngestionSink: Send + Sync + 'static {
    async fn send(&self, reading: &Reading) -> DeliveryOutcome;
}

/// `POST {base}/energy/ingest` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIngestionClient {
    client: Client,
    endpoint: String,
}

impl HttpIngestionClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Reuse an existing client (and its connection pool).
    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn from_config(config: &SimulatorConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.endpoint(INGEST_PATH), config.request_timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IngestionSink for HttpIngestionClient {
    async fn send(&self, reading: &Reading) -> DeliveryOutcome {
        match self.client.post(&self.endpoint).json(reading).send().await {
            Ok(response) => classify_status(response.status()),
            Err(err) => {
                debug!(endpoint = %self.endpoint, error = %err, "ingestion request failed");
                classify_transport_error(&err)
            }
        }
    }
}

fn classify_status(status: StatusCode) -> DeliveryOutcome {
    if status == StatusCode::CREATED {
        DeliveryOutcome::Delivered
    } else {
        DeliveryOutcome::Rejected {
            status: status.as_u16(),
        }
    }
}

fn classify_transport_error(err: &reqwest::Error) -> DeliveryOutcome {
    if err.is_timeout() {
        DeliveryOutcome::Timeout
    } else {
        DeliveryOutcome::Unreachable {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn client_for(addr: SocketAddr, timeout: Duration) -> HttpIngestionClient {
        HttpIngestionClient::new(format!("http://{addr}/api/v1/{INGEST_PATH}"), timeout).unwrap()
    }

    async fn respond_with(status: AxumStatus) -> SocketAddr {
        serve(Router::new().route(
            "/api/v1/energy/ingest",
            post(move || async move { status }),
        ))
        .await
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::CREATED), DeliveryOutcome::Delivered);
        assert_eq!(
            classify_status(StatusCode::OK),
            DeliveryOutcome::Rejected { status: 200 }
        );
        assert_eq!(
            classify_status(StatusCode::ACCEPTED),
            DeliveryOutcome::Rejected { status: 202 }
        );
    }

    #[test]
    fn outcomes_convert_to_typed_errors() {
        assert_eq!(DeliveryOutcome::Delivered.into_result(), Ok(()));
        assert_eq!(
            DeliveryOutcome::Rejected { status: 400 }.into_result(),
            Err(IngestionError::Rejected { status: 400 })
        );
        assert_eq!(
            DeliveryOutcome::Timeout.into_result(),
            Err(IngestionError::Timeout)
        );
    }

    #[tokio::test]
    async fn created_response_is_delivered_and_payload_matches_contract() {
        let captured: Arc<Mutex<Vec<Value>>> = Arc::default();
        let router = Router::new()
            .route(
                "/api/v1/energy/ingest",
                post(
                    |State(captured): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                        captured.lock().push(body);
                        AxumStatus::CREATED
                    },
                ),
            )
            .with_state(captured.clone());
        let addr = serve(router).await;

        let outcome = client_for(addr, Duration::from_secs(2))
            .send(&Reading::new("s1", 4.321, 225))
            .await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        let bodies = captured.lock();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["sensorId"], "s1");
        assert_eq!(bodies[0]["kwhUsage"], 4.32);
        assert_eq!(bodies[0]["voltage"], 225);
    }

    #[tokio::test]
    async fn ok_without_creation_is_rejected() {
        let addr = respond_with(AxumStatus::OK).await;
        let outcome = client_for(addr, Duration::from_secs(2))
            .send(&Reading::new("s1", 1.0, 220))
            .await;
        assert_eq!(outcome, DeliveryOutcome::Rejected { status: 200 });
    }

    #[tokio::test]
    async fn server_error_is_rejected() {
        let addr = respond_with(AxumStatus::INTERNAL_SERVER_ERROR).await;
        let outcome = client_for(addr, Duration::from_secs(2))
            .send(&Reading::new("s1", 1.0, 220))
            .await;
        assert_eq!(outcome, DeliveryOutcome::Rejected { status: 500 });
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let addr = serve(Router::new().route(
            "/api/v1/energy/ingest",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                AxumStatus::CREATED
            }),
        ))
        .await;
        let outcome = client_for(addr, Duration::from_millis(200))
            .send(&Reading::new("s1", 1.0, 220))
            .await;
        assert_eq!(outcome, DeliveryOutcome::Timeout);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let outcome = client_for(addr, Duration::from_secs(2))
            .send(&Reading::new("s1", 1.0, 220))
            .await;
        assert!(
            matches!(outcome, DeliveryOutcome::Unreachable { .. }),
            "unexpected outcome {outcome:?}"
        );
    }
}
