//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Registry shared between the simulator and the exporter.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Serve `registry` at `GET /metrics` on `addr` until [`MetricsServer::shutdown`].
///
/// The listener is bound before returning; bind errors surface here.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to make metrics listener non-blocking")?;
    let bound = listener
        .local_addr()
        .context("failed to read metrics listener address")?;
    let listener =
        TcpListener::from_std(listener).context("failed to hand metrics listener to tokio")?;

    let app = Router::new()
        .route("/metrics", get(scrape))
        .with_state(registry);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics exporter failed")
    });
    info!(address = %bound, "metrics exporter listening");

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    let mut body = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&registry.gather(), &mut body) {
        error!(error = %err, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response();
    }
    (
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        body,
    )
        .into_response()
}

/// Running exporter. Dropping it leaves the task running; call `shutdown`.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.context("metrics exporter task panicked")?
    }
}

/// Counters and gauges recorded by the simulation loop.
#[derive(Clone, Debug)]
pub struct SimulatorMetrics {
    registry: SharedRegistry,
    iterations_total: IntCounter,
    readings_total: IntCounterVec,
    refresh_total: IntCounterVec,
    active_sensors: IntGauge,
}

impl SimulatorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let iterations_total = IntCounter::with_opts(Opts::new(
            "ems_sim_iterations_total",
            "Number of completed simulation iterations",
        ))?;
        registry.register(Box::new(iterations_total.clone()))?;

        let readings_total = IntCounterVec::new(
            Opts::new(
                "ems_sim_readings_total",
                "Readings submitted to ingestion, by delivery outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(readings_total.clone()))?;

        let refresh_total = IntCounterVec::new(
            Opts::new(
                "ems_sim_registry_refresh_total",
                "Sensor registry refresh attempts, by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(refresh_total.clone()))?;

        let active_sensors = IntGauge::with_opts(Opts::new(
            "ems_sim_active_sensors",
            "Active sensors selected in the latest iteration",
        ))?;
        registry.register(Box::new(active_sensors.clone()))?;

        Ok(Self {
            registry,
            iterations_total,
            readings_total,
            refresh_total,
            active_sensors,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_iteration(&self) {
        self.iterations_total.inc();
    }

    pub fn record_reading(&self, outcome: &str) {
        self.readings_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_refresh(&self, result: &str) {
        self.refresh_total.with_label_values(&[result]).inc();
    }

    pub fn set_active_sensors(&self, count: usize) {
        self.active_sensors.set(count as i64);
    }

    pub fn readings(&self, outcome: &str) -> u64 {
        self.readings_total.with_label_values(&[outcome]).get()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations_total.get()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulator_metrics_track_outcomes() {
        let metrics = SimulatorMetrics::new(new_registry()).unwrap();
        metrics.inc_iteration();
        metrics.record_reading("delivered");
        metrics.record_reading("delivered");
        metrics.record_reading("rejected");
        metrics.set_active_sensors(3);

        assert_eq!(metrics.iterations(), 1);
        assert_eq!(metrics.readings("delivered"), 2);
        assert_eq!(metrics.readings("rejected"), 1);
        assert_eq!(metrics.readings("timeout"), 0);
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let registry = new_registry();
        SimulatorMetrics::new(registry.clone()).unwrap();
        assert!(SimulatorMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_registered_metrics() {
        let metrics = SimulatorMetrics::new(new_registry()).unwrap();
        metrics.record_refresh("ok");

        let server = spawn_http_server(metrics.registry(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let response = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let content_type = response.headers()[reqwest::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .to_owned();
        assert_eq!(content_type, prometheus::TEXT_FORMAT);
        let body = response.text().await.unwrap();
        assert!(body.contains("ems_sim_registry_refresh_total{result=\"ok\"} 1"));
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn occupied_port_fails_at_spawn() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        assert!(spawn_http_server(new_registry(), addr).is_err());
    }
}
