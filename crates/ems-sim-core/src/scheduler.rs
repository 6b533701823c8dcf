//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation loop: refresh cadence, synthesis, delivery, pacing and stop."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use ems_sim_common::{Clock, SimulatorConfig, SystemClock};
use ems_sim_metrics::SimulatorMetrics;
use futures::stream::{FuturesOrdered, StreamExt};
use reqwest::Client;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

use crate::delivery::{DeliveryOutcome, HttpIngestionClient, IngestionSink, INGEST_PATH};
use crate::directory::{HttpSensorRegistry, SensorDirectory, SENSORS_PATH};
use crate::errors::{BuildError, RegistryError, SchedulerError};
use crate::model::{Reading, Sensor};
use crate::synth::ReadingSynthesizer;

/// The sensor list is refreshed on the first iteration and every fifth after.
pub const REFRESH_CADENCE: u64 = 5;

pub fn refresh_due(iteration: u64) -> bool {
    iteration == 1 || iteration % REFRESH_CADENCE == 0
}

/// Lifecycle of a simulator. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Outcome of one pass through the loop body.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSummary {
    pub iteration: u64,
    /// `None` when no refresh was due this iteration.
    pub refresh: Option<Result<usize, RegistryError>>,
    pub active: usize,
    pub attempted: usize,
    pub delivered: usize,
    /// Stop was requested before every reading was sent.
    pub interrupted: bool,
}

/// Totals accumulated across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub iterations: u64,
    pub attempted: u64,
    pub delivered: u64,
}

impl RunReport {
    fn absorb(&mut self, summary: &IterationSummary) {
        self.iterations += 1;
        self.attempted += summary.attempted as u64;
        self.delivered += summary.delivered as u64;
    }
}

/// Mutable loop state owned by a single [`Simulator`].
#[derive(Debug)]
pub struct SimulatorState {
    phase: Phase,
    iteration: u64,
    directory: SensorDirectory,
    totals: RunReport,
}

impl SimulatorState {
    fn new(directory: SensorDirectory) -> Self {
        Self {
            phase: Phase::Idle,
            iteration: 0,
            directory,
            totals: RunReport::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of iterations started so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn directory(&self) -> &SensorDirectory {
        &self.directory
    }

    pub fn totals(&self) -> RunReport {
        self.totals
    }
}

/// Cloneable request to stop a running simulator.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    fn channel() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

async fn wait_for_stop(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            // Sender gone: nobody can ask us to stop any more.
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorSettings {
    pub interval: Duration,
    pub delivery_concurrency: usize,
}

impl SimulatorSettings {
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self {
            interval: config.interval,
            delivery_concurrency: config.delivery_concurrency,
        }
    }
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            delivery_concurrency: 1,
        }
    }
}

/// Drives refresh, synthesis and delivery on a fixed cadence until stopped.
pub struct Simulator {
    settings: SimulatorSettings,
    state: SimulatorState,
    synthesizer: ReadingSynthesizer,
    sink: Arc<dyn IngestionSink>,
    clock: Arc<dyn Clock>,
    metrics: Option<SimulatorMetrics>,
    stop: StopHandle,
    signal: watch::Receiver<bool>,
}

impl Simulator {
    pub fn new(
        settings: SimulatorSettings,
        directory: SensorDirectory,
        synthesizer: ReadingSynthesizer,
        sink: Arc<dyn IngestionSink>,
    ) -> Self {
        let (stop, signal) = StopHandle::channel();
        Self {
            settings: SimulatorSettings {
                delivery_concurrency: settings.delivery_concurrency.max(1),
                ..settings
            },
            state: SimulatorState::new(directory),
            synthesizer,
            sink,
            clock: Arc::new(SystemClock),
            metrics: None,
            stop,
            signal,
        }
    }

    /// Wire HTTP registry and ingestion clients from a validated configuration.
    pub fn from_config(config: &SimulatorConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let registry = HttpSensorRegistry::with_client(client.clone(), config.endpoint(SENSORS_PATH));
        let sink = HttpIngestionClient::with_client(client, config.endpoint(INGEST_PATH));
        Ok(Self::new(
            SimulatorSettings::from_config(config),
            SensorDirectory::new(registry),
            ReadingSynthesizer::from_config(config)?,
            Arc::new(sink),
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: SimulatorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> &SimulatorState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn settings(&self) -> SimulatorSettings {
        self.settings
    }

    /// Run the loop until a stop is requested.
    pub async fn run(&mut self) -> Result<RunReport, SchedulerError> {
        match self.state.phase {
            Phase::Idle => {}
            Phase::Running => return Err(SchedulerError::AlreadyRunning),
            Phase::Stopped => return Err(SchedulerError::Stopped),
        }
        self.state.phase = Phase::Running;
        info!(
            interval_secs = self.settings.interval.as_secs_f64(),
            concurrency = self.settings.delivery_concurrency,
            "simulation loop started"
        );

        let mut signal = self.signal.clone();
        loop {
            if self.stop.is_stopped() {
                break;
            }
            let summary = self.run_iteration().await;
            if summary.interrupted {
                break;
            }
            tokio::select! {
                _ = time::sleep(self.settings.interval) => {}
                _ = wait_for_stop(&mut signal) => break,
            }
        }

        self.state.phase = Phase::Stopped;
        let totals = self.state.totals;
        info!(
            iterations = totals.iterations,
            attempted = totals.attempted,
            delivered = totals.delivered,
            "simulation loop stopped"
        );
        Ok(totals)
    }

    /// Execute a single iteration without pacing.
    pub async fn step(&mut self) -> Result<IterationSummary, SchedulerError> {
        if self.state.phase == Phase::Stopped {
            return Err(SchedulerError::Stopped);
        }
        Ok(self.run_iteration().await)
    }

    async fn run_iteration(&mut self) -> IterationSummary {
        self.state.iteration += 1;
        let iteration = self.state.iteration;

        let refresh = if refresh_due(iteration) {
            Some(self.refresh().await)
        } else {
            None
        };

        if self.stop.is_stopped() {
            debug!(iteration, "stop requested before synthesis; skipping deliveries");
            let summary = IterationSummary {
                iteration,
                refresh,
                active: self.state.directory.active_sensors().len(),
                attempted: 0,
                delivered: 0,
                interrupted: true,
            };
            self.state.totals.absorb(&summary);
            if let Some(metrics) = &self.metrics {
                metrics.inc_iteration();
            }
            return summary;
        }

        let now = self.clock.now();
        let synthesizer = &mut self.synthesizer;
        let batch: Vec<(Sensor, Reading)> = self
            .state
            .directory
            .active_sensors()
            .into_iter()
            .map(|sensor| (sensor.clone(), synthesizer.generate(sensor, now)))
            .collect();
        let active = batch.len();
        if let Some(metrics) = &self.metrics {
            metrics.set_active_sensors(active);
        }

        let mut summary = IterationSummary {
            iteration,
            refresh,
            active,
            attempted: 0,
            delivered: 0,
            interrupted: false,
        };

        if batch.is_empty() {
            warn!(iteration, "no active sensors found; waiting for sensors");
        } else {
            self.deliver(batch, &mut summary).await;
            info!(
                iteration,
                attempted = summary.attempted,
                delivered = summary.delivered,
                "sent {}/{} readings",
                summary.delivered,
                summary.attempted
            );
        }

        self.state.totals.absorb(&summary);
        if let Some(metrics) = &self.metrics {
            metrics.inc_iteration();
        }
        summary
    }

    async fn refresh(&mut self) -> Result<usize, RegistryError> {
        let result = self.state.directory.refresh().await;
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(_) => metrics.record_refresh("ok"),
                Err(err) => metrics.record_refresh(err.label()),
            }
        }
        result
    }

    /// Send the batch with at most `delivery_concurrency` requests in flight.
    ///
    /// No new request starts once stop is requested; requests already in
    /// flight are awaited and counted.
    async fn deliver(&self, batch: Vec<(Sensor, Reading)>, summary: &mut IterationSummary) {
        let sink = Arc::clone(&self.sink);
        let send = move |(sensor, reading): (Sensor, Reading)| {
            let sink = Arc::clone(&sink);
            async move {
                let outcome = sink.send(&reading).await;
                (sensor, reading, outcome)
            }
        };

        let mut pending = batch.into_iter();
        let mut in_flight = FuturesOrdered::new();
        loop {
            while in_flight.len() < self.settings.delivery_concurrency && !self.stop.is_stopped() {
                match pending.next() {
                    Some(item) => in_flight.push_back(send(item)),
                    None => break,
                }
            }
            let Some((sensor, reading, outcome)) = in_flight.next().await else {
                break;
            };
            summary.attempted += 1;
            if outcome.is_delivered() {
                summary.delivered += 1;
            }
            self.log_delivery(&sensor, &reading, &outcome);
        }

        if pending.len() > 0 {
            debug!(
                remaining = pending.len(),
                "stop requested; remaining deliveries skipped"
            );
            summary.interrupted = true;
        }
    }

    fn log_delivery(&self, sensor: &Sensor, reading: &Reading, outcome: &DeliveryOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_reading(outcome.label());
        }
        match outcome.clone().into_result() {
            Ok(()) => info!(
                sensor_id = %sensor.sensor_id,
                district = %sensor.district_name,
                source = %sensor.energy_source,
                kwh = reading.kwh_usage(),
                voltage = reading.voltage(),
                "[{}] {}: {} kWh",
                sensor.district_name,
                sensor.energy_source,
                reading.kwh_usage()
            ),
            Err(err) => warn!(
                sensor_id = %sensor.sensor_id,
                outcome = outcome.label(),
                error = %err,
                "reading delivery failed"
            ),
        }
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .field("stopped", &self.stop.is_stopped())
            .finish()
    }
}
