//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation runtime module exports and shared types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Synthetic energy-sensor traffic for the EMS backend.
//!
//! A [`Simulator`] periodically refreshes the sensor list from the registry,
//! synthesizes one reading per active sensor and posts it to the ingestion
//! endpoint, until its [`StopHandle`] is triggered.

pub mod delivery;
pub mod directory;
pub mod errors;
pub mod model;
pub mod scheduler;
pub mod synth;

#[cfg(test)]
mod testing;

pub use delivery::{DeliveryOutcome, HttpIngestionClient, IngestionSink, INGEST_PATH};
pub use directory::{HttpSensorRegistry, SensorDirectory, SensorRegistry, SENSORS_PATH};
pub use errors::{BuildError, IngestionError, RegistryError, SchedulerError};
pub use model::{EnergySource, Reading, RegistryEnvelope, Sensor, SensorStatus};
pub use scheduler::{
    refresh_due, IterationSummary, Phase, RunReport, Simulator, SimulatorSettings,
    SimulatorState, StopHandle, REFRESH_CADENCE,
};
pub use synth::{KwhRegime, ReadingSynthesizer};
