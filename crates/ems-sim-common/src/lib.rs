//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives for the sensor simulator workspace."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the EMS sensor simulator.
//! This crate exposes configuration loading, tracing setup, and the reference-zone
//! time helpers consumed by the core loop and the daemon binary.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    ConfigError, KwhBounds, LoggingConfig, MetricsConfig, SimulatorConfig, VoltageBounds,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{is_daytime, local_hour, reference_zone, Clock, FixedClock, SystemClock};
