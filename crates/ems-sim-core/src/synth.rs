//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Reading synthesis with source and time-of-day dependent distributions."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, FixedOffset, Utc};
use ems_sim_common::time::{is_daytime, local_hour, reference_zone};
use ems_sim_common::{ConfigError, KwhBounds, SimulatorConfig, VoltageBounds};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::model::{round_to_hundredths, Reading, Sensor};

/// Which kWh distribution applies to a sensor at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KwhRegime {
    /// Non-solar sources: `[min, max]`.
    Baseline,
    /// Solar inside the daytime window: `[2 * min, max]`.
    SolarDay,
    /// Solar outside the daytime window: `[0, min]`.
    SolarNight,
}

impl KwhRegime {
    pub fn range(self, bounds: &KwhBounds) -> (f64, f64) {
        match self {
            KwhRegime::Baseline => (bounds.min, bounds.max),
            KwhRegime::SolarDay => (bounds.min * 2.0, bounds.max),
            KwhRegime::SolarNight => (0.0, bounds.min),
        }
    }
}

/// Generates readings from validated bounds and a seedable random source.
#[derive(Debug, Clone)]
pub struct ReadingSynthesizer {
    rng: StdRng,
    zone: FixedOffset,
    kwh: KwhBounds,
    baseline: Uniform<f64>,
    solar_day: Uniform<f64>,
    solar_night: Uniform<f64>,
    voltage: Uniform<i32>,
}

impl ReadingSynthesizer {
    /// Build a synthesizer; bounds are validated here so generation never panics.
    pub fn new(
        voltage: VoltageBounds,
        kwh: KwhBounds,
        seed: Option<u64>,
    ) -> Result<Self, ConfigError> {
        voltage.validate()?;
        kwh.validate()?;
        let uniform = |regime: KwhRegime| {
            let (low, high) = regime.range(&kwh);
            Uniform::new_inclusive(low, high)
        };
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            rng,
            zone: reference_zone(),
            kwh,
            baseline: uniform(KwhRegime::Baseline),
            solar_day: uniform(KwhRegime::SolarDay),
            solar_night: uniform(KwhRegime::SolarNight),
            voltage: Uniform::new_inclusive(voltage.min, voltage.max),
        })
    }

    pub fn from_config(config: &SimulatorConfig) -> Result<Self, ConfigError> {
        Self::new(config.voltage, config.kwh, config.random_seed)
    }

    /// Override the zone used for the day/night rule.
    pub fn with_zone(mut self, zone: FixedOffset) -> Self {
        self.zone = zone;
        self
    }

    pub fn regime(&self, sensor: &Sensor, now: DateTime<Utc>) -> KwhRegime {
        if !sensor.energy_source.is_solar() {
            KwhRegime::Baseline
        } else if is_daytime(local_hour(self.zone, now)) {
            KwhRegime::SolarDay
        } else {
            KwhRegime::SolarNight
        }
    }

    pub fn generate(&mut self, sensor: &Sensor, now: DateTime<Utc>) -> Reading {
        let regime = self.regime(sensor, now);
        let raw = match regime {
            KwhRegime::Baseline => self.baseline.sample(&mut self.rng),
            KwhRegime::SolarDay => self.solar_day.sample(&mut self.rng),
            KwhRegime::SolarNight => self.solar_night.sample(&mut self.rng),
        };
        let (low, high) = regime.range(&self.kwh);
        let voltage = self.voltage.sample(&mut self.rng);
        Reading::from_parts(sensor.sensor_id.clone(), quantize(raw, low, high), voltage)
    }
}

/// Round `value` to hundredths without leaving `[low, high]`.
///
/// Edges are rounded toward the interior. A range holding no two-decimal value
/// returns `value` unrounded.
fn quantize(value: f64, low: f64, high: f64) -> f64 {
    const EPSILON: f64 = 1e-9;
    let floor = (low * 100.0 - EPSILON).ceil() / 100.0;
    let ceiling = (high * 100.0 + EPSILON).floor() / 100.0;
    if floor > ceiling {
        return value;
    }
    round_to_hundredths(value).clamp(floor, ceiling)
}
