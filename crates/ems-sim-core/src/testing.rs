//! ---
//! ems_section: "11-simulation-test-harness"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-memory registry and sink doubles for unit tests."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::delivery::{DeliveryOutcome, IngestionSink};
use crate::directory::SensorRegistry;
use crate::errors::RegistryError;
use crate::model::{Reading, Sensor};
use crate::scheduler::StopHandle;

/// Registry that replays a fixed script of responses, one per fetch.
pub struct ScriptedRegistry {
    script: Mutex<VecDeque<Result<Vec<Sensor>, RegistryError>>>,
    fetches: Arc<AtomicUsize>,
    stop_on_fetch: Arc<Mutex<Option<StopHandle>>>,
}

impl ScriptedRegistry {
    pub fn new(script: impl IntoIterator<Item = Result<Vec<Sensor>, RegistryError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fetches: Arc::default(),
            stop_on_fetch: Arc::default(),
        }
    }

    /// Slot for a handle that every fetch stops before answering.
    pub fn stop_on_fetch(&self) -> Arc<Mutex<Option<StopHandle>>> {
        self.stop_on_fetch.clone()
    }

    pub fn fetch_count(&self) -> Arc<AtomicUsize> {
        self.fetches.clone()
    }
}

#[async_trait]
impl SensorRegistry for ScriptedRegistry {
    async fn fetch_sensors(&self) -> Result<Vec<Sensor>, RegistryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = &*self.stop_on_fetch.lock() {
            handle.stop();
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(RegistryError::Unavailable("script exhausted".into())))
    }
}

/// Sink that records every reading and rejects a fixed set of sensor ids.
#[derive(Default)]
pub struct RecordingSink {
    rejected: HashSet<String>,
    readings: Mutex<Vec<Reading>>,
    stop_after: Mutex<Option<(usize, StopHandle)>>,
}

impl RecordingSink {
    pub fn rejecting<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rejected: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Request a stop once `count` readings have been received.
    pub fn stop_after(&self, count: usize, handle: StopHandle) {
        *self.stop_after.lock() = Some((count, handle));
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings.lock().clone()
    }
}

#[async_trait]
impl IngestionSink for RecordingSink {
    async fn send(&self, reading: &Reading) -> DeliveryOutcome {
        let received = {
            let mut readings = self.readings.lock();
            readings.push(reading.clone());
            readings.len()
        };
        if let Some((count, handle)) = &*self.stop_after.lock() {
            if received >= *count {
                handle.stop();
            }
        }
        if self.rejected.contains(reading.sensor_id()) {
            DeliveryOutcome::Rejected { status: 422 }
        } else {
            DeliveryOutcome::Delivered
        }
    }
}
