//! Admission gate: a bounded permit pool capping concurrent renders.

use std::{num::NonZeroU32, sync::Arc, time::Duration};

use metrics::counter;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

pub const METRIC_ADMISSION_TIMEOUT: &str = "attesta_admission_timeout_total";

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("render capacity saturated; admission timed out after {waited_ms} ms")]
    TimedOut { waited_ms: u64 },
    #[error("admission gate closed")]
    Closed,
}

/// Counting permit pool with timed acquisition.
///
/// One instance is shared by every request handler; the permit count is the
/// only state they contend on. Callers hold a [`RenderPermit`] for the whole
/// render-and-stream lifetime; dropping it is the one and only release, so a
/// double release is unrepresentable.
#[derive(Clone)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: NonZeroU32) -> Self {
        let capacity = capacity.get() as usize;
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free. Diagnostic only: the value is stale the moment
    /// it is read.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait up to `wait` for a free permit.
    ///
    /// On timeout nothing has been consumed and nothing was spawned on the
    /// caller's behalf; the caller maps [`AdmissionError::TimedOut`] to its
    /// "busy, retry later" signal. Distinct call sites may pass distinct
    /// waits against the same pool.
    pub async fn acquire(&self, wait: Duration) -> Result<RenderPermit, AdmissionError> {
        match tokio::time::timeout(wait, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => {
                debug!(
                    target = "application::admission",
                    available = self.permits.available_permits(),
                    capacity = self.capacity,
                    "render admitted"
                );
                Ok(RenderPermit { _permit: permit })
            }
            Ok(Err(_closed)) => Err(AdmissionError::Closed),
            Err(_elapsed) => {
                counter!(METRIC_ADMISSION_TIMEOUT).increment(1);
                Err(AdmissionError::TimedOut {
                    waited_ms: wait.as_millis() as u64,
                })
            }
        }
    }
}

/// Proof of admission. Returns its permit to the pool on drop.
#[derive(Debug)]
pub struct RenderPermit {
    _permit: OwnedSemaphorePermit,
}
