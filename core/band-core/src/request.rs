//! Request/confirm protocol over the shadow store.
//!
//! Reads are fabricated from a desired-state nudge, a blind quiescence wait,
//! and one read of the reported document. Writes are fire-and-forget: the
//! store accepting the desired patch is the only confirmation there is.
//!
//! Neither path retries. The wait cannot finish early and cannot be
//! extended, so a band that reports slowly is indistinguishable from one
//! that never reports the field.

use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{BandError, Rejection, StoreError, TransportError};
use crate::shadow::{DesiredPatch, DeviceKey, Phase, ShadowStore};
use crate::types::{DeviceRef, FieldKey};

pub struct ShadowRequester {
    store: Arc<dyn ShadowStore>,
    quiescence: Duration,
}

impl ShadowRequester {
    pub fn new(store: Arc<dyn ShadowStore>, quiescence: Duration) -> Self {
        Self { store, quiescence }
    }

    /// One nudge, one wait, one read.
    pub fn fetch_field(&self, device: &DeviceRef, field: FieldKey) -> Result<Value, BandError> {
        let key = DeviceKey::for_physical_id(&device.physical_id);
        let started = Instant::now();
        debug!(device_key = %key, field = %field, phase = %Phase::Idle, "Shadow read requested");

        self.store
            .set_desired(&key, &DesiredPatch::data_request())
            .map_err(|err| store_failure("read_field", &key, Phase::PatchSent, err))?;
        debug!(device_key = %key, phase = %Phase::PatchSent, "Data request patch accepted");

        debug!(
            device_key = %key,
            phase = %Phase::Waiting,
            quiescence_ms = self.quiescence.as_millis() as u64,
            "Waiting for device to reconcile"
        );
        thread::sleep(self.quiescence);

        let reported = self
            .store
            .get_reported(&key)
            .map_err(|err| store_failure("read_field", &key, Phase::ReportedRead, err))?;

        match reported.field(field.wire_key()) {
            Some(value) => {
                debug!(
                    device_key = %key,
                    field = %field,
                    phase = %Phase::Resolved,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Reported field resolved"
                );
                Ok(value.clone())
            }
            None => {
                debug!(
                    device_key = %key,
                    field = %field,
                    phase = %Phase::SoftMiss,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Reported field missing after quiescence window"
                );
                Err(Rejection::FieldUnavailable {
                    field: field.wire_key().to_string(),
                }
                .into())
            }
        }
    }

    /// Validates `raw` and issues a single desired write. No wait, no read-back.
    pub fn set_threshold(
        &self,
        device: &DeviceRef,
        field: FieldKey,
        raw: &str,
    ) -> Result<i64, BandError> {
        if !field.is_threshold() {
            return Err(Rejection::InvalidValue {
                field: field.wire_key().to_string(),
                raw: raw.to_string(),
            }
            .into());
        }
        let value = parse_threshold(field, raw)?;
        let key = DeviceKey::for_physical_id(&device.physical_id);

        self.store
            .set_desired(&key, &DesiredPatch::threshold(field, value))
            .map_err(|err| store_failure("write_threshold", &key, Phase::PatchSent, err))?;
        debug!(device_key = %key, field = %field, value, "Threshold patch accepted");

        Ok(value)
    }
}

/// Accepts an optionally signed base-10 integer, surrounding whitespace allowed.
pub fn parse_threshold(field: FieldKey, raw: &str) -> Result<i64, Rejection> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| Rejection::InvalidValue {
            field: field.wire_key().to_string(),
            raw: raw.to_string(),
        })
}

fn store_failure(
    operation: &'static str,
    key: &DeviceKey,
    phase: Phase,
    err: StoreError,
) -> TransportError {
    warn!(
        operation,
        device_key = %key,
        phase = %phase,
        error = %err,
        "Shadow store call failed"
    );
    TransportError::Store {
        operation,
        device_key: key.to_string(),
        phase,
        detail: err.to_string(),
    }
}
