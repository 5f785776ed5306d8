//! Shadow document model and the store collaborator interface.
//!
//! A shadow pairs a `desired` document (written by us) with a `reported`
//! document (written by the band). The two are reconciled asynchronously by
//! the device; nothing here observes when that happens.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::types::FieldKey;

/// Namespace the band firmware subscribes under.
pub const DEVICE_KEY_PREFIX: &str = "smartband_";

/// Desired-state flag asking the band to publish a fresh report.
pub const DATA_REQUEST_FLAG: &str = "data_requested";

/// Store key of one device's shadow, derived from its physical id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn for_physical_id(physical_id: &str) -> Self {
        Self(format!("{}{}", DEVICE_KEY_PREFIX, physical_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partial desired-state document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredPatch(Map<String, Value>);

impl DesiredPatch {
    pub fn data_request() -> Self {
        let mut map = Map::new();
        map.insert(DATA_REQUEST_FLAG.to_string(), Value::from(1));
        Self(map)
    }

    pub fn threshold(field: FieldKey, value: i64) -> Self {
        let mut map = Map::new();
        map.insert(field.wire_key().to_string(), Value::from(value));
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Last document published by the band.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportedSnapshot(Map<String, Value>);

impl ReportedSnapshot {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// A field is present only if it exists and is non-null.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }
}

/// Key-value document store holding per-device shadows.
///
/// Implementations must be safe for concurrent use across conversations.
pub trait ShadowStore: Send + Sync {
    fn set_desired(&self, key: &DeviceKey, patch: &DesiredPatch) -> Result<(), StoreError>;
    fn get_reported(&self, key: &DeviceKey) -> Result<ReportedSnapshot, StoreError>;
}

/// Merge `patch` into `target` by key. Null values delete; nested objects merge.
pub fn merge_document(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(nested) => {
                let entry = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(existing) = entry {
                    merge_document(existing, nested);
                } else {
                    *entry = Value::Object(nested.clone());
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

/// Steps of one shadow request, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    PatchSent,
    Waiting,
    ReportedRead,
    Resolved,
    SoftMiss,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::PatchSent => "patch_sent",
            Phase::Waiting => "waiting",
            Phase::ReportedRead => "reported_read",
            Phase::Resolved => "resolved",
            Phase::SoftMiss => "soft_miss",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryShadow {
    desired: Map<String, Value>,
    reported: Map<String, Value>,
}

/// Process-local shadow store.
///
/// Shadows are created on first write from either side. Reading the
/// reported document of a device nobody has written is `NotFound`.
#[derive(Debug, Default)]
pub struct MemoryShadowStore {
    shadows: Mutex<HashMap<DeviceKey, MemoryShadow>>,
    desired_writes: Mutex<Vec<(DeviceKey, DesiredPatch)>>,
}

impl MemoryShadowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device-side publish into the reported document.
    pub fn publish_reported(&self, key: &DeviceKey, fields: &Map<String, Value>) {
        let mut shadows = self
            .shadows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let shadow = shadows.entry(key.clone()).or_default();
        merge_document(&mut shadow.reported, fields);
    }

    pub fn desired(&self, key: &DeviceKey) -> Option<Map<String, Value>> {
        self.shadows
            .lock()
            .ok()
            .and_then(|shadows| shadows.get(key).map(|shadow| shadow.desired.clone()))
    }

    /// Every desired write accepted so far, oldest first.
    pub fn desired_writes(&self) -> Vec<(DeviceKey, DesiredPatch)> {
        self.desired_writes
            .lock()
            .map(|writes| writes.clone())
            .unwrap_or_default()
    }
}

impl ShadowStore for MemoryShadowStore {
    fn set_desired(&self, key: &DeviceKey, patch: &DesiredPatch) -> Result<(), StoreError> {
        let mut shadows = self
            .shadows
            .lock()
            .map_err(|_| StoreError::Backend("shadow map poisoned".to_string()))?;
        let shadow = shadows.entry(key.clone()).or_default();
        merge_document(&mut shadow.desired, patch.as_map());
        drop(shadows);

        if let Ok(mut writes) = self.desired_writes.lock() {
            writes.push((key.clone(), patch.clone()));
        }
        Ok(())
    }

    fn get_reported(&self, key: &DeviceKey) -> Result<ReportedSnapshot, StoreError> {
        let shadows = self
            .shadows
            .lock()
            .map_err(|_| StoreError::Backend("shadow map poisoned".to_string()))?;
        shadows
            .get(key)
            .map(|shadow| ReportedSnapshot::new(shadow.reported.clone()))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
