//! Device catalog collaborator: maps a user to the devices they own.

use crate::error::CatalogError;
use crate::types::DeviceRef;

/// Looks up the devices owned by a user.
///
/// Matching on `user` is case-insensitive. An empty list means the user is
/// unknown or owns nothing; it is not an error.
pub trait DeviceCatalog: Send + Sync {
    fn lookup(&self, user: &str) -> Result<Vec<DeviceRef>, CatalogError>;
}

/// Fixed in-memory catalog, used when the owner table is provisioned up front.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: Vec<(String, DeviceRef)>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, user: &str, device: DeviceRef) -> Self {
        self.entries.push((user.trim().to_lowercase(), device));
        self
    }
}

impl DeviceCatalog for StaticCatalog {
    fn lookup(&self, user: &str) -> Result<Vec<DeviceRef>, CatalogError> {
        let needle = user.trim().to_lowercase();
        Ok(self
            .entries
            .iter()
            .filter(|(owner, _)| *owner == needle)
            .map(|(_, device)| device.clone())
            .collect())
    }
}
