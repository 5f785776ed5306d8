//! Error types for smartband-core operations.
//!
//! Every error here is recoverable: the engine folds each one into a spoken
//! reply and the conversation continues.

use crate::shadow::Phase;

// ═══════════════════════════════════════════════════════════════════════════════
// Rejections (the call was understood, the answer is "no")
// ═══════════════════════════════════════════════════════════════════════════════

/// Typed refusal returned instead of executing a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("no user has been identified in this conversation")]
    NoIdentity,

    #[error("no device has been selected in this conversation")]
    NoDevice,

    #[error("no devices registered for user {user}")]
    NoSuchUser { user: String },

    #[error("no device named {nickname} for the current user")]
    NoSuchDevice { nickname: String },

    #[error("{raw:?} is not a valid integer for {field}")]
    InvalidValue { field: String, raw: String },

    #[error("reported state has no value for {field}")]
    FieldUnavailable { field: String },
}

impl Rejection {
    /// Stable machine-readable code, used on the IPC surface.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NoIdentity => "no_identity",
            Rejection::NoDevice => "no_device",
            Rejection::NoSuchUser { .. } => "no_such_user",
            Rejection::NoSuchDevice { .. } => "no_such_device",
            Rejection::InvalidValue { .. } => "invalid_value",
            Rejection::FieldUnavailable { .. } => "field_unavailable",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transport failures (the collaborator call itself went wrong)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("device catalog lookup failed during {operation}: {detail}")]
    Catalog {
        operation: &'static str,
        detail: String,
    },

    #[error("shadow store failed during {operation} on {device_key} ({phase}): {detail}")]
    Store {
        operation: &'static str,
        device_key: String,
        phase: Phase,
        detail: String,
    },

    #[error("{operation} exceeded its deadline after {elapsed_ms}ms")]
    DeadlineExceeded {
        operation: &'static str,
        elapsed_ms: u128,
    },
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Catalog { .. } => "catalog_error",
            TransportError::Store { .. } => "store_error",
            TransportError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Combined outcome error
// ═══════════════════════════════════════════════════════════════════════════════

/// Non-success outcome of a single command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BandError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("failed: {0}")]
    Failed(#[from] TransportError),
}

impl BandError {
    pub fn code(&self) -> &'static str {
        match self {
            BandError::Rejected(rejection) => rejection.code(),
            BandError::Failed(failure) => failure.code(),
        }
    }
}

/// Convenience type alias for Results using BandError.
pub type Result<T> = std::result::Result<T, BandError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Collaborator errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Error surfaced by a `ShadowStore` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no shadow exists for {0}")]
    NotFound(String),

    #[error("shadow document is malformed: {0}")]
    Malformed(String),

    #[error("shadow backend error: {0}")]
    Backend(String),
}

/// Error surfaced by a `DeviceCatalog` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device catalog error: {0}")]
pub struct CatalogError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    NoHomeDir,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
