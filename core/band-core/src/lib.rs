//! # smartband-core
//!
//! Session gating and the shadow request protocol behind the SmartBand voice
//! bridge. A conversation identifies a user, binds one of their bands, and
//! then reads or writes fields on that band's shadow.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The only suspension point
//!   is the quiescence wait, which blocks the calling thread only.
//! - **Explicit sessions**: `SessionState` is a value the caller owns per
//!   conversation; there is no process-wide session.
//! - **Collaborators behind traits**: `DeviceCatalog` and `ShadowStore` are
//!   implemented by the host (the daemon backs both with SQLite).
//! - **Every outcome speaks**: rejections and failures fold into a `Reply`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use smartband_core::{BandConfig, CommandEngine, SessionState};
//!
//! let engine = CommandEngine::new(catalog, store, &BandConfig::default());
//! let mut session = SessionState::new();
//! engine.handle(&mut session, "identify-user", Some("ana"));
//! engine.handle(&mut session, "select-device", Some("band1"));
//! let reply = engine.handle(&mut session, "read-heart-rate", None);
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod messages;
pub mod request;
pub mod router;
pub mod session;
pub mod shadow;
pub mod types;

pub use catalog::{DeviceCatalog, StaticCatalog};
pub use config::{load_config, BandConfig};
pub use engine::{CommandEngine, Outcome, Reply};
pub use error::{
    BandError, CatalogError, ConfigError, Rejection, Result, StoreError, TransportError,
};
pub use gate::CommandGate;
pub use messages::{Locale, Phrasebook};
pub use request::ShadowRequester;
pub use router::{IntentRouter, Operation, RouteError, Routed};
pub use session::{ReidentifyPolicy, SessionState};
pub use shadow::{
    merge_document, DesiredPatch, DeviceKey, MemoryShadowStore, Phase, ReportedSnapshot,
    ShadowStore,
};
pub use types::{Command, DeviceRef, FieldKey, UserId};
