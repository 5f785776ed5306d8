//! SQLite persistence for smartband-daemon.
//!
//! Two tables: `user_devices` is the catalog of which bands a user owns, and
//! `shadows` holds one desired/reported document pair per device key.

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

use smartband_core::{
    merge_document, CatalogError, DesiredPatch, DeviceCatalog, DeviceKey, DeviceRef,
    ReportedSnapshot, ShadowStore, StoreError,
};

pub struct Db {
    path: PathBuf,
}

/// Full shadow row, as returned by `get_shadow`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShadowDocument {
    pub device_key: String,
    pub desired: Map<String, Value>,
    pub reported: Map<String, Value>,
    pub version: i64,
    pub updated_at: String,
}

#[derive(Clone, Copy)]
enum Side {
    Desired,
    Reported,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    /// Adds or re-points `(user, nickname)`. Usernames are stored lowercased.
    pub fn register_device(
        &self,
        user: &str,
        nickname: &str,
        physical_id: &str,
    ) -> Result<(), String> {
        let username = normalize_user(user);
        let now = Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO user_devices (username, nickname, serial_number, registered_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(username, nickname) DO UPDATE SET \
                    serial_number = excluded.serial_number, \
                    registered_at = excluded.registered_at",
                params![username, nickname.trim(), physical_id.trim(), now],
            )
            .map_err(|err| format!("Failed to register device: {}", err))?;
            Ok(())
        })
    }

    pub fn devices_for_user(&self, user: &str) -> Result<Vec<DeviceRef>, String> {
        let username = normalize_user(user);
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT nickname, serial_number FROM user_devices \
                     WHERE username = ?1 ORDER BY registered_at ASC, nickname ASC",
                )
                .map_err(|err| format!("Failed to prepare device query: {}", err))?;
            let rows = stmt
                .query_map(params![username], |row| {
                    Ok(DeviceRef::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                })
                .map_err(|err| format!("Failed to read device rows: {}", err))?;

            let mut devices = Vec::new();
            for row in rows {
                devices.push(row.map_err(|err| format!("Failed to decode device row: {}", err))?);
            }
            Ok(devices)
        })
    }

    pub fn merge_desired(
        &self,
        key: &DeviceKey,
        patch: &Map<String, Value>,
    ) -> Result<ShadowDocument, String> {
        self.merge(key, patch, Side::Desired)
    }

    pub fn merge_reported(
        &self,
        key: &DeviceKey,
        patch: &Map<String, Value>,
    ) -> Result<ShadowDocument, String> {
        self.merge(key, patch, Side::Reported)
    }

    pub fn load_shadow(&self, key: &DeviceKey) -> Result<Option<ShadowDocument>, StoreError> {
        self.with_connection(|conn| Ok(load_shadow_row(conn, key)))
            .map_err(StoreError::Backend)?
    }

    fn merge(
        &self,
        key: &DeviceKey,
        patch: &Map<String, Value>,
        side: Side,
    ) -> Result<ShadowDocument, String> {
        self.with_connection(|conn| {
            // Take the write lock before reading so busy_timeout serializes
            // concurrent merges instead of failing the upgrade with SQLITE_BUSY.
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| format!("Failed to begin shadow transaction: {}", err))?;

            let existing = load_shadow_row(&tx, key).map_err(|err| err.to_string())?;
            let mut document = existing.unwrap_or_else(|| ShadowDocument {
                device_key: key.to_string(),
                desired: Map::new(),
                reported: Map::new(),
                version: 0,
                updated_at: String::new(),
            });
            match side {
                Side::Desired => merge_document(&mut document.desired, patch),
                Side::Reported => merge_document(&mut document.reported, patch),
            }
            document.version += 1;
            document.updated_at = Utc::now().to_rfc3339();

            let desired = serde_json::to_string(&document.desired)
                .map_err(|err| format!("Failed to serialize desired document: {}", err))?;
            let reported = serde_json::to_string(&document.reported)
                .map_err(|err| format!("Failed to serialize reported document: {}", err))?;
            tx.execute(
                "INSERT INTO shadows (device_key, desired, reported, version, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(device_key) DO UPDATE SET \
                    desired = excluded.desired, \
                    reported = excluded.reported, \
                    version = excluded.version, \
                    updated_at = excluded.updated_at",
                params![
                    document.device_key,
                    desired,
                    reported,
                    document.version,
                    document.updated_at
                ],
            )
            .map_err(|err| format!("Failed to write shadow: {}", err))?;

            tx.commit()
                .map_err(|err| format!("Failed to commit shadow transaction: {}", err))?;
            Ok(document)
        })
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS user_devices (
                    username TEXT NOT NULL,
                    nickname TEXT NOT NULL,
                    serial_number TEXT NOT NULL,
                    registered_at TEXT NOT NULL,
                    PRIMARY KEY (username, nickname)
                 );
                 CREATE TABLE IF NOT EXISTS shadows (
                    device_key TEXT PRIMARY KEY,
                    desired TEXT NOT NULL,
                    reported TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

impl DeviceCatalog for Db {
    fn lookup(&self, user: &str) -> Result<Vec<DeviceRef>, CatalogError> {
        self.devices_for_user(user).map_err(CatalogError)
    }
}

impl ShadowStore for Db {
    fn set_desired(&self, key: &DeviceKey, patch: &DesiredPatch) -> Result<(), StoreError> {
        self.merge_desired(key, patch.as_map())
            .map(|_| ())
            .map_err(StoreError::Backend)
    }

    fn get_reported(&self, key: &DeviceKey) -> Result<ReportedSnapshot, StoreError> {
        match self.load_shadow(key)? {
            Some(document) => Ok(ReportedSnapshot::new(document.reported)),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }
}

fn normalize_user(user: &str) -> String {
    user.trim().to_lowercase()
}

fn load_shadow_row(
    conn: &Connection,
    key: &DeviceKey,
) -> Result<Option<ShadowDocument>, StoreError> {
    let row: Option<(String, String, i64, String)> = conn
        .query_row(
            "SELECT desired, reported, version, updated_at FROM shadows WHERE device_key = ?1",
            params![key.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()
        .map_err(|err| StoreError::Backend(format!("Failed to query shadow: {}", err)))?;

    let Some((desired, reported, version, updated_at)) = row else {
        return Ok(None);
    };
    Ok(Some(ShadowDocument {
        device_key: key.to_string(),
        desired: parse_document(&desired, "desired")?,
        reported: parse_document(&reported, "reported")?,
        version,
        updated_at,
    }))
}

fn parse_document(raw: &str, label: &str) -> Result<Map<String, Value>, StoreError> {
    serde_json::from_str(raw)
        .map_err(|err| StoreError::Malformed(format!("{} document: {}", label, err)))
}
