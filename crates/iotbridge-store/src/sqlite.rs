//! SQLite-backed device store
//!
//! Every operation checks a connection out of an r2d2 pool and runs on the
//! blocking thread pool. Writes use `BEGIN IMMEDIATE` so a state merge reads
//! and writes the row under the database write lock: concurrent updates to the
//! same device are applied one after another and none is lost. Readers are
//! never blocked by writers (WAL journal).
//!
//! SQLite allows a single writer per database, so writes to *different*
//! devices also wait on each other here. This falls short of the
//! [`DeviceStore`] contract, under which writes to distinct devices do not
//! block one another: every write is serialized and may wait up to the busy
//! timeout.

use async_trait::async_trait;
use iotbridge_core::{
    Capability, Device, DeviceId, DevicePatch, DeviceStore, StateMap, StoreError,
};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::schema;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// How long a writer waits for the database lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_DEVICE: &str =
    "SELECT id, name, type, protocol, room, state, capabilities FROM devices";

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Device store persisted in a SQLite database file
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(db_err)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            Ok(())
        });
        let pool = Pool::builder().max_size(4).build(manager).map_err(db_err)?;

        let store = Self::with_pool(pool)?;
        info!(path = %path.display(), "Opened device database");
        Ok(store)
    }

    /// Open a private in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        // each in-memory connection is its own database, so keep exactly one
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;
        Self::with_pool(pool)
    }

    fn with_pool(pool: DbPool) -> Result<Self, StoreError> {
        let conn = pool.get().map_err(db_err)?;
        schema::init(&conn).map_err(db_err)?;
        Ok(Self { pool })
    }

    /// Run a blocking database operation on a pooled connection
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(db_err)?;
            op(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Read-modify-write one device's metadata and capabilities under the
    /// write lock; state is left untouched
    async fn modify<F>(&self, id: &DeviceId, apply: F) -> Result<Option<Device>, StoreError>
    where
        F: FnOnce(&mut Device) + Send + 'static,
    {
        let id = id.clone();
        self.run(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;

            let row = tx
                .query_row(
                    &format!("{} WHERE id = ?1", SELECT_DEVICE),
                    rusqlite::params![id.as_str()],
                    DeviceRow::from_row,
                )
                .optional()
                .map_err(db_err)?;
            let Some(row) = row else {
                return Ok(None);
            };

            let mut device = row.into_device()?;
            apply(&mut device);

            tx.execute(
                r"
                UPDATE devices
                SET name = ?2, room = ?3, capabilities = ?4, updated_at = datetime('now')
                WHERE id = ?1
                ",
                rusqlite::params![
                    id.as_str(),
                    device.name,
                    device.room,
                    serde_json::to_string(&device.capabilities)?,
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(Some(device))
        })
        .await
    }
}

/// Columns as read from a row, before JSON decoding
struct DeviceRow {
    id: String,
    name: String,
    device_type: String,
    protocol: String,
    room: String,
    state: String,
    capabilities: String,
}

impl DeviceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            device_type: row.get(2)?,
            protocol: row.get(3)?,
            room: row.get(4)?,
            state: row.get(5)?,
            capabilities: row.get(6)?,
        })
    }

    fn into_device(self) -> Result<Device, StoreError> {
        let state: StateMap = serde_json::from_str(&self.state)?;
        let capabilities: Vec<Capability> = serde_json::from_str(&self.capabilities)?;
        Ok(Device {
            id: DeviceId(self.id),
            name: self.name,
            device_type: self.device_type,
            protocol: self.protocol,
            room: self.room,
            state,
            capabilities,
        })
    }
}

#[async_trait]
impl DeviceStore for SqliteStore {
    async fn add(&self, device: Device) -> Result<(), StoreError> {
        let state = serde_json::to_string(&device.state)?;
        let capabilities = serde_json::to_string(&device.capabilities)?;

        self.run(move |conn| {
            conn.execute(
                r"
                INSERT INTO devices (id, name, type, protocol, room, state, capabilities)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    type = excluded.type,
                    protocol = excluded.protocol,
                    room = excluded.room,
                    state = excluded.state,
                    capabilities = excluded.capabilities,
                    updated_at = datetime('now')
                ",
                rusqlite::params![
                    device.id.as_str(),
                    device.name,
                    device.device_type,
                    device.protocol,
                    device.room,
                    state,
                    capabilities,
                ],
            )
            .map_err(db_err)?;

            debug!(device = %device.id, "Stored device");
            Ok(())
        })
        .await
    }

    async fn add_if_absent(&self, device: Device) -> Result<bool, StoreError> {
        let state = serde_json::to_string(&device.state)?;
        let capabilities = serde_json::to_string(&device.capabilities)?;

        self.run(move |conn| {
            let inserted = conn
                .execute(
                    r"
                    INSERT INTO devices (id, name, type, protocol, room, state, capabilities)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(id) DO NOTHING
                    ",
                    rusqlite::params![
                        device.id.as_str(),
                        device.name,
                        device.device_type,
                        device.protocol,
                        device.room,
                        state,
                        capabilities,
                    ],
                )
                .map_err(db_err)?;

            debug!(device = %device.id, inserted = inserted == 1, "Conditional insert");
            Ok(inserted == 1)
        })
        .await
    }

    async fn get(&self, id: &DeviceId) -> Result<Option<Device>, StoreError> {
        let id = id.clone();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!("{} WHERE id = ?1", SELECT_DEVICE),
                    rusqlite::params![id.as_str()],
                    DeviceRow::from_row,
                )
                .optional()
                .map_err(db_err)?;
            row.map(DeviceRow::into_device).transpose()
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<Device>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(SELECT_DEVICE).map_err(db_err)?;
            let rows = stmt
                .query_map([], DeviceRow::from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows.into_iter().map(DeviceRow::into_device).collect()
        })
        .await
    }

    async fn update_state(&self, id: &DeviceId, updates: &StateMap) -> Result<(), StoreError> {
        let id = id.clone();
        let updates = updates.clone();

        self.run(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;

            let current: Option<String> = tx
                .query_row(
                    "SELECT state FROM devices WHERE id = ?1",
                    rusqlite::params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            let Some(current) = current else {
                debug!(device = %id, "Ignoring state update for unknown device");
                return Ok(());
            };

            let mut state: StateMap = serde_json::from_str(&current)?;
            state.extend(updates);

            tx.execute(
                "UPDATE devices SET state = ?2, updated_at = datetime('now') WHERE id = ?1",
                rusqlite::params![id.as_str(), serde_json::to_string(&state)?],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)
        })
        .await
    }

    async fn update_metadata(
        &self,
        id: &DeviceId,
        patch: &DevicePatch,
    ) -> Result<Option<Device>, StoreError> {
        let patch = patch.clone();
        self.modify(id, move |device| device.apply_patch(&patch)).await
    }

    async fn set_capabilities(
        &self,
        id: &DeviceId,
        capabilities: Vec<Capability>,
    ) -> Result<Option<Device>, StoreError> {
        self.modify(id, move |device| device.replace_capabilities(capabilities))
            .await
    }

    async fn delete(&self, id: &DeviceId) -> Result<(), StoreError> {
        let id = id.clone();
        self.run(move |conn| {
            let rows = conn
                .execute("DELETE FROM devices WHERE id = ?1", rusqlite::params![id.as_str()])
                .map_err(db_err)?;
            if rows > 0 {
                debug!(device = %id, "Deleted device");
            }
            Ok(())
        })
        .await
    }
}
