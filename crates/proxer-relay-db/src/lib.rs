//! The persistence adapter (spec §4.5).
//!
//! The core only depends on `load()/save(bytes)/driver()/health()`; this
//! crate supplies a `memory` driver (snapshot held in-process only, useful
//! for tests and `dev_mode`) and a `sqlite` driver that stores one
//! versioned blob via `sea-orm`.

pub mod entities;
pub mod migrator;

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;

use entities::snapshot::{self, SINGLETON_ID};
use migrator::Migrator;

#[derive(Debug, Clone)]
pub struct PersistenceHealth {
    pub status: &'static str,
    pub driver: &'static str,
    pub last_saved_at: Option<DateTime<Utc>>,
}

/// Interface the gateway core depends on (spec §4.5). Persistence errors
/// are logged and surfaced as warning incidents by the caller, never as a
/// hard failure of the request path.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn load(&self) -> anyhow::Result<Option<Vec<u8>>>;
    async fn save(&self, bytes: &[u8]) -> anyhow::Result<()>;
    fn driver(&self) -> &'static str;
    fn health(&self) -> PersistenceHealth;
}

/// In-memory adapter: no durability across restarts. Used for
/// `storage_driver=memory` and in tests.
#[derive(Default)]
pub struct MemoryAdapter {
    state: Mutex<(Option<Vec<u8>>, Option<DateTime<Utc>>)>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryAdapter {
    async fn load(&self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.state.lock().unwrap().0.clone())
    }

    async fn save(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.0 = Some(bytes.to_vec());
        state.1 = Some(Utc::now());
        Ok(())
    }

    fn driver(&self) -> &'static str {
        "memory"
    }

    fn health(&self) -> PersistenceHealth {
        let state = self.state.lock().unwrap();
        PersistenceHealth {
            status: "ok",
            driver: "memory",
            last_saved_at: state.1,
        }
    }
}

/// SQLite-backed adapter storing one versioned snapshot row.
pub struct SqliteAdapter {
    db: DatabaseConnection,
    last_saved_at: Mutex<Option<DateTime<Utc>>>,
}

impl SqliteAdapter {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            last_saved_at: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PersistenceAdapter for SqliteAdapter {
    async fn load(&self) -> anyhow::Result<Option<Vec<u8>>> {
        let row = snapshot::Entity::find_by_id(SINGLETON_ID).one(&self.db).await?;
        Ok(row.map(|m| m.payload))
    }

    async fn save(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let now = Utc::now();
        let existing = snapshot::Entity::find_by_id(SINGLETON_ID).one(&self.db).await?;
        let model = snapshot::ActiveModel {
            id: Set(SINGLETON_ID),
            payload: Set(bytes.to_vec()),
            saved_at: Set(now),
        };
        if existing.is_some() {
            model.update(&self.db).await?;
        } else {
            model.insert(&self.db).await?;
        }
        *self.last_saved_at.lock().unwrap() = Some(now);
        Ok(())
    }

    fn driver(&self) -> &'static str {
        "sqlite"
    }

    fn health(&self) -> PersistenceHealth {
        PersistenceHealth {
            status: "ok",
            driver: "sqlite",
            last_saved_at: *self.last_saved_at.lock().unwrap(),
        }
    }
}

/// Opens a connection to `database_url` (e.g. `sqlite://path/to/db.sqlite?mode=rwc`).
pub async fn connect(database_url: &str) -> anyhow::Result<DatabaseConnection> {
    let db = sea_orm::Database::connect(database_url).await?;
    Ok(db)
}

/// Applies any pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> anyhow::Result<()> {
    Migrator::up(db, None).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_adapter_round_trips() {
        let adapter = MemoryAdapter::new();
        assert!(adapter.load().await.unwrap().is_none());

        adapter.save(b"snapshot-bytes").await.unwrap();
        assert_eq!(adapter.load().await.unwrap().unwrap(), b"snapshot-bytes");
        assert!(adapter.health().last_saved_at.is_some());
    }

    #[tokio::test]
    async fn sqlite_adapter_round_trips() {
        let db = connect("sqlite::memory:").await.unwrap();
        migrate(&db).await.unwrap();
        let adapter = SqliteAdapter::new(db);

        assert!(adapter.load().await.unwrap().is_none());
        adapter.save(b"first").await.unwrap();
        assert_eq!(adapter.load().await.unwrap().unwrap(), b"first");

        adapter.save(b"second").await.unwrap();
        assert_eq!(adapter.load().await.unwrap().unwrap(), b"second");
    }
}
