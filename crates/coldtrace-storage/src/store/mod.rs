use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use std::path::Path;

pub mod alert;
pub mod contact;
pub mod delivery;
pub mod job;
pub mod reminder;
pub mod rule_config;
pub mod unit;

pub use alert::AlertFilter;
pub use contact::ContactInput;
pub use unit::UnitRow;

/// Unified access layer for the facility database.
///
/// All methods are `async fn` backed by SeaORM + SQLite. One instance is
/// shared (behind `Arc`) between the HTTP handlers, the reconciliation
/// loop, the delivery workers, and the escalation scheduler.
pub struct FacilityStore {
    pub(crate) db: DatabaseConnection,
}

impl FacilityStore {
    /// Connects and initializes the facility database.
    ///
    /// - `db_url`: full connection URL supplied by server config, e.g.
    ///   `sqlite:///data/coldtrace.db?mode=rwc`.
    /// - `data_dir`: local data directory; created if missing.
    ///
    /// Runs all pending `sea-orm-migration` migrations.
    pub async fn new(db_url: &str, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = Database::connect(db_url).await?;

        // WAL mode only applies to SQLite
        if db_url.starts_with("sqlite://") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }

        Migrator::up(&db, None).await?;

        tracing::info!("Initialized facility store (SeaORM)");

        Ok(Self { db })
    }

    /// Returns the underlying connection (for submodules).
    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}
