//! The catalog store: jimm's durable record of clouds, controllers,
//! credentials, models, offers, users and groups.
//!
//! Every multi-step mutation runs inside a single transaction so partial
//! failures leave no dangling rows. Unique violations surface as
//! `AlreadyExists`, missing rows as `NotFound` and foreign-key violations
//! as `BadRequest`.

mod audit;
mod clouds;
mod controllers;
mod credentials;
mod groups;
mod models;
mod users;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::utils::{Clock, SystemClock};
use crate::{JimmError, JimmResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use audit::*;
pub use clouds::*;
pub use controllers::*;
pub use credentials::*;
pub use groups::*;
pub use models::*;
pub use users::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

static MIGRATOR: Migrator = sqlx::migrate!("lib/db/migrations");

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A handle on the catalog database. Cheap to clone; all clones share the
/// same connection pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Database {
    /// Opens (creating if necessary) the catalog database at the given path
    /// and applies any pending migrations.
    pub async fn new(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> JimmResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| JimmError::Database(e.into()))?;
        Ok(Database { pool, clock })
    }

    /// Opens an in-memory catalog, used in tests.
    pub async fn new_in_memory() -> JimmResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(JimmError::Database)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| JimmError::Database(e.into()))?;
        Ok(Database {
            pool,
            clock: Arc::new(SystemClock),
        })
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Maps a store error onto the stable taxonomy: unique violations become
/// `AlreadyExists`, foreign-key violations `BadRequest`.
pub(crate) fn db_error(what: &str, err: sqlx::Error) -> JimmError {
    if let sqlx::Error::Database(dberr) = &err {
        let message = dberr.message();
        if message.contains("UNIQUE constraint failed") {
            return JimmError::AlreadyExists(what.to_string());
        }
        if message.contains("FOREIGN KEY constraint failed") {
            return JimmError::BadRequest(format!("{}: invalid reference", what));
        }
    }
    JimmError::Database(err)
}

/// The `NotFound` error for a missing row.
pub(crate) fn not_found(what: impl std::fmt::Display) -> JimmError {
    JimmError::NotFound(what.to_string())
}
