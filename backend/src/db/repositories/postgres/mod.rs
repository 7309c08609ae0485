//! Postgres repository implementation using Diesel.
//!
//! ## Features
//!
//! - Connection pooling with r2d2
//! - Retry with exponential backoff when checking out a connection
//! - Session-level advisory locks (`pg_try_advisory_lock`)
//! - Pin batches sent as one multi-statement round trip
//! - Consecutive view inserts sent as one multi-row upsert
//! - Automatic migration of the `views` and `pinning_run` tables
//!
//! Data tables are owned by the ingestion side; they are expected to carry an
//! integer `pin` column next to their temporal column.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
//! - `PG_POOL_MAX`: Maximum pool size (default: 4)
//! - `PG_POOL_MIN`: Minimum pool size (default: 1)
//! - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
//! - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
//! - `PG_MAX_RETRIES`: Maximum retry attempts for connection checkout (default: 3)
//! - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)

use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_query;
use diesel::sql_types::{BigInt, Timestamptz};
use diesel::upsert::excluded;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, warn};
use std::time::Duration;

use crate::db::repository::{
    ErrorContext, PinningRepository, PinningSession, PinningStore, RepositoryError,
    RepositoryResult, TimestampLookup, UnitOfWork,
};
use crate::db::sql;
use crate::db::statement::{coalesce_views, PinStatement, ViewChunk, ViewStatement};
use crate::models::{MappedLayer, ViewId, ViewRecord};

mod models;
mod schema;

use models::*;
use schema::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

/// Primary key of the single watermark row.
const RUN_ROW_ID: i32 = 1;

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_pool_size: u32,
    /// Minimum number of connections in the pool
    pub min_pool_size: u32,
    /// Connection timeout in seconds
    pub connection_timeout_sec: u64,
    /// Idle connection timeout in seconds
    pub idle_timeout_sec: u64,
    /// Maximum number of retry attempts when checking out a connection
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 4,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("PG_DATABASE_URL"))
            .map_err(|_| "DATABASE_URL or PG_DATABASE_URL must be set".to_string())?;
        let defaults = Self::default();

        Ok(Self {
            database_url,
            max_pool_size: env_or("PG_POOL_MAX", defaults.max_pool_size),
            min_pool_size: env_or("PG_POOL_MIN", defaults.min_pool_size),
            connection_timeout_sec: env_or("PG_CONN_TIMEOUT_SEC", defaults.connection_timeout_sec),
            idle_timeout_sec: env_or("PG_IDLE_TIMEOUT_SEC", defaults.idle_timeout_sec),
            max_retries: env_or("PG_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("PG_RETRY_DELAY_MS", defaults.retry_delay_ms),
        })
    }

    /// Create a new configuration with a database URL.
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

/// Diesel-backed repository for Postgres.
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
}

impl PostgresRepository {
    /// Create a new repository and run pending migrations.
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("max_size={}", config.max_pool_size)),
                )
            })?;

        {
            let mut conn = pool.get().map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_connection_for_migrations"),
                )
            })?;
            Self::run_migrations(&mut conn)?;
        }

        Ok(Self { pool, config })
    }

    fn run_migrations(conn: &mut PgConnection) -> RepositoryResult<()> {
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Migration failed: {}", e),
                ErrorContext::new("run_migrations"),
            )
        })?;
        Ok(())
    }

    /// Check out a connection, retrying transient failures with exponential backoff.
    fn checkout(&self) -> RepositoryResult<PgPooled> {
        let mut retry_delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut attempt = 0;
        loop {
            match self.pool.get() {
                Ok(conn) => return Ok(conn),
                Err(e) if attempt < self.config.max_retries => {
                    warn!(
                        "connection checkout failed (attempt {}): {}; retrying in {:?}",
                        attempt + 1,
                        e,
                        retry_delay
                    );
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(RepositoryError::connection_with_context(
                        e.to_string(),
                        ErrorContext::new("get_connection")
                            .with_details(format!("attempts={}", attempt + 1)),
                    ))
                }
            }
        }
    }
}

impl PinningRepository for PostgresRepository {
    fn open_session(&self) -> RepositoryResult<Box<dyn PinningSession>> {
        Ok(Box::new(PgSession {
            conn: self.checkout()?,
            held_locks: Vec::new(),
        }))
    }

    fn health_check(&self) -> RepositoryResult<bool> {
        let mut conn = self.checkout()?;
        sql_query("SELECT 1")
            .execute(&mut *conn)
            .map(|_| true)
            .map_err(|e| RepositoryError::from(e).with_operation("health_check"))
    }
}

struct PgSession {
    conn: PgPooled,
    held_locks: Vec<i64>,
}

impl PinningSession for PgSession {
    fn try_advisory_lock(&mut self, key: i64) -> RepositoryResult<bool> {
        let row: AdvisoryLockRow = sql_query(sql::TRY_ADVISORY_LOCK)
            .bind::<BigInt, _>(key)
            .get_result(&mut *self.conn)
            .map_err(|e| RepositoryError::from(e).with_operation("try_advisory_lock"))?;
        if row.ok && !self.held_locks.contains(&key) {
            self.held_locks.push(key);
        }
        Ok(row.ok)
    }

    fn advisory_unlock(&mut self, key: i64) -> RepositoryResult<bool> {
        let row: AdvisoryLockRow = sql_query(sql::ADVISORY_UNLOCK)
            .bind::<BigInt, _>(key)
            .get_result(&mut *self.conn)
            .map_err(|e| RepositoryError::from(e).with_operation("advisory_unlock"))?;
        self.held_locks.retain(|held| *held != key);
        Ok(row.ok)
    }

    fn last_run(&mut self) -> RepositoryResult<Option<DateTime<Utc>>> {
        pinning_run::table
            .find(RUN_ROW_ID)
            .select(pinning_run::last_run)
            .first::<DateTime<Utc>>(&mut *self.conn)
            .optional()
            .map_err(|e| RepositoryError::from(e).with_operation("last_run"))
    }

    fn transaction(&mut self, work: &mut UnitOfWork<'_>) -> RepositoryResult<()> {
        let conn: &mut PgConnection = &mut self.conn;
        conn.transaction::<(), RepositoryError, _>(|tx| {
            let mut store = PgStore { conn: tx };
            work(&mut store)
        })
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        // Session-level locks outlive the checkout otherwise.
        for key in std::mem::take(&mut self.held_locks) {
            if let Err(e) = sql_query(sql::ADVISORY_UNLOCK)
                .bind::<BigInt, _>(key)
                .execute(&mut *self.conn)
            {
                warn!("failed to release advisory lock {} on drop: {}", key, e);
            }
        }
    }
}

struct PgStore<'a> {
    conn: &'a mut PgConnection,
}

impl TimestampLookup for PgStore<'_> {
    fn nearest_timestamp(
        &mut self,
        layer: &MappedLayer,
        target: DateTime<Utc>,
    ) -> RepositoryResult<Option<DateTime<Utc>>> {
        let row: Option<NearestRow> =
            sql_query(sql::nearest_timestamp(&layer.table_name, &layer.temporal_attribute))
                .bind::<Timestamptz, _>(target)
                .get_result(&mut *self.conn)
                .optional()
                .map_err(|e| {
                    RepositoryError::from(e).with_operation(format!(
                        "nearest_timestamp({}.{})",
                        layer.table_name, layer.temporal_attribute
                    ))
                })?;
        Ok(row.map(|r| r.nearest))
    }
}

impl PinningStore for PgStore<'_> {
    fn execute_pin_batch(&mut self, batch: &[PinStatement]) -> RepositoryResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let script = batch
            .iter()
            .map(PinStatement::to_sql)
            .collect::<Vec<_>>()
            .join(";\n");
        self.conn.batch_execute(&script).map_err(|e| {
            RepositoryError::from(e).with_operation(format!("pin_batch({} statements)", batch.len()))
        })?;
        debug!("flushed {} pin statements", batch.len());
        Ok(batch.len())
    }

    /// Runs of inserts go out as one multi-row upsert; updates and deletes
    /// are one statement each.
    fn execute_view_batch(&mut self, batch: &[ViewStatement]) -> RepositoryResult<usize> {
        let mut affected = 0;
        for chunk in coalesce_views(batch) {
            affected += match chunk {
                ViewChunk::Insert(inserts) => {
                    let rows: Vec<NewViewRow> = inserts
                        .iter()
                        .filter_map(|statement| match statement {
                            ViewStatement::Insert(record) => Some(NewViewRow::from(record)),
                            _ => None,
                        })
                        .collect();
                    diesel::insert_into(views::table)
                        .values(&rows)
                        .on_conflict(views::view_id)
                        .do_update()
                        .set((
                            views::time_original.eq(excluded(views::time_original)),
                            views::time_main.eq(excluded(views::time_main)),
                            views::layers_list.eq(excluded(views::layers_list)),
                            views::last_update.eq(excluded(views::last_update)),
                            views::driving_layer.eq(excluded(views::driving_layer)),
                        ))
                        .execute(&mut *self.conn)
                        .map_err(|e| {
                            RepositoryError::from(e)
                                .with_operation(format!("view_batch(insert {} views)", rows.len()))
                        })?
                }
                ViewChunk::Update(record) => {
                    let row = NewViewRow::from(record);
                    diesel::update(views::table.find(record.id))
                        .set(&row)
                        .execute(&mut *self.conn)
                        .map_err(|e| {
                            RepositoryError::from(e)
                                .with_operation(format!("view_batch(update view_id={})", record.id))
                        })?
                }
                ViewChunk::Delete(id) => diesel::delete(views::table.find(id))
                    .execute(&mut *self.conn)
                    .map_err(|e| {
                        RepositoryError::from(e)
                            .with_operation(format!("view_batch(delete view_id={})", id))
                    })?,
            };
        }
        debug!("flushed {} view statements", batch.len());
        Ok(affected)
    }

    fn fetch_view(&mut self, view_id: ViewId) -> RepositoryResult<Option<ViewRecord>> {
        let row = views::table
            .find(view_id)
            .select(ViewRow::as_select())
            .first(&mut *self.conn)
            .optional()
            .map_err(|e| RepositoryError::from(e).with_operation("fetch_view"))?;
        Ok(row.map(ViewRecord::from))
    }

    fn truncate_views(&mut self) -> RepositoryResult<()> {
        sql_query(sql::TRUNCATE_VIEWS)
            .execute(&mut *self.conn)
            .map(|_| ())
            .map_err(|e| RepositoryError::from(e).with_operation("truncate_views"))
    }

    fn store_last_run(&mut self, at: DateTime<Utc>) -> RepositoryResult<()> {
        diesel::insert_into(pinning_run::table)
            .values((pinning_run::id.eq(RUN_ROW_ID), pinning_run::last_run.eq(at)))
            .on_conflict(pinning_run::id)
            .do_update()
            .set(pinning_run::last_run.eq(at))
            .execute(&mut *self.conn)
            .map(|_| ())
            .map_err(|e| RepositoryError::from(e).with_operation("store_last_run"))
    }
}
