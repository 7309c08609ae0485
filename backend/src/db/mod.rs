//! Database access for the pinning engine.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  PinningService (services::pinning)                     │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │ sessions, transactions
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  PinBatcher / ViewStore (batch)  ──►  PinningStore      │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//!     ┌───────────────┴──────────────┐
//!     │ PostgresRepository           │ LocalRepository
//!     │ (Diesel, r2d2)               │ (in-memory)
//!     └──────────────────────────────┘
//! ```
//!
//! - `repository`: traits and error types
//! - `statement`: queued pin and view mutations
//! - `sql`: statement text and identifier quoting
//! - `factory`: backend selection from configuration

// Feature flag priority: postgres > local
#[cfg(not(any(feature = "postgres-repo", feature = "local-repo")))]
compile_error!("Enable at least one repository backend feature.");

pub mod factory;
pub mod repositories;
pub mod repository;
pub mod sql;
pub mod statement;

#[cfg(feature = "postgres-repo")]
pub use repositories::postgres::PostgresConfig;
#[cfg(not(feature = "postgres-repo"))]
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    _private: (),
}

pub use factory::{RepositoryFactory, RepositoryType};
pub use repositories::LocalRepository;
#[cfg(feature = "postgres-repo")]
pub use repositories::PostgresRepository;
pub use repository::{
    ErrorContext, PinningRepository, PinningSession, PinningStore, RepositoryError,
    RepositoryResult, TimestampLookup,
};
pub use statement::{PinStatement, ViewStatement};
