//! # Pinning engine
//!
//! Maintains per-row `pin` reference counts on geospatial data tables so that
//! rows near the reference time of any saved map view are kept.
//!
//! Each view names a time and a set of layers. Every layer resolves to one or
//! more tables with a temporal column; rows whose timestamp falls within a
//! window around the view's time are pinned. As views are created, moved,
//! re-layered or disabled the engine adjusts the counters incrementally, and
//! a periodic reset rebuilds them from scratch.
//!
//! ## Architecture
//!
//! - [`models`]: views, layers and window arithmetic
//! - [`catalog`]: layer catalog, mapping file and resolved registry
//! - [`feed`]: client of the preferences feed listing views
//! - [`reconciler`]: pin/unpin planning for one view change
//! - [`batch`]: batched pin and view writers
//! - [`db`]: repository traits with Postgres and in-memory backends
//! - [`services`]: orchestration of reset and incremental runs
//! - [`config`]: TOML configuration
//! - [`http`]: Axum-based trigger/poll API

// RepositoryError carries rich context
#![allow(clippy::result_large_err)]

pub mod batch;
pub mod catalog;
pub mod config;
pub mod db;
pub mod feed;
pub mod models;
pub mod reconciler;
pub mod services;

#[cfg(feature = "http-server")]
pub mod http;
