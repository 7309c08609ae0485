//! View feed: the external preferences service listing saved views.
//!
//! Decoding happens in two stages. The HTTP envelope yields [`RawView`]s whose
//! `preference` field is itself a JSON document; [`parse_view`] decodes and
//! validates that document into a [`ParsedView`](crate::models::ParsedView).

pub mod client;
pub mod memory;
pub mod preference;

pub use client::HttpViewFeed;
pub use memory::MemoryViewFeed;
pub use preference::{decode_envelope, parse_view, Preference, RawView};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::ViewId;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Feed {url} answered {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Malformed feed envelope at {path}: {message}")]
    Envelope { path: String, message: String },

    #[error("Malformed preference of view {view_id} at {path}: {message}")]
    Preference {
        view_id: ViewId,
        path: String,
        message: String,
    },

    #[error("Invalid preference of view {view_id}: {reason}")]
    InvalidPreference { view_id: ViewId, reason: String },

    #[error("Feed unavailable: {0}")]
    Unavailable(String),

    #[error("Feed misconfigured: {0}")]
    Configuration(String),
}

/// Source of views, optionally limited to those modified after `since`.
///
/// Either every view of the page is returned or an error is.
#[async_trait]
pub trait ViewFeed: Send + Sync {
    async fn fetch_views(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawView>, FeedError>;
}
