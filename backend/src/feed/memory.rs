//! In-memory feed for local development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use super::{FeedError, RawView, ViewFeed};
use crate::models::ViewId;

/// Feed holding views in memory. Clones share the same views.
#[derive(Debug, Clone, Default)]
pub struct MemoryViewFeed {
    views: Arc<Mutex<Vec<RawView>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl MemoryViewFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `view`, replacing any view with the same id.
    pub fn upsert(&self, view: RawView) {
        let mut views = self.views.lock();
        match views.iter_mut().find(|v| v.id == view.id) {
            Some(existing) => *existing = view,
            None => views.push(view),
        }
    }

    pub fn remove(&self, view_id: ViewId) {
        self.views.lock().retain(|v| v.id != view_id);
    }

    pub fn clear(&self) {
        self.views.lock().clear();
    }

    pub fn views(&self) -> Vec<RawView> {
        self.views.lock().clone()
    }

    /// Makes every fetch fail with `message` until cleared.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }
}

#[async_trait]
impl ViewFeed for MemoryViewFeed {
    async fn fetch_views(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawView>, FeedError> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(FeedError::Unavailable(message));
        }
        let views = self.views.lock();
        Ok(views
            .iter()
            .filter(|v| match (since, v.last_update) {
                (Some(since), Some(updated)) => updated > since,
                _ => true,
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(id: ViewId, minute: u32) -> RawView {
        RawView {
            id,
            disabled: false,
            preference: "{}".to_string(),
            last_update: Some(Utc.with_ymd_and_hms(2025, 3, 20, 15, minute, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_since_filters_older_views() {
        let feed = MemoryViewFeed::new();
        feed.upsert(raw(1, 0));
        feed.upsert(raw(2, 5));
        feed.upsert(raw(1, 10));

        let all = feed.fetch_views(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let since = Utc.with_ymd_and_hms(2025, 3, 20, 15, 5, 0).unwrap();
        let recent = feed.fetch_views(Some(since)).await.unwrap();
        assert_eq!(recent.iter().map(|v| v.id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let feed = MemoryViewFeed::new();
        feed.fail_with("connection refused");
        assert!(matches!(
            feed.fetch_views(None).await,
            Err(FeedError::Unavailable(_))
        ));
        feed.clear_failure();
        assert!(feed.fetch_views(None).await.unwrap().is_empty());
    }
}
