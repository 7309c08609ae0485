//! HTTP client for the preferences feed.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};

use super::{decode_envelope, FeedError, RawView, ViewFeed};
use crate::config::FeedSettings;

#[derive(Debug, Clone)]
pub struct HttpViewFeed {
    client: reqwest::Client,
    url: String,
    since_param: String,
}

impl HttpViewFeed {
    pub fn new(settings: &FeedSettings) -> Result<Self, FeedError> {
        let base = settings.base_url.trim();
        if base.is_empty() {
            return Err(FeedError::Configuration(
                "feed.base_url is not set".to_string(),
            ));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| FeedError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let path = settings.search_path.trim();
        let url = if path.is_empty() {
            base.trim_end_matches('/').to_string()
        } else {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };

        Ok(Self {
            client,
            url,
            since_param: settings.since_param.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ViewFeed for HttpViewFeed {
    async fn fetch_views(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawView>, FeedError> {
        let mut request = self.client.get(&self.url);
        if let Some(since) = since {
            let watermark = since.to_rfc3339_opts(SecondsFormat::AutoSi, true);
            debug!("Fetching views modified since {}", watermark);
            request = request.query(&[(self.since_param.as_str(), watermark.as_str())]);
        }

        let response = request.send().await.map_err(|source| FeedError::Request {
            url: self.url.clone(),
            source,
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| FeedError::Request {
            url: self.url.clone(),
            source,
        })?;

        if !status.is_success() {
            return Err(FeedError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let views = decode_envelope(&body)?;
        info!("Feed returned {} views", views.len());
        Ok(views)
    }
}
