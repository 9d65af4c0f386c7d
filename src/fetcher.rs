//! Page fetcher for cursor-paginated message history.
//!
//! ARCHITECTURE
//! ============
//! `HistoryEndpoint` is the seam to the history API: one call, one page.
//! `HttpHistoryEndpoint` is the reqwest implementation. `PageFetcher` pairs an
//! endpoint with the feed store and owns the fetch lifecycle: it claims the
//! in-flight slot in the store before awaiting, and writes the result back
//! through the store's merge operations once the response lands.
//!
//! Cursor advancement is serialized: the follow-up cursor is read from the
//! store at issue time and no follow-up is issued while another fetch for
//! the same feed is in flight, so pages always land in request order.
//!
//! ERROR HANDLING
//! ==============
//! Failures are written into the feed (terminal error state) and returned to
//! the caller. Nothing is retried here; `retry` is the caller's decision.

#[cfg(test)]
#[path = "fetcher_test.rs"]
mod fetcher_test;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{FeedStore, Merge};
use crate::config::{FeedConfig, FetchTimeouts};
use crate::error::FeedError;
use crate::message::{Cursor, Page};
use crate::target::{ChatTarget, ResourceKind};

// =============================================================================
// ENDPOINT
// =============================================================================

/// One history request: which resource, and where to resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub kind: ResourceKind,
    pub resource_id: String,
    /// `None` asks for the newest page.
    pub cursor: Option<Cursor>,
}

impl PageRequest {
    #[must_use]
    pub fn first(target: &ChatTarget) -> Self {
        Self { kind: target.kind, resource_id: target.resource_id.clone(), cursor: None }
    }

    #[must_use]
    pub fn after(target: &ChatTarget, cursor: Cursor) -> Self {
        Self { kind: target.kind, resource_id: target.resource_id.clone(), cursor: Some(cursor) }
    }
}

/// Provider-neutral async trait for history fetches. Enables mocking in tests.
#[async_trait::async_trait]
pub trait HistoryEndpoint: Send + Sync {
    /// Fetch one page of history.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] if the request fails, the endpoint answers with
    /// a non-success status, or the body is not a page.
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FeedError>;
}

/// History endpoint backed by the chat HTTP API.
pub struct HttpHistoryEndpoint {
    http: reqwest::Client,
    base_url: String,
}

impl HttpHistoryEndpoint {
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(base_url: impl Into<String>, timeouts: FetchTimeouts) -> Result<Self, FeedError> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(timeouts.connect_secs));
        if let Some(secs) = timeouts.request_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build().map_err(|e| FeedError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_string() })
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn from_config(config: &FeedConfig) -> Result<Self, FeedError> {
        Self::new(config.api_base_url.clone(), config.timeouts)
    }
}

#[async_trait::async_trait]
impl HistoryEndpoint for HttpHistoryEndpoint {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FeedError> {
        let url = format!("{}{}", self.base_url, request.kind.history_path());
        let response = self
            .http
            .get(&url)
            .query(&history_query(request))
            .send()
            .await
            .map_err(|e| FeedError::FetchRequest(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| FeedError::FetchRequest(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(FeedError::FetchResponse { status, body: text });
        }

        parse_page(&text)
    }
}

/// Query pairs for a history request: the resource id, then the cursor if any.
pub(crate) fn history_query(request: &PageRequest) -> Vec<(&'static str, String)> {
    let mut query = vec![(request.kind.param_key(), request.resource_id.clone())];
    if let Some(cursor) = &request.cursor {
        query.push(("cursor", cursor.as_str().to_owned()));
    }
    query
}

pub(crate) fn parse_page(text: &str) -> Result<Page, FeedError> {
    serde_json::from_str(text).map_err(|e| FeedError::FetchParse(e.to_string()))
}

// =============================================================================
// PAGE FETCHER
// =============================================================================

/// What a fetch call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was merged into the feed.
    Applied,
    /// Not issued: another fetch is in flight, history is exhausted, or the
    /// feed is not loaded yet.
    Skipped,
    /// The response arrived after the session ended and was discarded.
    Stale,
}

impl From<Merge> for FetchOutcome {
    fn from(merge: Merge) -> Self {
        match merge {
            Merge::Applied => Self::Applied,
            Merge::Stale => Self::Stale,
        }
    }
}

/// Drives history fetches for feeds in a shared store.
#[derive(Clone)]
pub struct PageFetcher {
    store: FeedStore,
    endpoint: Arc<dyn HistoryEndpoint>,
}

impl PageFetcher {
    #[must_use]
    pub fn new(store: FeedStore, endpoint: Arc<dyn HistoryEndpoint>) -> Self {
        Self { store, endpoint }
    }

    #[must_use]
    pub fn store(&self) -> &FeedStore {
        &self.store
    }

    /// Fetch the newest page and seed the feed with it.
    ///
    /// # Errors
    ///
    /// Returns the endpoint error after recording it in the feed.
    pub async fn fetch_first(&self, target: &ChatTarget, epoch: u64) -> Result<FetchOutcome, FeedError> {
        let key = target.key();
        if !self.store.write(|cache| cache.begin_first_fetch(key, epoch)) {
            debug!(%key, "first page fetch skipped");
            return Ok(FetchOutcome::Skipped);
        }

        let result = self.endpoint.fetch_page(&PageRequest::first(target)).await;
        let failure = result.as_ref().err().cloned();
        let merge = self.store.write(|cache| cache.complete_first_fetch(key, epoch, result));
        finish(merge, failure)
    }

    /// Fetch the page behind the oldest loaded page and append it.
    ///
    /// # Errors
    ///
    /// Returns the endpoint error after recording it in the feed.
    pub async fn fetch_next(&self, target: &ChatTarget, epoch: u64) -> Result<FetchOutcome, FeedError> {
        let key = target.key();
        let Some(cursor) = self.store.write(|cache| cache.begin_next_fetch(key, epoch)) else {
            debug!(%key, "older page fetch skipped");
            return Ok(FetchOutcome::Skipped);
        };

        let result = self.endpoint.fetch_page(&PageRequest::after(target, cursor)).await;
        let failure = result.as_ref().err().cloned();
        let merge = self.store.write(|cache| cache.complete_next_fetch(key, epoch, result));
        finish(merge, failure)
    }
}

fn finish(merge: Merge, failure: Option<FeedError>) -> Result<FetchOutcome, FeedError> {
    match (merge, failure) {
        (Merge::Applied, Some(e)) => Err(e),
        (merge, _) => Ok(merge.into()),
    }
}
