//! Feed session: one mounted conversation view.
//!
//! DESIGN
//! ======
//! `FeedSession` owns the per-view pieces (live subscriber, scroll controller,
//! the current push channel) and a `PageFetcher` onto the shared store. It is
//! the only place that knows which conversation is on screen and which session
//! epoch its fetches belong to.
//!
//! Mounting a conversation releases the previous one, starts a new epoch,
//! brings the live subscription in line, then fetches the newest page. Cached
//! pages from an earlier mount stay visible while that fetch runs.
//!
//! The host drives it with two observations: `handle_scroll` on every scroll
//! event and `after_render` after every commit. Either may issue a fetch for
//! an older page.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::cache::{FeedSnapshot, FeedStore};
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::fetcher::{FetchOutcome, HttpHistoryEndpoint, PageFetcher};
use crate::render::FeedView;
use crate::scroll::{ScrollAction, ScrollContainer, ScrollController};
use crate::subscriber::{LiveChannel, LiveSubscriber};
use crate::target::ChatTarget;

#[derive(Debug, Clone)]
struct Mounted {
    target: ChatTarget,
    epoch: u64,
}

pub struct FeedSession {
    fetcher: PageFetcher,
    subscriber: LiveSubscriber,
    scroll: ScrollController,
    channel: Option<Arc<dyn LiveChannel>>,
    current: Option<Mounted>,
}

impl FeedSession {
    #[must_use]
    pub fn new(fetcher: PageFetcher, scroll: ScrollController) -> Self {
        let subscriber = LiveSubscriber::new(fetcher.store().clone());
        Self { fetcher, subscriber, scroll, channel: None, current: None }
    }

    /// Session over `store` that fetches history from the configured HTTP API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn from_config(config: &FeedConfig, store: FeedStore) -> Result<Self, FeedError> {
        let endpoint = HttpHistoryEndpoint::from_config(config)?;
        let fetcher = PageFetcher::new(store, Arc::new(endpoint));
        Ok(Self::new(fetcher, ScrollController::new(config.scroll)))
    }

    #[must_use]
    pub fn store(&self) -> &FeedStore {
        self.fetcher.store()
    }

    #[must_use]
    pub fn target(&self) -> Option<&ChatTarget> {
        self.current.as_ref().map(|m| &m.target)
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscriber.is_subscribed()
    }

    /// Show `target`: release whatever was mounted, start a fresh session and
    /// fetch the newest page.
    ///
    /// # Errors
    ///
    /// Returns the first-page fetch error; it is also recorded in the feed.
    pub async fn mount(&mut self, target: ChatTarget) -> Result<FetchOutcome, FeedError> {
        self.release_current();
        self.scroll.reset();

        let epoch = self.store().begin_session(target.key());
        self.subscriber.sync(self.channel.as_ref(), &target.keys);
        info!(key = %target.key(), epoch, subscribed = self.subscriber.is_subscribed(), "feed mounted");
        self.current = Some(Mounted { target: target.clone(), epoch });

        self.fetcher.fetch_first(&target, epoch).await
    }

    /// Replace the push channel (connect, reconnect or disconnect) and
    /// re-register live handlers for the mounted conversation.
    pub fn set_channel(&mut self, channel: Option<Arc<dyn LiveChannel>>) {
        self.channel = channel;
        if let Some(mounted) = &self.current {
            self.subscriber.sync(self.channel.as_ref(), &mounted.target.keys);
        }
    }

    /// Leave the current conversation. Its pages stay cached for the next mount.
    pub fn unmount(&mut self) {
        self.release_current();
        self.scroll.reset();
    }

    /// Fetch the next older page for the mounted conversation.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; it is also recorded in the feed.
    pub async fn load_more(&mut self) -> Result<FetchOutcome, FeedError> {
        let Some(mounted) = self.current.clone() else {
            return Ok(FetchOutcome::Skipped);
        };
        self.fetcher.fetch_next(&mounted.target, mounted.epoch).await
    }

    /// Re-issue the first-page fetch after an error.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; it is also recorded in the feed.
    pub async fn retry(&mut self) -> Result<FetchOutcome, FeedError> {
        let Some(mounted) = self.current.clone() else {
            return Ok(FetchOutcome::Skipped);
        };
        debug!(key = %mounted.target.key(), "retrying first page");
        self.scroll.reset();
        self.fetcher.fetch_first(&mounted.target, mounted.epoch).await
    }

    /// Feed a scroll event. Returns the outcome of the older-page fetch it
    /// triggered, if any.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; it is also recorded in the feed.
    pub async fn handle_scroll<C: ScrollContainer + ?Sized>(
        &mut self,
        container: &C,
    ) -> Result<Option<FetchOutcome>, FeedError> {
        let Some(feed) = self.snapshot() else {
            return Ok(None);
        };
        let action = self.scroll.on_scroll(container, &feed);
        self.run(action).await
    }

    /// Feed a completed render. Restores the reading position after an older
    /// page landed, follows new messages near the bottom, and keeps loading
    /// while the content is too short to scroll.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; it is also recorded in the feed.
    pub async fn after_render<C: ScrollContainer + ?Sized>(
        &mut self,
        container: &mut C,
    ) -> Result<Option<FetchOutcome>, FeedError> {
        let Some(feed) = self.snapshot() else {
            return Ok(None);
        };
        let action = self.scroll.after_render(container, &feed);
        self.run(action).await
    }

    async fn run(&mut self, action: ScrollAction) -> Result<Option<FetchOutcome>, FeedError> {
        if action == ScrollAction::None {
            return Ok(None);
        }
        let outcome = self.load_more().await;
        if !matches!(outcome, Ok(FetchOutcome::Applied)) {
            self.scroll.on_load_aborted();
        }
        outcome.map(Some)
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<FeedSnapshot> {
        let mounted = self.current.as_ref()?;
        self.store().snapshot(mounted.target.key())
    }

    /// Current rendering of the mounted feed.
    #[must_use]
    pub fn view(&self) -> FeedView {
        FeedView::project(self.snapshot().as_ref())
    }

    /// Receiver that wakes on every store mutation.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.store().watch()
    }

    fn release_current(&mut self) {
        self.subscriber.clear();
        if let Some(mounted) = self.current.take() {
            self.fetcher.store().release(mounted.target.key());
            debug!(key = %mounted.target.key(), "feed released");
        }
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.release_current();
    }
}
