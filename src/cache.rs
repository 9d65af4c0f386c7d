//! Cache synchronizer: the keyed store of conversation feeds.
//!
//! DESIGN
//! ======
//! `FeedCache` holds one `FeedState` per conversation and implements every
//! merge rule as a plain `&mut self` method, so the rules are testable without
//! a runtime. `FeedStore` wraps it in `Arc<RwLock<_>>` and is the handle that
//! fetchers, subscribers and views share. Each write bumps a revision on a
//! `watch` channel so observers can wait for changes instead of polling.
//!
//! Merge rules:
//! - first fetch seeds (replaces) the page collection with one page
//! - follow-up fetches append an older page at the tail, no cross-page dedup
//! - live "added" prepends to the newest page (index 0), trusting arrival order
//! - live "updated" replaces every entry with the matching id in place, or
//!   is dropped
//!
//! TRADE-OFFS
//! ==========
//! Appends target the tail and live inserts target the head, so history
//! fetches and live events can interleave freely. Inside the live stream,
//! delivery is trusted to be in order and exactly once: a repeated "added"
//! event duplicates the message here, and the renderer collapses it by id.
//!
//! Every entry carries a session epoch. Fetches record the epoch they were
//! issued under, and results arriving after the conversation was released or
//! remounted are discarded. A first-page fetch is refused while an older
//! page is in flight, so a seed never lands between a cursor being read and
//! its page being appended.
//!
//! LRU eviction skips conversations with a live view session. The cache may
//! run over capacity while every entry is mounted.

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::message::{Cursor, Message, Page};
use crate::target::ConversationKey;

// =============================================================================
// FEED STATE
// =============================================================================

/// Fetch lifecycle of a feed as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// No data yet; the first page is being fetched.
    Pending,
    Success,
    /// The last fetch failed. Terminal for the view until a retry.
    Error,
}

/// Synchronized state of one conversation feed.
#[derive(Debug, Clone)]
pub struct FeedState {
    /// Newest page first; within a page, newest message first.
    pages: Vec<Page>,
    status: FetchStatus,
    fetching_first: bool,
    fetching_more: bool,
    error: Option<FeedError>,
    epoch: u64,
    /// A view session currently shows this feed.
    mounted: bool,
}

impl FeedState {
    fn new(epoch: u64) -> Self {
        Self {
            pages: Vec::new(),
            status: FetchStatus::Pending,
            fetching_first: false,
            fetching_more: false,
            error: None,
            epoch,
            mounted: false,
        }
    }

    fn seed(&mut self, page: Page) {
        self.pages = vec![page];
    }

    fn append_older(&mut self, page: Page) {
        self.pages.push(page);
    }

    fn insert_live(&mut self, message: Message) {
        match self.pages.first_mut() {
            Some(newest) => newest.items.insert(0, message),
            None => {
                self.pages.push(Page::single(message));
                if self.status == FetchStatus::Pending {
                    self.status = FetchStatus::Success;
                }
            }
        }
    }

    /// Every copy of the id is replaced; duplicates must not keep stale attributes.
    fn replace_live(&mut self, message: Message) -> bool {
        let mut replaced = false;
        for slot in self.pages.iter_mut().flat_map(|page| page.items.iter_mut()) {
            if slot.id == message.id {
                slot.clone_from(&message);
                replaced = true;
            }
        }
        replaced
    }

    /// Cursor of the oldest loaded page, if more history exists.
    #[must_use]
    pub fn next_cursor(&self) -> Option<&Cursor> {
        self.pages.last().and_then(|page| page.next_cursor.as_ref())
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.next_cursor().is_some()
    }

    #[must_use]
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    #[must_use]
    pub fn status(&self) -> FetchStatus {
        self.status
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.pages.iter().map(Page::len).sum()
    }

    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            pages: self.pages.clone(),
            status: self.status,
            has_more: self.has_more(),
            is_fetching: self.fetching_first || self.fetching_more,
            fetching_more: self.fetching_more,
            error: self.error.clone(),
        }
    }
}

/// Read-only copy of a feed handed to views and the scroll controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub pages: Vec<Page>,
    pub status: FetchStatus,
    /// More history is available behind the oldest page.
    pub has_more: bool,
    /// Any fetch is in flight.
    pub is_fetching: bool,
    /// A follow-up (older page) fetch is in flight.
    pub fetching_more: bool,
    pub error: Option<FeedError>,
}

impl FeedSnapshot {
    /// Number of messages in the newest page.
    #[must_use]
    pub fn newest_page_len(&self) -> usize {
        self.pages.first().map_or(0, Page::len)
    }
}

// =============================================================================
// MERGE OUTCOME
// =============================================================================

/// Result of applying a fetch completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Applied,
    /// The result belonged to a session that is no longer current.
    Stale,
}

// =============================================================================
// FEED CACHE
// =============================================================================

/// Keyed feed states with least-recently-used eviction.
#[derive(Debug)]
pub struct FeedCache {
    entries: HashMap<ConversationKey, FeedState>,
    /// Least recently used first.
    recency: VecDeque<ConversationKey>,
    capacity: usize,
    next_epoch: u64,
}

impl FeedCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), recency: VecDeque::new(), capacity: capacity.max(1), next_epoch: 1 }
    }

    #[must_use]
    pub fn get(&self, key: &ConversationKey) -> Option<&FeedState> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.entries.contains_key(key)
    }

    fn take_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    fn touch(&mut self, key: &ConversationKey) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        self.recency.push_back(key.clone());
    }

    /// Fetch or create the entry for `key`, marking it most recently used.
    fn entry(&mut self, key: &ConversationKey) -> &mut FeedState {
        if !self.entries.contains_key(key) {
            self.make_room();
        }
        self.touch(key);
        let next_epoch = &mut self.next_epoch;
        self.entries.entry(key.clone()).or_insert_with(|| {
            let epoch = *next_epoch;
            *next_epoch += 1;
            FeedState::new(epoch)
        })
    }

    fn make_room(&mut self) {
        while self.entries.len() >= self.capacity {
            let entries = &self.entries;
            let Some(pos) = self.recency.iter().position(|k| !entries.get(k).is_some_and(|s| s.mounted)) else {
                debug!(len = self.entries.len(), capacity = self.capacity, "every feed mounted; over capacity");
                break;
            };
            if let Some(victim) = self.recency.remove(pos) {
                self.entries.remove(&victim);
                debug!(key = %victim, "feed evicted (lru)");
            }
        }
    }

    /// Drop a conversation from the cache. Returns whether it was present.
    pub fn evict(&mut self, key: &ConversationKey) -> bool {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        self.entries.remove(key).is_some()
    }

    /// Start a view session for `key`: create the entry if needed, invalidate
    /// in-flight fetches from earlier sessions, and return the new epoch.
    pub fn begin_session(&mut self, key: &ConversationKey) -> u64 {
        let epoch = self.take_epoch();
        let state = self.entry(key);
        state.epoch = epoch;
        state.mounted = true;
        state.fetching_first = false;
        state.fetching_more = false;
        epoch
    }

    /// End the current view session. Cached pages stay for the next mount;
    /// results of fetches still in flight will be discarded.
    pub fn release(&mut self, key: &ConversationKey) {
        let epoch = self.take_epoch();
        if let Some(state) = self.entries.get_mut(key) {
            state.epoch = epoch;
            state.mounted = false;
            state.fetching_first = false;
            state.fetching_more = false;
        }
    }

    fn current(&mut self, key: &ConversationKey, epoch: u64) -> Option<&mut FeedState> {
        self.entries.get_mut(key).filter(|state| state.epoch == epoch)
    }

    /// Mark the first-page fetch as in flight. Returns `false` if the session
    /// is stale or any fetch is already running.
    pub fn begin_first_fetch(&mut self, key: &ConversationKey, epoch: u64) -> bool {
        let Some(state) = self.current(key, epoch) else {
            return false;
        };
        if state.fetching_first || state.fetching_more {
            return false;
        }
        state.fetching_first = true;
        state.error = None;
        state.status = if state.pages.is_empty() { FetchStatus::Pending } else { FetchStatus::Success };
        true
    }

    /// Apply the first-page result: seed on success, error state on failure.
    pub fn complete_first_fetch(
        &mut self,
        key: &ConversationKey,
        epoch: u64,
        result: Result<Page, FeedError>,
    ) -> Merge {
        let Some(state) = self.current(key, epoch) else {
            debug!(%key, epoch, "discarding stale first page");
            return Merge::Stale;
        };
        state.fetching_first = false;
        match result {
            Ok(page) => {
                info!(%key, items = page.len(), has_more = page.next_cursor.is_some(), "feed seeded");
                state.seed(page);
                state.status = FetchStatus::Success;
            }
            Err(e) => {
                warn!(%key, error = %e, "first page fetch failed");
                state.status = FetchStatus::Error;
                state.error = Some(e);
            }
        }
        Merge::Applied
    }

    /// Mark a follow-up fetch as in flight and return the cursor to fetch
    /// with. Returns `None` if the session is stale, the feed is not loaded,
    /// any fetch is already running, or history is exhausted.
    pub fn begin_next_fetch(&mut self, key: &ConversationKey, epoch: u64) -> Option<Cursor> {
        let state = self.current(key, epoch)?;
        if state.status != FetchStatus::Success || state.fetching_first || state.fetching_more {
            return None;
        }
        let cursor = state.next_cursor()?.clone();
        state.fetching_more = true;
        Some(cursor)
    }

    /// Apply a follow-up result: append the older page on success, error state on failure.
    pub fn complete_next_fetch(
        &mut self,
        key: &ConversationKey,
        epoch: u64,
        result: Result<Page, FeedError>,
    ) -> Merge {
        let Some(state) = self.current(key, epoch) else {
            debug!(%key, epoch, "discarding stale older page");
            return Merge::Stale;
        };
        state.fetching_more = false;
        match result {
            Ok(page) => {
                debug!(%key, items = page.len(), has_more = page.next_cursor.is_some(), "older page appended");
                state.append_older(page);
            }
            Err(e) => {
                warn!(%key, error = %e, "older page fetch failed");
                state.status = FetchStatus::Error;
                state.error = Some(e);
            }
        }
        Merge::Applied
    }

    /// Live "added": prepend to the newest page, creating the feed if needed.
    pub fn insert_live(&mut self, key: &ConversationKey, message: Message) {
        self.entry(key).insert_live(message);
    }

    /// Live "updated": replace the entry with the same id in place.
    /// Returns `false` (and changes nothing) when no loaded page holds it.
    pub fn replace_live(&mut self, key: &ConversationKey, message: Message) -> bool {
        let Some(state) = self.entries.get_mut(key) else {
            debug!(%key, id = %message.id, "update for uncached feed dropped");
            return false;
        };
        let id = message.id.clone();
        let replaced = state.replace_live(message);
        if !replaced {
            debug!(%key, %id, "update for unknown message dropped");
        }
        replaced
    }

    #[must_use]
    pub fn snapshot(&self, key: &ConversationKey) -> Option<FeedSnapshot> {
        self.entries.get(key).map(FeedState::snapshot)
    }
}

// =============================================================================
// FEED STORE
// =============================================================================

/// Shared handle to the feed cache.
///
/// Clone is cheap; every clone addresses the same cache. Locks are only held
/// for the duration of one merge and never across an await point.
#[derive(Clone, Debug)]
pub struct FeedStore {
    inner: Arc<RwLock<FeedCache>>,
    revision: Arc<watch::Sender<u64>>,
}

impl FeedStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (revision, _) = watch::channel(0);
        Self { inner: Arc::new(RwLock::new(FeedCache::new(capacity))), revision: Arc::new(revision) }
    }

    /// Run a mutation under the write lock and notify observers.
    pub fn write<R>(&self, f: impl FnOnce(&mut FeedCache) -> R) -> R {
        let out = {
            let mut cache = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut cache)
        };
        self.revision.send_modify(|rev| *rev += 1);
        out
    }

    /// Run a read under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&FeedCache) -> R) -> R {
        let cache = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&cache)
    }

    /// Receiver that observes a new revision after every mutation.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    #[must_use]
    pub fn snapshot(&self, key: &ConversationKey) -> Option<FeedSnapshot> {
        self.read(|cache| cache.snapshot(key))
    }

    pub fn begin_session(&self, key: &ConversationKey) -> u64 {
        self.write(|cache| cache.begin_session(key))
    }

    pub fn release(&self, key: &ConversationKey) {
        self.write(|cache| cache.release(key));
    }

    pub fn evict(&self, key: &ConversationKey) -> bool {
        self.write(|cache| cache.evict(key))
    }

    pub fn insert_live(&self, key: &ConversationKey, message: Message) {
        self.write(|cache| cache.insert_live(key, message));
    }

    pub fn replace_live(&self, key: &ConversationKey, message: Message) -> bool {
        self.write(|cache| cache.replace_live(key, message))
    }
}
