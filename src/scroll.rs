//! Scroll controller for the feed viewport.
//!
//! DESIGN
//! ======
//! Two phases, `Idle` and `LoadingMore`. Crossing the near-top threshold
//! while idle, with more history available and no fetch in flight, moves to
//! `LoadingMore` and asks the caller to fetch the next older page. The
//! controller records the scroll height and offset at that moment; once the
//! older page has been rendered it restores the offset by the height delta so
//! the viewport does not jump.
//!
//! After each render it also:
//! - pulls the viewport to the bottom on first content and when the newest
//!   page grows while the reader is near the bottom
//! - during the initial fill, requests older history while the content is
//!   too short to scroll; the fill ends the first time the content overflows
//!   the viewport, and later short renders do not trigger loads
//!
//! The container is read and positioned through `ScrollContainer`; the
//! controller never owns it and never touches feed state.

#[cfg(test)]
#[path = "scroll_test.rs"]
mod scroll_test;

use crate::cache::FeedSnapshot;
use crate::config::ScrollConfig;

/// Read/position access to the scrollable feed element.
pub trait ScrollContainer {
    /// Current offset from the top of the content.
    fn scroll_top(&self) -> f64;
    /// Total content height.
    fn scroll_height(&self) -> f64;
    /// Visible viewport height.
    fn client_height(&self) -> f64;
    fn set_scroll_top(&mut self, top: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPhase {
    Idle,
    LoadingMore,
}

/// What the caller should do after feeding the controller an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ScrollAction {
    None,
    /// Fetch the next older page.
    LoadMore,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    scroll_height: f64,
    scroll_top: f64,
}

#[derive(Debug, Clone)]
pub struct ScrollController {
    config: ScrollConfig,
    phase: ScrollPhase,
    anchor: Option<Anchor>,
    /// Whether the initial jump to the bottom has happened.
    initialized: bool,
    /// Newest-page length at the last render.
    newest_len: usize,
    /// Still auto-filling a viewport the content has never overflowed.
    filling: bool,
}

impl ScrollController {
    #[must_use]
    pub fn new(config: ScrollConfig) -> Self {
        Self { config, phase: ScrollPhase::Idle, anchor: None, initialized: false, newest_len: 0, filling: true }
    }

    #[must_use]
    pub fn phase(&self) -> ScrollPhase {
        self.phase
    }

    /// Forget everything; used when the view switches conversation.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    /// React to a scroll event.
    pub fn on_scroll<C: ScrollContainer + ?Sized>(&mut self, container: &C, feed: &FeedSnapshot) -> ScrollAction {
        if container.scroll_top() > self.config.near_top_threshold {
            return ScrollAction::None;
        }
        self.request_more(container, feed)
    }

    /// React to a render of new feed content. Call after every commit.
    pub fn after_render<C: ScrollContainer + ?Sized>(&mut self, container: &mut C, feed: &FeedSnapshot) -> ScrollAction {
        if self.phase == ScrollPhase::LoadingMore && !feed.fetching_more {
            self.on_load_finished(container);
        }

        let newest_len = feed.newest_page_len();
        if newest_len != self.newest_len {
            self.newest_len = newest_len;
            if self.should_stick_to_bottom(container) {
                let bottom = (container.scroll_height() - container.client_height()).max(0.0);
                container.set_scroll_top(bottom);
            }
        }

        if self.filling {
            if container.scroll_height() <= container.client_height() {
                return self.request_more(container, feed);
            }
            self.filling = false;
        }
        ScrollAction::None
    }

    /// The older page has been rendered (or its fetch failed): restore the
    /// reading position and go idle.
    pub fn on_load_finished<C: ScrollContainer + ?Sized>(&mut self, container: &mut C) {
        if let Some(anchor) = self.anchor.take() {
            let grown = container.scroll_height() - anchor.scroll_height;
            container.set_scroll_top((anchor.scroll_top + grown).max(0.0));
        }
        self.phase = ScrollPhase::Idle;
    }

    /// The requested fetch was never issued; go idle without moving.
    pub fn on_load_aborted(&mut self) {
        self.anchor = None;
        self.phase = ScrollPhase::Idle;
    }

    fn request_more<C: ScrollContainer + ?Sized>(&mut self, container: &C, feed: &FeedSnapshot) -> ScrollAction {
        if self.phase != ScrollPhase::Idle || !feed.has_more || feed.is_fetching {
            return ScrollAction::None;
        }
        self.anchor = Some(Anchor { scroll_height: container.scroll_height(), scroll_top: container.scroll_top() });
        self.phase = ScrollPhase::LoadingMore;
        ScrollAction::LoadMore
    }

    fn should_stick_to_bottom<C: ScrollContainer + ?Sized>(&mut self, container: &C) -> bool {
        if !self.initialized {
            self.initialized = true;
            return true;
        }
        let distance = container.scroll_height() - container.scroll_top() - container.client_height();
        distance <= self.config.auto_scroll_distance
    }
}
