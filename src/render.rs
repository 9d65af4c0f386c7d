//! Feed renderer: a pure projection of a feed snapshot.
//!
//! Pages are stored newest-first with newest-first items. The view reads
//! oldest-first, newest at the bottom, so pages are walked in reverse and
//! each page's items from the back.

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;

use std::collections::HashSet;

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::cache::{FeedSnapshot, FetchStatus};
use crate::message::{MemberRole, Message, Page};

/// `d MMM yyyy, HH:mm`, e.g. `1 Mar 2024, 10:15`.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[day padding:none] [month repr:short] [year], [hour]:[minute]");

pub const ERROR_TEXT: &str = "Something went wrong!";
pub const LOADING_TEXT: &str = "Loading messages...";

/// What sits above the oldest rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHeader {
    /// History is exhausted; show the start-of-conversation welcome.
    Welcome,
    /// An older page is being fetched.
    LoadingOlder,
    /// More history exists; offer a manual "load previous messages" action.
    LoadOlderButton,
}

/// One rendered row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
    pub author_name: String,
    pub author_role: MemberRole,
    pub author_image_url: Option<String>,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub deleted: bool,
    pub edited: bool,
    pub timestamp: String,
}

impl FeedItem {
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            author_name: message.member.profile.name.clone(),
            author_role: message.member.role,
            author_image_url: message.member.profile.image_url.clone(),
            content: message.content.clone(),
            file_url: message.file_url.clone(),
            deleted: message.deleted,
            edited: message.is_edited(),
            timestamp: format_timestamp(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedView {
    Loading { message: &'static str },
    Error { message: &'static str },
    Ready { header: FeedHeader, items: Vec<FeedItem> },
}

impl FeedView {
    /// Project a snapshot. A missing snapshot renders as loading.
    #[must_use]
    pub fn project(feed: Option<&FeedSnapshot>) -> Self {
        let Some(feed) = feed else {
            return Self::Loading { message: LOADING_TEXT };
        };
        match feed.status {
            FetchStatus::Pending => Self::Loading { message: LOADING_TEXT },
            FetchStatus::Error => Self::Error { message: ERROR_TEXT },
            FetchStatus::Success => Self::Ready {
                header: header(feed),
                items: display_order(&feed.pages).into_iter().map(FeedItem::from_message).collect(),
            },
        }
    }
}

fn header(feed: &FeedSnapshot) -> FeedHeader {
    match (feed.has_more, feed.fetching_more) {
        (false, _) => FeedHeader::Welcome,
        (true, true) => FeedHeader::LoadingOlder,
        (true, false) => FeedHeader::LoadOlderButton,
    }
}

/// Messages oldest-first, duplicate ids collapsed to their first occurrence.
/// Live updates rewrite every copy of an id, so the kept copy is current.
#[must_use]
pub fn display_order(pages: &[Page]) -> Vec<&Message> {
    let mut seen = HashSet::new();
    pages
        .iter()
        .rev()
        .flat_map(|page| page.items.iter().rev())
        .filter(|message| seen.insert(message.id.as_str()))
        .collect()
}

fn format_timestamp(message: &Message) -> String {
    message.created_at.format(TIMESTAMP_FORMAT).unwrap_or_else(|_| message.created_at.to_string())
}
