//! Chat feed synchronization.
//!
//! ARCHITECTURE
//! ============
//! A conversation feed is fed by two independent sources: cursor-paginated
//! history fetches and a live push channel carrying "added"/"updated" events.
//! Both funnel into one keyed store (`cache`), which is the only writer of
//! feed state. Everything else reads from it:
//!
//! - `fetcher` issues backward page requests and writes through the store.
//! - `subscriber` registers live handlers and writes through the store.
//! - `scroll` decides when to ask for older history and keeps the viewport
//!   anchored while it lands.
//! - `render` projects the stored pages into display order.
//! - `session` wires the pieces together for one mounted view.
//!
//! Mutations are short synchronous critical sections; no lock is held across
//! an await point.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod message;
pub mod render;
pub mod scroll;
pub mod session;
pub mod subscriber;
pub mod target;

pub use cache::{FeedSnapshot, FeedStore, FetchStatus};
pub use config::FeedConfig;
pub use error::{ErrorCode, FeedError};
pub use fetcher::{FetchOutcome, HistoryEndpoint, HttpHistoryEndpoint, PageFetcher};
pub use message::{Cursor, Member, MemberRole, Message, Page, Profile};
pub use render::{FeedHeader, FeedItem, FeedView};
pub use scroll::{ScrollAction, ScrollContainer, ScrollController};
pub use session::FeedSession;
pub use subscriber::{LiveChannel, LiveSubscriber, LocalChannel};
pub use target::{ChatKeys, ChatTarget, ConversationKey, ResourceKind};
