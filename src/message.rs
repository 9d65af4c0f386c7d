//! Feed data model.
//!
//! DESIGN
//! ======
//! Messages arrive from two places (history pages and live events) in the
//! same camelCase JSON shape. Identity is the opaque `id`; two payloads with
//! the same id are the same message and the later one wins.

#[cfg(test)]
#[path = "message_test.rs"]
mod message_test;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// =============================================================================
// AUTHOR
// =============================================================================

/// Member role within the server that owns the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberRole {
    Admin,
    Moderator,
    Guest,
}

/// Public profile of the user behind a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Server membership that authored a message, with its embedded profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub role: MemberRole,
    pub profile_id: String,
    pub profile: Profile,
}

// =============================================================================
// MESSAGE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Text body. Deleted messages keep a placeholder or no text at all.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    pub member_id: String,
    pub member: Member,
    #[serde(default)]
    pub deleted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Message {
    /// True once the message has been modified after creation.
    #[must_use]
    pub fn is_edited(&self) -> bool {
        self.updated_at != self.created_at
    }
}

// =============================================================================
// PAGE
// =============================================================================

/// Opaque token naming where the next backward fetch resumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One fetch result: messages newest-first plus the cursor of the next-older page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<Message>,
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
}

impl Page {
    #[must_use]
    pub fn new(items: Vec<Message>, next_cursor: Option<Cursor>) -> Self {
        Self { items, next_cursor }
    }

    /// A cursorless page holding one message, used when a live insert lands before any fetch.
    #[must_use]
    pub fn single(message: Message) -> Self {
        Self { items: vec![message], next_cursor: None }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
