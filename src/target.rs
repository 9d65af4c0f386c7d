//! Conversation identity.
//!
//! DESIGN
//! ======
//! A feed is addressed by the chat id it renders. The same id derives the
//! cache key and both live event names, so the fetch side and the push side
//! always agree on which conversation they are talking about.

#[cfg(test)]
#[path = "target_test.rs"]
mod target_test;

use std::fmt;

/// Which kind of history resource backs a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A server channel; history lives under `/api/messages`.
    Channel,
    /// A direct conversation between two members; history lives under `/api/direct-messages`.
    Conversation,
}

impl ResourceKind {
    /// Path of the history endpoint for this resource kind.
    #[must_use]
    pub fn history_path(self) -> &'static str {
        match self {
            Self::Channel => "/api/messages",
            Self::Conversation => "/api/direct-messages",
        }
    }

    /// Query parameter that carries the resource id.
    #[must_use]
    pub fn param_key(self) -> &'static str {
        match self {
            Self::Channel => "channelId",
            Self::Conversation => "conversationId",
        }
    }
}

/// Cache address of one conversation feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey(String);

impl ConversationKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names under which one conversation is cached and pushed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatKeys {
    /// `chat:<chatId>`
    pub query: ConversationKey,
    /// `chat:<chatId>:messages`
    pub added: String,
    /// `chat:<chatId>:messages:update`
    pub updated: String,
}

impl ChatKeys {
    #[must_use]
    pub fn for_chat(chat_id: &str) -> Self {
        let query = format!("chat:{chat_id}");
        Self {
            added: format!("{query}:messages"),
            updated: format!("{query}:messages:update"),
            query: ConversationKey(query),
        }
    }
}

/// Everything needed to fetch and subscribe to one feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatTarget {
    pub kind: ResourceKind,
    /// Id of the channel or conversation the history endpoint filters on.
    pub resource_id: String,
    pub keys: ChatKeys,
}

impl ChatTarget {
    /// A channel feed. Channel chats use the channel id as chat id.
    #[must_use]
    pub fn channel(channel_id: impl Into<String>) -> Self {
        let resource_id = channel_id.into();
        Self { kind: ResourceKind::Channel, keys: ChatKeys::for_chat(&resource_id), resource_id }
    }

    /// A direct conversation feed. Conversation chats use the conversation id as chat id.
    #[must_use]
    pub fn conversation(conversation_id: impl Into<String>) -> Self {
        let resource_id = conversation_id.into();
        Self { kind: ResourceKind::Conversation, keys: ChatKeys::for_chat(&resource_id), resource_id }
    }

    #[must_use]
    pub fn key(&self) -> &ConversationKey {
        &self.keys.query
    }
}
