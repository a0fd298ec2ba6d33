use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A piece of content offered by a feed, before dedup filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateItem {
    pub id: String,
    pub content_url: String,
    pub is_explicit: bool,
    pub is_pinned: bool,
    pub source_category: String,
    pub title: String,
    pub permalink: String,
    pub score: i64,
    pub num_comments: u64,
}

/// Target channel on the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle for a message the sink has published.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle(pub String);

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of whoever placed a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionKind {
    Upvote,
    Downvote,
    Other,
}

impl ReactionKind {
    /// Score change when a reaction of this kind is added.
    pub fn weight(self) -> i64 {
        match self {
            ReactionKind::Upvote => 1,
            ReactionKind::Downvote => -1,
            ReactionKind::Other => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionAction {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub message: MessageHandle,
    pub kind: ReactionKind,
    pub actor: ActorId,
    pub action: ReactionAction,
}

/// A formatted post, ready for the channel sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostMessage {
    pub title: String,
    pub url: String,
    pub image_url: String,
    pub color: u32,
    pub footer: String,
    pub timestamp: DateTime<Utc>,
}
