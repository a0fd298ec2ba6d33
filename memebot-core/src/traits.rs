use crate::{ActorId, CandidateItem, ChannelId, CoreError, MessageHandle, PostMessage, ReactionKind};
use std::future::Future;

/// A feed that hands out candidate items for one category at a time.
///
/// Every error is treated as transient by callers: the attempt is dropped and
/// retried later, never propagated to the scheduler.
pub trait ContentSource: Send + Sync {
    fn fetch_candidates(
        &self,
        category: &str,
        explicit_allowed: bool,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<CandidateItem>, CoreError>> + Send;
}

/// Publishing side of the chat platform.
pub trait ChannelSink: Send + Sync {
    fn send(
        &self,
        channel: ChannelId,
        message: &PostMessage,
    ) -> impl Future<Output = Result<MessageHandle, CoreError>> + Send;

    /// Places the reaction users click to vote on a message.
    fn add_vote_affordance(
        &self,
        channel: ChannelId,
        message: &MessageHandle,
        kind: ReactionKind,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// The actor the sink posts as; its reactions never count as votes.
    fn bot_identity(&self) -> ActorId;
}
