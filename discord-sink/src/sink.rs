use crate::api::DiscordClient;
use memebot_core::{
    ActorId, ChannelId, ChannelSink, CoreError, MessageHandle, PostMessage, ReactionKind,
    VoteConfig,
};
use tracing::{debug, info};

/// The two emoji used as voting affordances.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteEmoji {
    pub upvote: String,
    pub downvote: String,
}

impl VoteEmoji {
    pub fn from_config(config: &VoteConfig) -> Self {
        Self {
            upvote: config.upvote_emoji.clone(),
            downvote: config.downvote_emoji.clone(),
        }
    }

    pub fn emoji_for(&self, kind: ReactionKind) -> Option<&str> {
        match kind {
            ReactionKind::Upvote => Some(&self.upvote),
            ReactionKind::Downvote => Some(&self.downvote),
            ReactionKind::Other => None,
        }
    }

    pub fn kind_of(&self, emoji: &str) -> ReactionKind {
        if emoji == self.upvote {
            ReactionKind::Upvote
        } else if emoji == self.downvote {
            ReactionKind::Downvote
        } else {
            ReactionKind::Other
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscordSink {
    client: DiscordClient,
    emoji: VoteEmoji,
    bot_user: ActorId,
}

impl DiscordSink {
    /// Resolves the bot's own user id so its reactions can be told apart.
    pub async fn connect(client: DiscordClient, emoji: VoteEmoji) -> Result<Self, CoreError> {
        let me = client.current_user().await?;
        info!("Logged in to Discord as {} (ID: {})", me.username, me.id);
        Ok(Self::with_identity(client, emoji, ActorId(me.id)))
    }

    pub fn with_identity(client: DiscordClient, emoji: VoteEmoji, bot_user: ActorId) -> Self {
        Self {
            client,
            emoji,
            bot_user,
        }
    }

    pub fn client(&self) -> &DiscordClient {
        &self.client
    }

    pub fn emoji(&self) -> &VoteEmoji {
        &self.emoji
    }
}

impl ChannelSink for DiscordSink {
    async fn send(
        &self,
        channel: ChannelId,
        message: &PostMessage,
    ) -> Result<MessageHandle, CoreError> {
        let handle = self.client.send_post(channel, message).await?;
        debug!("Sent message {} to channel {}", handle, channel);
        Ok(handle)
    }

    async fn add_vote_affordance(
        &self,
        channel: ChannelId,
        message: &MessageHandle,
        kind: ReactionKind,
    ) -> Result<(), CoreError> {
        match self.emoji.emoji_for(kind) {
            Some(emoji) => self.client.add_reaction(channel, message, emoji).await,
            None => Ok(()),
        }
    }

    fn bot_identity(&self) -> ActorId {
        self.bot_user.clone()
    }
}
