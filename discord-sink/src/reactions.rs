//! Reaction polling.
//!
//! The bot talks to Discord over REST only, so reaction callbacks are
//! synthesized: each poll lists who reacted with each voting emoji and emits
//! `Added`/`Removed` events for the difference since the previous poll.

use crate::sink::VoteEmoji;
use crate::DiscordClient;
use memebot_core::{
    ActorId, ChannelId, CoreError, ErrorExt, MessageHandle, ReactionAction, ReactionEvent,
    ReactionKind,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const VOTE_KINDS: [ReactionKind; 2] = [ReactionKind::Upvote, ReactionKind::Downvote];

/// Events that turn `previous` reactors into `current` reactors.
pub fn diff_reactors(
    message: &MessageHandle,
    kind: ReactionKind,
    previous: &HashSet<String>,
    current: &HashSet<String>,
) -> Vec<ReactionEvent> {
    let event = |actor: &String, action| ReactionEvent {
        message: message.clone(),
        kind,
        actor: ActorId(actor.clone()),
        action,
    };

    let mut added: Vec<&String> = current.difference(previous).collect();
    let mut removed: Vec<&String> = previous.difference(current).collect();
    added.sort();
    removed.sort();

    added
        .into_iter()
        .map(|actor| event(actor, ReactionAction::Added))
        .chain(
            removed
                .into_iter()
                .map(|actor| event(actor, ReactionAction::Removed)),
        )
        .collect()
}

pub struct ReactionPoller {
    client: DiscordClient,
    channel: ChannelId,
    emoji: VoteEmoji,
    seen: HashMap<(MessageHandle, ReactionKind), HashSet<String>>,
    events: mpsc::Sender<ReactionEvent>,
}

impl ReactionPoller {
    pub fn new(
        client: DiscordClient,
        channel: ChannelId,
        emoji: VoteEmoji,
        events: mpsc::Sender<ReactionEvent>,
    ) -> Self {
        Self {
            client,
            channel,
            emoji,
            seen: HashMap::new(),
            events,
        }
    }

    /// Polls the given messages once. Returns the number of events emitted.
    ///
    /// State for messages not in `messages` is dropped, so a message that
    /// stops being tracked starts from scratch if it is ever polled again.
    pub async fn poll_once(&mut self, messages: &[MessageHandle]) -> Result<usize, CoreError> {
        let wanted: HashSet<&MessageHandle> = messages.iter().collect();
        self.seen.retain(|(message, _), _| wanted.contains(message));

        let mut emitted = 0;
        for message in messages {
            for kind in VOTE_KINDS {
                let Some(emoji) = self.emoji.emoji_for(kind) else {
                    continue;
                };

                let users = match self.client.reaction_users(self.channel, message, emoji).await {
                    Ok(users) => users,
                    Err(e) if e.is_retryable() => return Err(e),
                    Err(e) => {
                        // Deleted messages and missing permissions only affect this message.
                        warn!("Skipping reactions on {}: {}", message, e);
                        continue;
                    }
                };

                let current: HashSet<String> = users.into_iter().map(|u| u.id).collect();
                let previous = self
                    .seen
                    .remove(&(message.clone(), kind))
                    .unwrap_or_default();

                for event in diff_reactors(message, kind, &previous, &current) {
                    if self.events.send(event).await.is_err() {
                        return Err(CoreError::Internal {
                            message: "reaction event receiver dropped".to_string(),
                        });
                    }
                    emitted += 1;
                }
                self.seen.insert((message.clone(), kind), current);
            }
        }

        debug!(
            "Polled reactions on {} messages, {} events",
            messages.len(),
            emitted
        );
        Ok(emitted)
    }

    /// Polls every `period` until shutdown. `tracked` supplies the messages
    /// to look at on each pass.
    pub async fn run<F, Fut>(
        mut self,
        period: Duration,
        tracked: F,
        mut shutdown: watch::Receiver<bool>,
    ) where
        F: Fn() -> Fut,
        Fut: Future<Output = Vec<MessageHandle>>,
    {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Started reaction poller (every {:?})", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let messages = tracked().await;
                    if messages.is_empty() {
                        continue;
                    }
                    match self.poll_once(&messages).await {
                        Ok(_) => {}
                        Err(CoreError::Internal { message }) => {
                            warn!("Reaction poller stopping: {}", message);
                            break;
                        }
                        Err(e) => {
                            e.log_warn();
                            if let Some(wait) = e.retry_after() {
                                tokio::time::sleep(wait).await;
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Reaction poller stopped");
    }
}
