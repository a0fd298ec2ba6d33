use chrono::{DateTime, Utc};
use memebot_core::{ActorId, MessageHandle, PostMessage, ReactionAction, ReactionEvent, ReactionKind};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub handle: MessageHandle,
    pub score: i64,
    pub snapshot: PostMessage,
    pub posted_at: DateTime<Utc>,
}

/// Highest-scored post of the current period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BestOfPeriod {
    pub score: i64,
    pub message: Option<MessageHandle>,
    pub snapshot: Option<PostMessage>,
}

impl BestOfPeriod {
    pub fn is_empty(&self) -> bool {
        self.message.is_none()
    }
}

#[derive(Debug, Default)]
struct VoteBoard {
    posts: HashMap<MessageHandle, PostedMessage>,
    order: Vec<MessageHandle>,
    best: BestOfPeriod,
}

/// Scores for the bot's own posts. Every mutation goes through one lock.
#[derive(Debug)]
pub struct VoteTracker {
    bot: ActorId,
    board: Mutex<VoteBoard>,
}

impl VoteTracker {
    pub fn new(bot: ActorId) -> Self {
        Self {
            bot,
            board: Mutex::new(VoteBoard::default()),
        }
    }

    /// Starts tracking a freshly published message at score 0.
    pub async fn register(&self, handle: MessageHandle, snapshot: PostMessage) {
        let mut board = self.board.lock().await;
        if board.posts.contains_key(&handle) {
            return;
        }
        board.order.push(handle.clone());
        board.posts.insert(
            handle.clone(),
            PostedMessage {
                handle,
                score: 0,
                snapshot,
                posted_at: Utc::now(),
            },
        );
    }

    pub async fn on_reaction_added(
        &self,
        message: &MessageHandle,
        kind: ReactionKind,
        actor: &ActorId,
    ) -> Option<i64> {
        self.apply(message, kind.weight(), actor).await
    }

    pub async fn on_reaction_removed(
        &self,
        message: &MessageHandle,
        kind: ReactionKind,
        actor: &ActorId,
    ) -> Option<i64> {
        self.apply(message, -kind.weight(), actor).await
    }

    pub async fn handle_event(&self, event: &ReactionEvent) -> Option<i64> {
        match event.action {
            ReactionAction::Added => {
                self.on_reaction_added(&event.message, event.kind, &event.actor)
                    .await
            }
            ReactionAction::Removed => {
                self.on_reaction_removed(&event.message, event.kind, &event.actor)
                    .await
            }
        }
    }

    /// Returns the new score, or `None` when the event was ignored.
    async fn apply(&self, message: &MessageHandle, delta: i64, actor: &ActorId) -> Option<i64> {
        if delta == 0 || *actor == self.bot {
            return None;
        }

        let mut board = self.board.lock().await;
        let post = board.posts.get_mut(message)?;
        post.score += delta;

        let score = post.score;
        let snapshot = post.snapshot.clone();
        debug!("Message {} now scores {}", message, score);

        if score > board.best.score {
            info!(
                "New best of period: {} with score {} ({})",
                message, score, snapshot.title
            );
            board.best = BestOfPeriod {
                score,
                message: Some(message.clone()),
                snapshot: Some(snapshot),
            };
        }
        Some(score)
    }

    pub async fn score(&self, message: &MessageHandle) -> Option<i64> {
        self.board.lock().await.posts.get(message).map(|p| p.score)
    }

    pub async fn best(&self) -> BestOfPeriod {
        self.board.lock().await.best.clone()
    }

    pub async fn tracked_count(&self) -> usize {
        self.board.lock().await.posts.len()
    }

    /// The `limit` most recently registered messages, oldest first.
    pub async fn recent_messages(&self, limit: usize) -> Vec<MessageHandle> {
        let board = self.board.lock().await;
        let skip = board.order.len().saturating_sub(limit);
        board.order[skip..].to_vec()
    }

    /// Forgets every tracked message and the best-of record.
    pub async fn reset(&self) {
        let mut board = self.board.lock().await;
        let dropped = board.posts.len();
        *board = VoteBoard::default();
        info!("Vote period reset, dropped {} tracked posts", dropped);
    }

    pub fn bot_identity(&self) -> &ActorId {
        &self.bot
    }
}
