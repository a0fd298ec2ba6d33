use crate::dedup::DedupCache;
use crate::scheduler::SchedulerState;
use crate::votes::VoteTracker;
use chrono::{DateTime, Utc};
use memebot_core::{ActorId, ChannelId, CoreError, FeedConfig};
use tokio::sync::Mutex;
use tracing::info;

/// Everything the feed poster mutates, owned in one place and shared by
/// reference between the loops, the reaction handler and the console.
#[derive(Debug)]
pub struct FeedPosterState {
    pub dedup: Mutex<DedupCache>,
    pub scheduler: Mutex<SchedulerState>,
    pub votes: VoteTracker,
    pub feed: FeedConfig,
    pub channel: ChannelId,
    pub started_at: DateTime<Utc>,
}

impl FeedPosterState {
    pub fn new(dedup: DedupCache, feed: FeedConfig, channel: ChannelId, bot: ActorId) -> Self {
        Self {
            dedup: Mutex::new(dedup),
            scheduler: Mutex::new(SchedulerState::default()),
            votes: VoteTracker::new(bot),
            feed,
            channel,
            started_at: Utc::now(),
        }
    }

    /// Loads the dedup cache named in `feed` and builds the state around it.
    pub async fn load(feed: FeedConfig, channel: ChannelId, bot: ActorId) -> Self {
        let dedup = DedupCache::load(feed.cache_path.clone(), feed.cache_capacity).await;
        Self::new(dedup, feed, channel, bot)
    }

    /// Final persist on graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        let dedup = self.dedup.lock().await;
        dedup.persist().await?;
        info!("Saved {} cached post IDs on shutdown", dedup.len());
        Ok(())
    }
}
