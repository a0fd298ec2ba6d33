use crate::selector::ItemSelector;
use crate::state::FeedPosterState;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use memebot_core::{
    CandidateItem, ChannelId, ChannelSink, ContentSource, ErrorExt, ErrorReporter,
    MessageHandle, PostMessage, ReactionKind,
};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

const MAX_TITLE_CHARS: usize = 250;

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Posted {
        handle: MessageHandle,
        title: String,
    },
    NothingEligible,
    Failed(String),
}

impl PublishOutcome {
    pub fn is_posted(&self) -> bool {
        matches!(self, PublishOutcome::Posted { .. })
    }
}

/// Rewrites a `.gifv` path (any case) to `.gif`, keeping query and fragment.
/// Other URLs pass through untouched.
pub fn embeddable_image_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let path = url.path();
    if !path.to_ascii_lowercase().ends_with(".gifv") {
        return raw.to_string();
    }
    let stem = path[..path.len() - ".gifv".len()].to_string();
    url.set_path(&format!("{}.gif", stem));
    url.to_string()
}

/// Builds the channel message for an item.
pub fn format_post(item: &CandidateItem, color: u32, now: DateTime<Utc>) -> PostMessage {
    let image_url = embeddable_image_url(&item.content_url);

    PostMessage {
        title: item.title.chars().take(MAX_TITLE_CHARS).collect(),
        url: item.permalink.clone(),
        image_url,
        color,
        footer: format!(
            "👍 {} | 💬 {} | r/{}",
            item.score, item.num_comments, item.source_category
        ),
        timestamp: now,
    }
}

pub struct Publisher<S, C> {
    selector: ItemSelector<S>,
    sink: C,
    state: Arc<FeedPosterState>,
    reporter: ErrorReporter,
}

impl<S: ContentSource, C: ChannelSink> Publisher<S, C> {
    pub fn new(selector: ItemSelector<S>, sink: C, state: Arc<FeedPosterState>) -> Self {
        Self {
            selector,
            sink,
            state,
            reporter: ErrorReporter::new(),
        }
    }

    pub fn state(&self) -> &Arc<FeedPosterState> {
        &self.state
    }

    pub fn sink(&self) -> &C {
        &self.sink
    }

    /// Selects, sends and registers one post. `false` means the caller
    /// should back off.
    pub async fn publish(&self, channel: ChannelId) -> bool {
        self.publish_outcome(channel).await.is_posted()
    }

    pub async fn publish_outcome(&self, channel: ChannelId) -> PublishOutcome {
        let feed = &self.state.feed;
        let item = match self
            .selector
            .select(&self.state.dedup, &feed.categories, feed.explicit_allowed)
            .await
        {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!("Post failed: No suitable memes found");
                return PublishOutcome::NothingEligible;
            }
            Err(e) => {
                self.reporter.report_error(&e);
                return PublishOutcome::Failed(e.user_friendly_message());
            }
        };

        let color = fastrand::u32(0..=0xFF_FFFF);
        let message = format_post(&item, color, Utc::now());
        let handle = match self.sink.send(channel, &message).await {
            Ok(handle) => handle,
            Err(e) => {
                self.reporter.report_error(&e);
                return PublishOutcome::Failed(e.user_friendly_message());
            }
        };

        let short_title: String = item.title.chars().take(50).collect();
        info!("Posted: r/{} - {}...", item.source_category, short_title);
        self.state
            .votes
            .register(handle.clone(), message.clone())
            .await;

        for kind in [ReactionKind::Upvote, ReactionKind::Downvote] {
            if let Err(e) = self.sink.add_vote_affordance(channel, &handle, kind).await {
                warn!("Could not add {:?} reaction to {}: {}", kind, handle, e);
            }
        }

        PublishOutcome::Posted {
            handle,
            title: message.title,
        }
    }
}

/// Object-safe handle on "post something now" for the operator console.
pub trait ManualFetch: Send + Sync {
    fn fetch_now(&self) -> BoxFuture<'_, PublishOutcome>;
}

impl<S, C> ManualFetch for Publisher<S, C>
where
    S: ContentSource + 'static,
    C: ChannelSink + 'static,
{
    fn fetch_now(&self) -> BoxFuture<'_, PublishOutcome> {
        let channel = self.state.channel;
        self.publish_outcome(channel).boxed()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dedup::DedupCache;
    use crate::selector::tests::{candidate, image, FixedSource};
    use crate::selector::{has_usable_image_url, SelectionSettings};
    use memebot_core::{ActorId, CoreError, DiscordError, FeedConfig};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Records every call; `fail_sends` makes `send` return a permission error.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub sent: Mutex<Vec<PostMessage>>,
        pub affordances: Mutex<Vec<(MessageHandle, ReactionKind)>>,
        pub fail_sends: AtomicBool,
        next_id: AtomicUsize,
    }

    impl ChannelSink for RecordingSink {
        async fn send(
            &self,
            _channel: ChannelId,
            message: &PostMessage,
        ) -> Result<MessageHandle, CoreError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(CoreError::Discord(DiscordError::PermissionDenied {
                    operation: "send messages".to_string(),
                }));
            }
            self.sent.lock().await.push(message.clone());
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(MessageHandle(format!("msg{}", id)))
        }

        async fn add_vote_affordance(
            &self,
            _channel: ChannelId,
            message: &MessageHandle,
            kind: ReactionKind,
        ) -> Result<(), CoreError> {
            self.affordances.lock().await.push((message.clone(), kind));
            Ok(())
        }

        fn bot_identity(&self) -> ActorId {
            ActorId("bot".to_string())
        }
    }

    pub(crate) fn state_with(capacity: usize) -> Arc<FeedPosterState> {
        let feed = FeedConfig {
            categories: vec!["memes".to_string()],
            ..Default::default()
        };
        Arc::new(FeedPosterState::new(
            DedupCache::in_memory(capacity),
            feed,
            ChannelId(7),
            ActorId("bot".to_string()),
        ))
    }

    pub(crate) fn publisher_with(
        items: Vec<CandidateItem>,
        state: Arc<FeedPosterState>,
    ) -> Publisher<FixedSource, RecordingSink> {
        Publisher::new(
            ItemSelector::new(FixedSource::new(items), SelectionSettings::default()),
            RecordingSink::default(),
            state,
        )
    }

    #[test]
    fn test_format_post() {
        let mut item = image("abc");
        item.content_url = "https://i.imgur.com/abc.gifv".to_string();
        item.title = "x".repeat(300);
        item.score = 1234;
        item.num_comments = 56;

        let post = format_post(&item, 0x123456, Utc::now());
        assert_eq!(post.image_url, "https://i.imgur.com/abc.gif");
        assert_eq!(post.title.chars().count(), 250);
        assert_eq!(post.url, "https://reddit.com/r/memes/comments/abc");
        assert_eq!(post.footer, "👍 1234 | 💬 56 | r/memes");
        assert_eq!(post.color, 0x123456);
    }

    #[test]
    fn test_gifv_rewrite_ignores_case_and_keeps_query() {
        for (raw, expected) in [
            ("https://i.imgur.com/a.gifv?x=1", "https://i.imgur.com/a.gif?x=1"),
            ("https://i.imgur.com/A.GIFV", "https://i.imgur.com/A.gif"),
            ("https://i.imgur.com/b.GifV#top", "https://i.imgur.com/b.gif#top"),
        ] {
            let item = candidate("g", raw);
            assert!(has_usable_image_url(&item.content_url));
            let post = format_post(&item, 0, Utc::now());
            assert_eq!(post.image_url, expected);
            assert!(!post.image_url.to_ascii_lowercase().contains(".gifv"));
        }
    }

    #[test]
    fn test_format_keeps_plain_images() {
        let post = format_post(&image("p"), 0, Utc::now());
        assert_eq!(post.image_url, "https://i.redd.it/p.jpg");
    }

    #[tokio::test]
    async fn test_publish_registers_and_adds_affordances() {
        let state = state_with(10);
        let publisher = publisher_with(vec![image("a")], state.clone());

        assert!(publisher.publish(ChannelId(7)).await);

        let sent = publisher.sink().sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Meme a");

        let handle = MessageHandle("msg0".to_string());
        assert_eq!(state.votes.score(&handle).await, Some(0));
        assert_eq!(
            *publisher.sink().affordances.lock().await,
            vec![
                (handle.clone(), ReactionKind::Upvote),
                (handle, ReactionKind::Downvote)
            ]
        );
        assert!(state.dedup.lock().await.contains("a"));
    }

    #[tokio::test]
    async fn test_publish_without_items_fails() {
        let publisher = publisher_with(Vec::new(), state_with(10));
        assert_eq!(
            publisher.publish_outcome(ChannelId(7)).await,
            PublishOutcome::NothingEligible
        );
        assert!(publisher.sink().sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_sink_error_is_a_failed_attempt() {
        let state = state_with(10);
        let publisher = publisher_with(vec![image("a")], state.clone());
        publisher.sink().fail_sends.store(true, Ordering::SeqCst);

        let outcome = publisher.publish_outcome(ChannelId(7)).await;
        assert!(matches!(outcome, PublishOutcome::Failed(_)));
        assert_eq!(state.votes.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn test_manual_fetch_uses_configured_channel() {
        let publisher = publisher_with(vec![image("a")], state_with(10));
        let fetcher: &dyn ManualFetch = &publisher;

        assert!(fetcher.fetch_now().await.is_posted());
        assert_eq!(fetcher.fetch_now().await, PublishOutcome::NothingEligible);
    }
}
