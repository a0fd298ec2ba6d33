use crate::api::RedditApiClient;
use crate::auth::{RedditAuth, RedditCredentials};
use memebot_core::{CandidateItem, ContentSource, CoreError, RedditApiError, RedditConfig};
use std::time::Duration;
use tracing::{debug, warn};

/// Subreddit "hot" listings as a content source.
pub struct RedditSource {
    api: RedditApiClient,
    auth: RedditAuth,
}

impl RedditSource {
    pub fn new(api: RedditApiClient, auth: RedditAuth) -> Self {
        Self { api, auth }
    }

    pub fn from_config(config: &RedditConfig) -> Result<Self, CoreError> {
        let credentials = RedditCredentials {
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
        };
        let api = RedditApiClient::new(
            config.user_agent.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::new(api, RedditAuth::new(credentials)?))
    }
}

impl ContentSource for RedditSource {
    async fn fetch_candidates(
        &self,
        category: &str,
        explicit_allowed: bool,
        limit: u32,
    ) -> Result<Vec<CandidateItem>, CoreError> {
        let token = self.auth.access_token().await?;

        let listing = match self.api.get_subreddit_posts(&token, category, limit).await {
            Ok(listing) => listing,
            Err(CoreError::RedditApi(RedditApiError::InvalidToken)) => {
                warn!("Reddit rejected the app token, it will be renewed on the next fetch");
                self.auth.invalidate().await;
                return Err(CoreError::RedditApi(RedditApiError::InvalidToken));
            }
            Err(e) => return Err(e),
        };

        let candidates = filter_listing(
            listing.data.children.into_iter().map(|child| child.data.into_candidate()),
            explicit_allowed,
        );
        debug!(
            "r/{} yielded {} candidates (explicit allowed: {})",
            category,
            candidates.len(),
            explicit_allowed
        );
        Ok(candidates)
    }
}

/// Source-side safety filter; the selector applies the remaining rules.
pub fn filter_listing<I>(items: I, explicit_allowed: bool) -> Vec<CandidateItem>
where
    I: IntoIterator<Item = CandidateItem>,
{
    items
        .into_iter()
        .filter(|item| explicit_allowed || !item.is_explicit)
        .collect()
}
