use crate::dedup::DedupCache;
use memebot_core::{CandidateItem, ContentSource, CoreError, ErrorExt, FeedConfig};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Image formats that embed inline. Everything else, video included, is skipped.
pub const ALLOWED_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".gifv"];

#[derive(Debug, Clone)]
pub struct SelectionSettings {
    pub batch_limit: u32,
    pub pick_window: usize,
    pub max_attempts: usize,
    pub fetch_timeout: Duration,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            pick_window: 15,
            max_attempts: 5,
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

impl SelectionSettings {
    pub fn from_config(feed: &FeedConfig, fetch_timeout: Duration) -> Self {
        Self {
            batch_limit: feed.batch_limit,
            pick_window: feed.pick_window,
            max_attempts: feed.max_attempts,
            fetch_timeout,
        }
    }
}

/// True when `raw` is an absolute http(s) URL whose path ends in an allowed
/// image extension. Query strings and fragments are ignored.
pub fn has_usable_image_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let path = url.path().to_ascii_lowercase();
    ALLOWED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Every rule except the dedup check.
pub fn is_eligible(item: &CandidateItem, explicit_allowed: bool) -> bool {
    !item.is_pinned
        && (explicit_allowed || !item.is_explicit)
        && has_usable_image_url(&item.content_url)
}

pub struct ItemSelector<S> {
    source: S,
    settings: SelectionSettings,
}

impl<S: ContentSource> ItemSelector<S> {
    pub fn new(source: S, settings: SelectionSettings) -> Self {
        Self { source, settings }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Picks an unseen eligible item and records it in `cache`.
    ///
    /// Source failures count as a failed attempt. `Ok(None)` means every
    /// attempt came back empty. An error means the cache is inconsistent and
    /// nothing should be posted this cycle.
    pub async fn select(
        &self,
        cache: &Mutex<DedupCache>,
        categories: &[String],
        explicit_allowed: bool,
    ) -> Result<Option<CandidateItem>, CoreError> {
        if categories.is_empty() {
            warn!("No categories configured, nothing to select from");
            return Ok(None);
        }

        let mut rng = fastrand::Rng::new();
        for attempt in 1..=self.settings.max_attempts {
            let category = &categories[rng.usize(..categories.len())];
            info!(
                "Fetching from r/{} (attempt {}/{})",
                category, attempt, self.settings.max_attempts
            );

            let batch = match self.fetch(category, explicit_allowed).await {
                Ok(batch) => batch,
                Err(e) => {
                    e.log_warn();
                    continue;
                }
            };

            // Membership check and record happen under one lock.
            let mut cache = cache.lock().await;
            cache.check_consistency()?;

            let eligible: Vec<&CandidateItem> = batch
                .iter()
                .filter(|item| is_eligible(item, explicit_allowed) && !cache.contains(&item.id))
                .take(self.settings.pick_window)
                .collect();

            if eligible.is_empty() {
                warn!("No new memes in r/{} ({} fetched)", category, batch.len());
                continue;
            }

            let chosen = eligible[rng.usize(..eligible.len())].clone();
            debug!(
                "Chose {} out of {} eligible items from r/{}",
                chosen.id,
                eligible.len(),
                category
            );

            cache.record(&chosen.id);
            if let Err(e) = cache.persist().await {
                e.log_error();
            }
            return Ok(Some(chosen));
        }

        warn!(
            "Gave up selecting after {} attempts",
            self.settings.max_attempts
        );
        Ok(None)
    }

    async fn fetch(
        &self,
        category: &str,
        explicit_allowed: bool,
    ) -> Result<Vec<CandidateItem>, CoreError> {
        let fetch = self
            .source
            .fetch_candidates(category, explicit_allowed, self.settings.batch_limit);
        match tokio::time::timeout(self.settings.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout {
                seconds: self.settings.fetch_timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use memebot_core::RedditApiError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn candidate(id: &str, url: &str) -> CandidateItem {
        CandidateItem {
            id: id.to_string(),
            content_url: url.to_string(),
            is_explicit: false,
            is_pinned: false,
            source_category: "memes".to_string(),
            title: format!("Meme {}", id),
            permalink: format!("https://reddit.com/r/memes/comments/{}", id),
            score: 10,
            num_comments: 3,
        }
    }

    pub(crate) fn image(id: &str) -> CandidateItem {
        candidate(id, &format!("https://i.redd.it/{}.jpg", id))
    }

    /// Always returns the same batch for every category.
    pub(crate) struct FixedSource {
        pub items: Vec<CandidateItem>,
        pub calls: AtomicUsize,
    }

    impl FixedSource {
        pub(crate) fn new(items: Vec<CandidateItem>) -> Self {
            Self {
                items,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ContentSource for FixedSource {
        async fn fetch_candidates(
            &self,
            _category: &str,
            _explicit_allowed: bool,
            _limit: u32,
        ) -> Result<Vec<CandidateItem>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.clone())
        }
    }

    /// Per-category batches; unknown categories fail like a rate limit.
    struct CategorySource {
        batches: HashMap<String, Vec<CandidateItem>>,
    }

    impl ContentSource for CategorySource {
        async fn fetch_candidates(
            &self,
            category: &str,
            _explicit_allowed: bool,
            _limit: u32,
        ) -> Result<Vec<CandidateItem>, CoreError> {
            self.batches.get(category).cloned().ok_or(CoreError::RedditApi(
                RedditApiError::RateLimitExceeded { retry_after: 60 },
            ))
        }
    }

    struct HangingSource;

    impl ContentSource for HangingSource {
        async fn fetch_candidates(
            &self,
            _category: &str,
            _explicit_allowed: bool,
            _limit: u32,
        ) -> Result<Vec<CandidateItem>, CoreError> {
            std::future::pending::<()>().await;
            Ok(Vec::new())
        }
    }

    fn categories(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extension_allow_list() {
        assert!(has_usable_image_url("https://i.redd.it/a.jpg"));
        assert!(has_usable_image_url("https://i.redd.it/a.JPEG"));
        assert!(has_usable_image_url("https://i.imgur.com/a.GIFV?x=1"));
        assert!(has_usable_image_url("http://example.com/a.png#frag"));
        assert!(!has_usable_image_url("https://v.redd.it/a.mp4"));
        assert!(!has_usable_image_url("https://v.redd.it/abc"));
        assert!(!has_usable_image_url("https://example.com/a.webm"));
        assert!(!has_usable_image_url(""));
        assert!(!has_usable_image_url("ftp://example.com/a.png"));
        assert!(!has_usable_image_url("not a url.png"));
    }

    #[test]
    fn test_eligibility_rules() {
        assert!(is_eligible(&image("a"), false));

        let mut pinned = image("p");
        pinned.is_pinned = true;
        assert!(!is_eligible(&pinned, true));

        let mut explicit = image("x");
        explicit.is_explicit = true;
        assert!(!is_eligible(&explicit, false));
        assert!(is_eligible(&explicit, true));

        assert!(!is_eligible(&candidate("v", "https://v.redd.it/v.mp4"), false));
        assert!(!is_eligible(&candidate("e", ""), false));
    }

    #[tokio::test]
    async fn test_never_returns_cached_id() {
        let source = FixedSource::new(vec![image("seen"), image("fresh")]);
        let selector = ItemSelector::new(source, SelectionSettings::default());
        let cats = categories(&["memes"]);

        for _ in 0..20 {
            let mut cache = DedupCache::in_memory(10);
            cache.record("seen");
            let cache = Mutex::new(cache);

            let chosen = selector.select(&cache, &cats, false).await.unwrap();
            assert_eq!(chosen.map(|c| c.id), Some("fresh".to_string()));
        }
    }

    #[tokio::test]
    async fn test_selection_records_id() {
        let selector = ItemSelector::new(
            FixedSource::new(vec![image("a"), image("b")]),
            SelectionSettings::default(),
        );
        let cache = Mutex::new(DedupCache::in_memory(10));
        let cats = categories(&["memes"]);

        let first = selector.select(&cache, &cats, false).await.unwrap().unwrap();
        let second = selector.select(&cache, &cats, false).await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert!(selector.select(&cache, &cats, false).await.unwrap().is_none());

        let cache = cache.lock().await;
        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let selector = ItemSelector::new(
            FixedSource::new(vec![candidate("v", "https://v.redd.it/v.mp4")]),
            SelectionSettings::default(),
        );
        let cache = Mutex::new(DedupCache::in_memory(10));

        let chosen = selector
            .select(&cache, &categories(&["memes", "funny"]), false)
            .await
            .unwrap();
        assert!(chosen.is_none());
        assert_eq!(selector.source().calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_pick_window_bounds_choice() {
        let items: Vec<CandidateItem> = (0..40).map(|i| image(&format!("i{}", i))).collect();
        let settings = SelectionSettings {
            pick_window: 3,
            ..Default::default()
        };
        let selector = ItemSelector::new(FixedSource::new(items), settings);
        let cats = categories(&["memes"]);

        for _ in 0..30 {
            let cache = Mutex::new(DedupCache::in_memory(10));
            let chosen = selector.select(&cache, &cats, false).await.unwrap().unwrap();
            assert!(["i0", "i1", "i2"].contains(&chosen.id.as_str()));
        }
    }

    #[tokio::test]
    async fn test_source_errors_are_retried_with_other_categories() {
        let mut batches = HashMap::new();
        batches.insert("funny".to_string(), vec![image("ok")]);
        let selector = ItemSelector::new(
            CategorySource { batches },
            SelectionSettings {
                max_attempts: 50,
                ..Default::default()
            },
        );
        let cache = Mutex::new(DedupCache::in_memory(10));

        let chosen = selector
            .select(&cache, &categories(&["broken", "funny"]), false)
            .await
            .unwrap();
        assert_eq!(chosen.map(|c| c.id), Some("ok".to_string()));
    }

    #[tokio::test]
    async fn test_empty_categories_yield_none() {
        let selector = ItemSelector::new(
            FixedSource::new(vec![image("a")]),
            SelectionSettings::default(),
        );
        let cache = Mutex::new(DedupCache::in_memory(10));
        assert!(selector.select(&cache, &[], false).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_source_times_out() {
        let selector = ItemSelector::new(
            HangingSource,
            SelectionSettings {
                max_attempts: 2,
                ..Default::default()
            },
        );
        let cache = Mutex::new(DedupCache::in_memory(10));
        let chosen = selector
            .select(&cache, &categories(&["memes"]), false)
            .await
            .unwrap();
        assert!(chosen.is_none());
    }
}
