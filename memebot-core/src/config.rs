use crate::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_PATH_VAR: &str = "MEMEBOT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "memebot.toml";
/// Upper bound for any posting or retry interval (one week).
pub const MAX_INTERVAL_MINUTES: f64 = 7.0 * 24.0 * 60.0;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub discord: DiscordConfig,
    pub reddit: RedditConfig,
    pub feed: FeedConfig,
    pub votes: VoteConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub token: Option<String>,
    pub channel_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: "memebot/0.1".to_string(),
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub categories: Vec<String>,
    pub explicit_allowed: bool,
    pub min_interval_minutes: f64,
    pub max_interval_minutes: f64,
    pub retry_min_minutes: f64,
    pub retry_max_minutes: f64,
    pub tick_seconds: u64,
    pub cache_capacity: usize,
    pub cache_path: PathBuf,
    pub batch_limit: u32,
    pub pick_window: usize,
    pub max_attempts: usize,
    pub reset_period_hours: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            categories: [
                "memes",
                "dankmemes",
                "funny",
                "me_irl",
                "animememes",
                "goodanimemes",
                "wholesomememes",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            explicit_allowed: false,
            min_interval_minutes: 5.0,
            max_interval_minutes: 10.0,
            retry_min_minutes: 1.0,
            retry_max_minutes: 3.0,
            tick_seconds: 60,
            cache_capacity: 1000,
            cache_path: PathBuf::from("cache.json"),
            batch_limit: 100,
            pick_window: 15,
            max_attempts: 5,
            reset_period_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoteConfig {
    pub upvote_emoji: String,
    pub downvote_emoji: String,
    pub poll_interval_secs: u64,
    /// How many of the latest posts the reaction poller looks at.
    pub poll_recent_messages: usize,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            upvote_emoji: "⬆️".to_string(),
            downvote_emoji: "⬇️".to_string(),
            poll_interval_secs: 30,
            poll_recent_messages: 20,
        }
    }
}

impl BotConfig {
    /// Reads the TOML file at `path`. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotReadable {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Loads the file named by `MEMEBOT_CONFIG`, applies environment
    /// overrides and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from a variable lookup, normally the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("DISCORD_TOKEN") {
            self.discord.token = Some(token);
        }
        if let Some(raw) = lookup("MEMES_CHANNEL_ID") {
            self.discord.channel_id =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        field: "MEMES_CHANNEL_ID".to_string(),
                        value: raw.clone(),
                    })?;
        }
        if let Some(id) = lookup("REDDIT_CLIENT_ID") {
            self.reddit.client_id = Some(id);
        }
        if let Some(secret) = lookup("REDDIT_CLIENT_SECRET") {
            self.reddit.client_secret = Some(secret);
        }
        if let Some(agent) = lookup("REDDIT_USER_AGENT") {
            self.reddit.user_agent = agent;
        }
        if let Some(path) = lookup("MEMEBOT_CACHE_PATH") {
            self.feed.cache_path = PathBuf::from(path);
        }
        debug!("Applied environment overrides");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.token.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::MissingField {
                field: "discord.token".to_string(),
            });
        }
        if self.discord.channel_id == 0 {
            return Err(ConfigError::MissingField {
                field: "discord.channel_id".to_string(),
            });
        }
        if self.reddit.client_id.is_none() {
            return Err(ConfigError::MissingField {
                field: "reddit.client_id".to_string(),
            });
        }
        if self.reddit.client_secret.is_none() {
            return Err(ConfigError::MissingField {
                field: "reddit.client_secret".to_string(),
            });
        }
        self.feed.validate()
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason: String| Err(ConfigError::ValidationFailed { reason });

        if self.categories.is_empty() {
            return fail("at least one category is required".to_string());
        }
        if self.min_interval_minutes <= 0.0 || self.min_interval_minutes > self.max_interval_minutes
        {
            return fail(format!(
                "posting interval [{}, {}] is not a valid range",
                self.min_interval_minutes, self.max_interval_minutes
            ));
        }
        if !(self.max_interval_minutes <= MAX_INTERVAL_MINUTES
            && self.retry_max_minutes <= MAX_INTERVAL_MINUTES)
        {
            return fail(format!(
                "intervals may not exceed {} minutes",
                MAX_INTERVAL_MINUTES
            ));
        }
        if self.retry_min_minutes <= 0.0 || self.retry_min_minutes > self.retry_max_minutes {
            return fail(format!(
                "retry interval [{}, {}] is not a valid range",
                self.retry_min_minutes, self.retry_max_minutes
            ));
        }
        if self.cache_capacity == 0 {
            return fail("cache_capacity must be positive".to_string());
        }
        if self.pick_window == 0 || self.max_attempts == 0 || self.batch_limit == 0 {
            return fail("pick_window, max_attempts and batch_limit must be positive".to_string());
        }
        if self.tick_seconds == 0 || self.reset_period_hours == 0 {
            return fail("tick_seconds and reset_period_hours must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn complete() -> BotConfig {
        let mut config = BotConfig::default();
        let env: HashMap<&str, &str> = [
            ("DISCORD_TOKEN", "token"),
            ("MEMES_CHANNEL_ID", "1234"),
            ("REDDIT_CLIENT_ID", "id"),
            ("REDDIT_CLIENT_SECRET", "secret"),
        ]
        .into_iter()
        .collect();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        config
    }

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.feed.categories.len(), 7);
        assert_eq!(config.feed.cache_capacity, 1000);
        assert_eq!(config.feed.min_interval_minutes, 5.0);
        assert_eq!(config.feed.max_interval_minutes, 10.0);
        assert_eq!(config.feed.reset_period_hours, 24);
        assert_eq!(config.reddit.request_timeout_secs, 15);
        assert!(config.feed.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BotConfig::from_toml_str(
            r#"
            [feed]
            categories = ["memes"]
            cache_capacity = 3

            [discord]
            channel_id = 42
            "#,
        )
        .unwrap();

        assert_eq!(config.feed.categories, vec!["memes".to_string()]);
        assert_eq!(config.feed.cache_capacity, 3);
        assert_eq!(config.feed.pick_window, 15);
        assert_eq!(config.discord.channel_id, 42);
        assert_eq!(config.votes.upvote_emoji, "⬆️");
    }

    #[test]
    fn test_env_overrides_and_validation() {
        let config = complete();
        assert_eq!(config.discord.channel_id, 1234);
        assert!(config.validate().is_ok());

        let mut missing = BotConfig::default();
        assert!(matches!(
            missing.validate(),
            Err(ConfigError::MissingField { .. })
        ));

        let result = missing.apply_overrides(|name| {
            (name == "MEMES_CHANNEL_ID").then(|| "not-a-number".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_invalid_feed_ranges() {
        let mut config = complete();
        config.feed.min_interval_minutes = 12.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { .. })
        ));

        let mut config = complete();
        config.feed.cache_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = complete();
        config.feed.categories.clear();
        assert!(config.validate().is_err());

        let mut config = complete();
        config.feed.max_interval_minutes = 1e300;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { .. })
        ));

        let mut config = complete();
        config.feed.retry_max_minutes = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join(format!("memebot_{}.toml", uuid::Uuid::new_v4()));
        let config = BotConfig::from_file(&path).unwrap();
        assert_eq!(config.feed.cache_capacity, 1000);
    }
}
