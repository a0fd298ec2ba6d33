use memebot_core::{
    ConfigError, CoreError, DedupError, DiscordError, ErrorExt, ErrorReporter, RedditApiError,
};
use std::time::Duration;

#[test]
fn test_error_codes() {
    let reddit_error = CoreError::RedditApi(RedditApiError::InvalidToken);
    assert_eq!(reddit_error.error_code(), "REDDIT_API");

    let discord_error = CoreError::Discord(DiscordError::Unauthorized);
    assert_eq!(discord_error.error_code(), "DISCORD_API");

    let dedup_error = CoreError::Dedup(DedupError::Diverged {
        queue_len: 3,
        index_len: 2,
    });
    assert_eq!(dedup_error.error_code(), "DEDUP");

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "discord.token".to_string(),
    });
    assert_eq!(config_error.error_code(), "CONFIG");
}

#[test]
fn test_transient_and_fatal_errors() {
    let rate_limited =
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert!(rate_limited.is_retryable());

    let timeout = CoreError::RedditApi(RedditApiError::RequestTimeout);
    assert!(timeout.is_retryable());

    let missing_subreddit = CoreError::RedditApi(RedditApiError::SubredditNotFound {
        subreddit: "nope".to_string(),
    });
    assert!(!missing_subreddit.is_retryable());

    let forbidden = CoreError::Discord(DiscordError::PermissionDenied {
        operation: "send messages".to_string(),
    });
    assert!(!forbidden.is_retryable());

    let diverged = CoreError::Dedup(DedupError::Diverged {
        queue_len: 1,
        index_len: 0,
    });
    assert!(!diverged.is_retryable());
}

#[test]
fn test_retry_after() {
    let rate_limit_error =
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert_eq!(
        rate_limit_error.retry_after(),
        Some(Duration::from_secs(60))
    );

    let discord_limit = CoreError::Discord(DiscordError::RateLimited {
        retry_after_ms: 1500,
    });
    assert_eq!(
        discord_limit.retry_after(),
        Some(Duration::from_millis(1500))
    );

    let timeout_error = CoreError::Timeout { seconds: 15 };
    assert_eq!(timeout_error.retry_after(), Some(Duration::from_secs(15)));
}

#[test]
fn test_user_friendly_messages() {
    let reddit_error = CoreError::RedditApi(RedditApiError::SubredditNotFound {
        subreddit: "memes".to_string(),
    });
    assert!(reddit_error.user_friendly_message().contains("'memes'"));

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "discord.channel_id".to_string(),
    });
    assert!(config_error
        .user_friendly_message()
        .contains("discord.channel_id"));
}

#[test]
fn test_error_reporter() {
    let reporter = ErrorReporter::new()
        .with_error_reporting(true)
        .with_warning_reporting(true);
    let error = CoreError::Discord(DiscordError::RequestTimeout);

    // Reporting only logs; it must not panic.
    reporter.report_error(&error);
    reporter.report_warning(&error);
}
