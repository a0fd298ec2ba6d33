use memebot_core::{ChannelId, CoreError, DiscordError, MessageHandle, PostMessage};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const REACTION_PAGE_SIZE: usize = 100;
const REDDIT_FAVICON: &str = "https://www.redditstatic.com/desktop2x/img/favicon/favicon-32x32.png";

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    embeds: [Embed<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    url: &'a str,
    color: u32,
    timestamp: String,
    image: EmbedImage<'a>,
    footer: EmbedFooter<'a>,
}

#[derive(Debug, Serialize)]
struct EmbedImage<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct EmbedFooter<'a> {
    text: &'a str,
    icon_url: &'a str,
}

/// Thin Discord REST client authenticated as a bot user.
#[derive(Debug, Clone)]
pub struct DiscordClient {
    http_client: Client,
    token: String,
}

impl DiscordClient {
    pub fn new(token: String, timeout: Duration) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent("DiscordBot (https://github.com/memebot, 0.1)")
            .timeout(timeout)
            .build()?;
        Ok(Self { http_client, token })
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", DISCORD_API_BASE, endpoint))
            .header("Authorization", format!("Bot {}", self.token))
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
        operation: &str,
    ) -> Result<Response, CoreError> {
        let response = builder.send().await.map_err(|e| {
            error!("Network error during {}: {}", operation, e);
            if e.is_timeout() {
                CoreError::Discord(DiscordError::RequestTimeout)
            } else {
                CoreError::Network(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!("Discord {} succeeded with {}", operation, status);
            return Ok(response);
        }

        let error = match status.as_u16() {
            401 => DiscordError::Unauthorized,
            403 => DiscordError::PermissionDenied {
                operation: operation.to_string(),
            },
            404 => DiscordError::NotFound {
                resource: operation.to_string(),
            },
            429 => {
                let retry_after_ms = response
                    .json::<RateLimitBody>()
                    .await
                    .map(|body| (body.retry_after * 1000.0) as u64)
                    .unwrap_or(1000);
                warn!("Discord rate limited {}, retry after {}ms", operation, retry_after_ms);
                DiscordError::RateLimited { retry_after_ms }
            }
            code => {
                let message = response.text().await.unwrap_or_default();
                DiscordError::RequestFailed {
                    status_code: code,
                    message,
                }
            }
        };
        error!("Discord {} failed: {}", operation, error);
        Err(CoreError::Discord(error))
    }

    pub async fn current_user(&self) -> Result<DiscordUser, CoreError> {
        let response = self
            .execute(self.request(Method::GET, "/users/@me"), "fetch bot user")
            .await?;
        response.json().await.map_err(|e| invalid_response("user", e))
    }

    pub async fn send_post(
        &self,
        channel: ChannelId,
        post: &PostMessage,
    ) -> Result<MessageHandle, CoreError> {
        let body = CreateMessage {
            embeds: [Embed {
                title: &post.title,
                url: &post.url,
                color: post.color,
                timestamp: post.timestamp.to_rfc3339(),
                image: EmbedImage {
                    url: &post.image_url,
                },
                footer: EmbedFooter {
                    text: &post.footer,
                    icon_url: REDDIT_FAVICON,
                },
            }],
        };

        let endpoint = format!("/channels/{}/messages", channel);
        let response = self
            .execute(
                self.request(Method::POST, &endpoint).json(&body),
                "send messages",
            )
            .await?;
        let message: DiscordMessage = response
            .json()
            .await
            .map_err(|e| invalid_response("message", e))?;
        Ok(MessageHandle(message.id))
    }

    pub async fn add_reaction(
        &self,
        channel: ChannelId,
        message: &MessageHandle,
        emoji: &str,
    ) -> Result<(), CoreError> {
        let endpoint = format!(
            "/channels/{}/messages/{}/reactions/{}/@me",
            channel,
            message,
            reaction_path_segment(emoji)
        );
        self.execute(
            self.request(Method::PUT, &endpoint)
                .header("Content-Length", "0"),
            "add reactions",
        )
        .await?;
        Ok(())
    }

    /// Every user who reacted to `message` with `emoji`, following the
    /// `after` cursor page by page.
    pub async fn reaction_users(
        &self,
        channel: ChannelId,
        message: &MessageHandle,
        emoji: &str,
    ) -> Result<Vec<DiscordUser>, CoreError> {
        let endpoint = format!(
            "/channels/{}/messages/{}/reactions/{}",
            channel,
            message,
            reaction_path_segment(emoji)
        );
        let limit = REACTION_PAGE_SIZE.to_string();

        let mut users = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut builder = self
                .request(Method::GET, &endpoint)
                .query(&[("limit", limit.as_str())]);
            if let Some(cursor) = &after {
                builder = builder.query(&[("after", cursor.as_str())]);
            }

            let response = self.execute(builder, "read reactions").await?;
            let page: Vec<DiscordUser> = response
                .json()
                .await
                .map_err(|e| invalid_response("reaction users", e))?;

            after = next_page_cursor(&page);
            users.extend(page);
            if after.is_none() {
                break;
            }
        }
        Ok(users)
    }
}

/// Cursor for the next reactions page. A short page is the last one.
pub fn next_page_cursor(page: &[DiscordUser]) -> Option<String> {
    if page.len() < REACTION_PAGE_SIZE {
        return None;
    }
    page.last().map(|user| user.id.clone())
}

fn invalid_response(what: &str, e: reqwest::Error) -> CoreError {
    error!("Failed to parse Discord {}: {}", what, e);
    CoreError::Discord(DiscordError::InvalidResponse {
        details: format!("Failed to parse {}", what),
    })
}

/// Encodes an emoji for a reaction URL. Custom emoji written in message
/// syntax (`<:name:id>` or `<a:name:id>`) become `name:id`.
pub fn reaction_path_segment(emoji: &str) -> String {
    let trimmed = emoji.trim();
    let bare = trimmed
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .map(|inner| inner.strip_prefix("a:").unwrap_or(inner))
        .map(|inner| inner.strip_prefix(':').unwrap_or(inner))
        .unwrap_or(trimmed);
    url::form_urlencoded::byte_serialize(bare.as_bytes()).collect()
}
