use memebot_core::{CoreError, RedditApiError};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthUrl, ClientId, ClientSecret, TokenResponse, TokenUrl};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Tokens are renewed this long before Reddit says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct AppToken {
    pub access_token: String,
    pub expires_at: Instant,
}

impl AppToken {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now + EXPIRY_MARGIN < self.expires_at
    }
}

/// App-only OAuth2 (client credentials grant). Holds one cached token.
pub struct RedditAuth {
    oauth_client: BasicClient,
    token: Mutex<Option<AppToken>>,
}

impl RedditAuth {
    pub fn new(credentials: RedditCredentials) -> Result<Self, CoreError> {
        let auth_url = AuthUrl::new(REDDIT_AUTH_URL.to_string()).map_err(invalid_url)?;
        let token_url = TokenUrl::new(REDDIT_TOKEN_URL.to_string()).map_err(invalid_url)?;

        let oauth_client = BasicClient::new(
            ClientId::new(credentials.client_id),
            Some(ClientSecret::new(credentials.client_secret)),
            auth_url,
            Some(token_url),
        );

        Ok(Self {
            oauth_client,
            token: Mutex::new(None),
        })
    }

    /// Returns a valid access token, exchanging credentials when the cached
    /// one is missing or about to expire.
    pub async fn access_token(&self) -> Result<String, CoreError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.access_token.clone());
            }
            debug!("Cached Reddit token is about to expire, renewing");
        }

        let response = self
            .oauth_client
            .exchange_client_credentials()
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                warn!("Reddit token exchange failed: {}", e);
                CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                    reason: e.to_string(),
                })
            })?;

        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let token = AppToken {
            access_token: response.access_token().secret().clone(),
            expires_at: Instant::now() + lifetime,
        };
        info!("Obtained Reddit app token valid for {:?}", lifetime);

        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drops the cached token after Reddit rejected it.
    pub async fn invalidate(&self) {
        self.token.lock().await.take();
    }

    pub async fn has_token(&self) -> bool {
        self.token.lock().await.is_some()
    }
}

fn invalid_url(e: oauth2::url::ParseError) -> CoreError {
    CoreError::Internal {
        message: format!("Invalid Reddit OAuth URL: {}", e),
    }
}
