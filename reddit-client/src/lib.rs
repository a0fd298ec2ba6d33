pub mod api;
pub mod auth;
pub mod rate_limiter;
pub mod source;

pub use api::{RedditApiClient, RedditListing, RedditPostData};
pub use auth::{RedditAuth, RedditCredentials};
pub use source::RedditSource;
