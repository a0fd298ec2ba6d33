pub mod api;
pub mod reactions;
pub mod sink;

pub use api::{DiscordClient, DiscordUser};
pub use reactions::ReactionPoller;
pub use sink::{DiscordSink, VoteEmoji};
