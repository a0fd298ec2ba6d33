pub mod commands;
pub mod dedup;
pub mod publisher;
pub mod scheduler;
pub mod selector;
pub mod state;
pub mod votes;

pub use commands::{CommandContext, COMMANDS};
pub use dedup::DedupCache;
pub use publisher::{format_post, ManualFetch, PublishOutcome, Publisher};
pub use scheduler::{run_posting_loop, run_reset_loop, IntervalPolicy, SchedulerState, TickOutcome};
pub use selector::{ItemSelector, SelectionSettings};
pub use state::FeedPosterState;
pub use votes::{BestOfPeriod, PostedMessage, VoteTracker};
