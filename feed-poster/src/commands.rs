//! Operator console commands.
//!
//! Each command is a plain `fn` in a static table so the dispatcher needs no
//! registration step. Handlers return the text to show the operator.

use crate::publisher::{ManualFetch, PublishOutcome};
use crate::state::FeedPosterState;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const NO_FRESH_MEME: &str = "🚫 Couldn't find a fresh meme! Try again later.";

pub struct CommandContext {
    pub state: Arc<FeedPosterState>,
    pub fetcher: Arc<dyn ManualFetch>,
}

type Handler = for<'a> fn(&'a CommandContext) -> BoxFuture<'a, String>;

pub struct Command {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub help: &'static str,
    handler: Handler,
}

impl Command {
    fn matches(&self, word: &str) -> bool {
        self.name == word || self.aliases.contains(&word)
    }
}

pub static COMMANDS: &[Command] = &[
    Command {
        name: "meme",
        aliases: &["fetch"],
        help: "Post a meme right now",
        handler: fetch_now,
    },
    Command {
        name: "stats",
        aliases: &[],
        help: "Show bot statistics",
        handler: stats,
    },
    Command {
        name: "subreddits",
        aliases: &["subs"],
        help: "List the subreddits memes are pulled from",
        handler: subreddits,
    },
    Command {
        name: "reschedule",
        aliases: &[],
        help: "Post on the next scheduler tick",
        handler: reschedule,
    },
    Command {
        name: "pause",
        aliases: &[],
        help: "Stop automatic posting",
        handler: pause,
    },
    Command {
        name: "resume",
        aliases: &[],
        help: "Resume automatic posting",
        handler: resume,
    },
    Command {
        name: "best",
        aliases: &["top"],
        help: "Show the best meme of the current period",
        handler: best,
    },
    Command {
        name: "help",
        aliases: &[],
        help: "List commands",
        handler: help,
    },
];

pub fn find_command(word: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|command| command.matches(word))
}

impl CommandContext {
    pub fn new(state: Arc<FeedPosterState>, fetcher: Arc<dyn ManualFetch>) -> Self {
        Self { state, fetcher }
    }

    /// Runs one console line. Blank lines yield `None`.
    pub async fn dispatch(&self, line: &str) -> Option<String> {
        let word = line.split_whitespace().next()?.trim_start_matches('!');
        let word = word.to_ascii_lowercase();
        match find_command(&word) {
            Some(command) => {
                debug!("Running console command {}", command.name);
                Some((command.handler)(self).await)
            }
            None => Some(format!("Unknown command `{}`. Type `help`.", word)),
        }
    }
}

fn fetch_now(ctx: &CommandContext) -> BoxFuture<'_, String> {
    async move {
        match ctx.fetcher.fetch_now().await {
            PublishOutcome::Posted { title, .. } => format!("✅ Posted: {}", title),
            PublishOutcome::NothingEligible => NO_FRESH_MEME.to_string(),
            PublishOutcome::Failed(reason) => format!("{} ({})", NO_FRESH_MEME, reason),
        }
    }
    .boxed()
}

fn stats(ctx: &CommandContext) -> BoxFuture<'_, String> {
    async move {
        let state = &ctx.state;
        let (cached, capacity) = {
            let dedup = state.dedup.lock().await;
            (dedup.len(), dedup.capacity())
        };
        let next_post = {
            let scheduler = state.scheduler.lock().await;
            if scheduler.is_paused() {
                "paused".to_string()
            } else {
                match scheduler.next_post_in(Instant::now()) {
                    Some(wait) => format!("in {:.1} minutes", wait.as_secs_f64() / 60.0),
                    None => "not scheduled yet".to_string(),
                }
            }
        };
        let uptime = Utc::now() - state.started_at;
        let best = state.votes.best().await;

        let mut out = String::from("📊 Bot Statistics\n");
        out.push_str(&format!("Tracked posts: {}/{}\n", cached, capacity));
        out.push_str(&format!("Subreddits: {}\n", state.feed.categories.len()));
        out.push_str(&format!("Next post: {}\n", next_post));
        out.push_str(&format!(
            "Uptime: {}h {}m\n",
            uptime.num_hours(),
            uptime.num_minutes() % 60
        ));
        out.push_str(&format!(
            "Voted posts this period: {}\n",
            state.votes.tracked_count().await
        ));
        match best.snapshot {
            Some(snapshot) => out.push_str(&format!(
                "Best of period: {} ({} votes)",
                snapshot.title, best.score
            )),
            None => out.push_str("Best of period: none yet"),
        }
        out
    }
    .boxed()
}

fn subreddits(ctx: &CommandContext) -> BoxFuture<'_, String> {
    async move {
        let list: Vec<String> = ctx
            .state
            .feed
            .categories
            .iter()
            .map(|sub| format!("r/{}", sub))
            .collect();
        format!("Monitored subreddits: {}", list.join(", "))
    }
    .boxed()
}

fn reschedule(ctx: &CommandContext) -> BoxFuture<'_, String> {
    async move {
        if ctx.state.scheduler.lock().await.reschedule_now() {
            info!("Operator rescheduled the next post");
            "⏰ Next meme will be posted on the next tick".to_string()
        } else {
            "Scheduler has not started yet".to_string()
        }
    }
    .boxed()
}

fn pause(ctx: &CommandContext) -> BoxFuture<'_, String> {
    async move {
        ctx.state.scheduler.lock().await.set_paused(true);
        info!("Automatic posting paused");
        "⏸️ Automatic posting paused".to_string()
    }
    .boxed()
}

fn resume(ctx: &CommandContext) -> BoxFuture<'_, String> {
    async move {
        ctx.state.scheduler.lock().await.set_paused(false);
        info!("Automatic posting resumed");
        "▶️ Automatic posting resumed".to_string()
    }
    .boxed()
}

fn best(ctx: &CommandContext) -> BoxFuture<'_, String> {
    async move {
        let best = ctx.state.votes.best().await;
        match (best.message, best.snapshot) {
            (Some(_), Some(snapshot)) => format!(
                "🏆 {} with {} votes\n{}",
                snapshot.title, best.score, snapshot.url
            ),
            _ => "No votes yet this period".to_string(),
        }
    }
    .boxed()
}

fn help(_ctx: &CommandContext) -> BoxFuture<'_, String> {
    async move {
        COMMANDS
            .iter()
            .map(|command| {
                if command.aliases.is_empty() {
                    format!("{:<12} {}", command.name, command.help)
                } else {
                    let name = format!("{} ({})", command.name, command.aliases.join(", "));
                    format!("{:<12} {}", name, command.help)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
    .boxed()
}

/// Answers console lines until the input closes or shutdown is signalled.
pub async fn run_console<W>(
    ctx: CommandContext,
    mut lines: mpsc::Receiver<String>,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                let Some(reply) = ctx.dispatch(&line).await else {
                    continue;
                };
                if let Err(e) = writer.write_all(format!("{}\n", reply).as_bytes()).await {
                    warn!("Console output failed: {}", e);
                    break;
                }
                let _ = writer.flush().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Console closed");
}
