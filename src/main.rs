use anyhow::{Context, Result};
use discord_sink::{DiscordClient, DiscordSink, ReactionPoller, VoteEmoji};
use feed_poster::commands::{run_console, CommandContext};
use feed_poster::{
    run_posting_loop, run_reset_loop, FeedPosterState, IntervalPolicy, ItemSelector, Publisher,
    SelectionSettings,
};
use memebot_core::{BotConfig, ChannelId, ChannelSink, ReactionEvent};
use reddit_client::RedditSource;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "memebot=info,feed_poster=info,reddit_client=info,discord_sink=info";

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting memebot");

    let config = BotConfig::load().context("failed to load configuration")?;
    let timeout = Duration::from_secs(config.reddit.request_timeout_secs);
    let channel = ChannelId(config.discord.channel_id);

    let source = RedditSource::from_config(&config.reddit).context("failed to set up Reddit client")?;
    let token = config
        .discord
        .token
        .clone()
        .context("DISCORD_TOKEN is not set")?;
    let client = DiscordClient::new(token, timeout).context("failed to set up Discord client")?;
    let emoji = VoteEmoji::from_config(&config.votes);
    let sink = DiscordSink::connect(client.clone(), emoji.clone())
        .await
        .context("failed to reach Discord")?;

    let state = Arc::new(
        FeedPosterState::load(config.feed.clone(), channel, sink.bot_identity()).await,
    );
    let selector = ItemSelector::new(source, SelectionSettings::from_config(&config.feed, timeout));
    let publisher = Arc::new(Publisher::new(selector, sink, state.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(run_posting_loop(
        publisher.clone(),
        IntervalPolicy::from_config(&config.feed),
        Duration::from_secs(config.feed.tick_seconds),
        shutdown_rx.clone(),
    )));

    tasks.push(tokio::spawn(run_reset_loop(
        state.clone(),
        Duration::from_secs(config.feed.reset_period_hours * 3600),
        shutdown_rx.clone(),
    )));

    let (event_tx, mut event_rx) = mpsc::channel::<ReactionEvent>(256);
    let poller = ReactionPoller::new(client, channel, emoji, event_tx);
    let recent = config.votes.poll_recent_messages;
    let poll_state = state.clone();
    tasks.push(tokio::spawn(poller.run(
        Duration::from_secs(config.votes.poll_interval_secs),
        move || {
            let state = poll_state.clone();
            async move { state.votes.recent_messages(recent).await }
        },
        shutdown_rx.clone(),
    )));

    // Ends once the poller drops its sender.
    let vote_state = state.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            vote_state.votes.handle_event(&event).await;
        }
    }));

    let console = CommandContext::new(state.clone(), publisher.clone());
    tasks.push(tokio::spawn(run_console(
        console,
        spawn_stdin_reader(),
        tokio::io::stdout(),
        shutdown_rx,
    )));

    info!("Memebot running in channel {}. Type `help` for commands", channel);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutting down");

    if shutdown_tx.send(true).is_err() {
        warn!("All tasks had already stopped");
    }
    for task in tasks {
        if let Err(e) = task.await {
            error!("Task ended abnormally: {}", e);
        }
    }

    state.shutdown().await.context("failed to save dedup cache")?;
    info!("Memebot stopped");
    Ok(())
}

/// Stdin is read on a plain thread so a pending read never holds up shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}
