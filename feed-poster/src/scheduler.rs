//! Posting and reset loops.
//!
//! The posting loop wakes every tick and posts once the randomized interval
//! has elapsed; a failed attempt schedules a short retry instead. The reset
//! loop clears vote tracking once per period. The two run as separate tasks
//! and only meet through `FeedPosterState`.

use crate::publisher::Publisher;
use crate::state::FeedPosterState;
use memebot_core::{ChannelSink, ContentSource, FeedConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct IntervalPolicy {
    pub min_minutes: f64,
    pub max_minutes: f64,
    pub retry_min_minutes: f64,
    pub retry_max_minutes: f64,
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self {
            min_minutes: 5.0,
            max_minutes: 10.0,
            retry_min_minutes: 1.0,
            retry_max_minutes: 3.0,
        }
    }
}

impl IntervalPolicy {
    pub fn from_config(feed: &FeedConfig) -> Self {
        Self {
            min_minutes: feed.min_interval_minutes,
            max_minutes: feed.max_interval_minutes,
            retry_min_minutes: feed.retry_min_minutes,
            retry_max_minutes: feed.retry_max_minutes,
        }
    }

    pub fn draw_interval(&self, rng: &mut fastrand::Rng) -> f64 {
        uniform(rng, self.min_minutes, self.max_minutes)
    }

    pub fn draw_retry(&self, rng: &mut fastrand::Rng) -> f64 {
        uniform(rng, self.retry_min_minutes, self.retry_max_minutes)
    }
}

fn uniform(rng: &mut fastrand::Rng, low: f64, high: f64) -> f64 {
    low + rng.f64() * (high - low)
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    last_post_time: Option<Instant>,
    next_interval_minutes: f64,
    paused: bool,
}

impl SchedulerState {
    pub fn is_initialized(&self) -> bool {
        self.last_post_time.is_some()
    }

    pub fn initialize(&mut self, now: Instant, policy: &IntervalPolicy, rng: &mut fastrand::Rng) {
        self.last_post_time = Some(now);
        self.next_interval_minutes = policy.draw_interval(rng);
        info!(
            "Initialized scheduler. First post in {:.1} minutes",
            self.next_interval_minutes
        );
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_post_time {
            Some(last) => minutes_between(last, now) >= self.next_interval_minutes,
            None => false,
        }
    }

    pub fn record_success(&mut self, now: Instant, policy: &IntervalPolicy, rng: &mut fastrand::Rng) {
        self.last_post_time = Some(now);
        self.next_interval_minutes = policy.draw_interval(rng);
        info!(
            "Next post scheduled in {:.1} minutes",
            self.next_interval_minutes
        );
    }

    pub fn record_failure(&mut self, now: Instant, policy: &IntervalPolicy, rng: &mut fastrand::Rng) {
        self.last_post_time = Some(now);
        self.next_interval_minutes = policy.draw_retry(rng);
        warn!(
            "Post failed. Retrying in {:.1} minutes",
            self.next_interval_minutes
        );
    }

    /// Time until the next attempt is due, `None` before the first tick.
    pub fn next_post_in(&self, now: Instant) -> Option<Duration> {
        let last = self.last_post_time?;
        let interval = Duration::try_from_secs_f64(self.next_interval_minutes.max(0.0) * 60.0)
            .unwrap_or(Duration::MAX);
        Some(interval.saturating_sub(now.saturating_duration_since(last)))
    }

    pub fn next_interval_minutes(&self) -> f64 {
        self.next_interval_minutes
    }

    /// Makes the next tick attempt a post. Returns false before the first tick.
    pub fn reschedule_now(&mut self) -> bool {
        if !self.is_initialized() {
            return false;
        }
        self.next_interval_minutes = 0.0;
        true
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}

fn minutes_between(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64() / 60.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Initialized,
    Paused,
    Waiting,
    Posted,
    Failed,
}

/// One posting-loop tick. The scheduler lock is not held while publishing.
pub async fn posting_tick<S, C>(publisher: &Publisher<S, C>, policy: &IntervalPolicy) -> TickOutcome
where
    S: ContentSource,
    C: ChannelSink,
{
    let state = publisher.state();
    let mut rng = fastrand::Rng::new();

    {
        let mut scheduler = state.scheduler.lock().await;
        let now = Instant::now();
        if !scheduler.is_initialized() {
            scheduler.initialize(now, policy, &mut rng);
            return TickOutcome::Initialized;
        }
        if scheduler.is_paused() {
            debug!("Scheduler paused, skipping tick");
            return TickOutcome::Paused;
        }
        if !scheduler.is_due(now) {
            return TickOutcome::Waiting;
        }
    }

    let posted = publisher.publish(state.channel).await;

    let mut scheduler = state.scheduler.lock().await;
    let now = Instant::now();
    if posted {
        scheduler.record_success(now, policy, &mut rng);
        TickOutcome::Posted
    } else {
        scheduler.record_failure(now, policy, &mut rng);
        TickOutcome::Failed
    }
}

/// Runs the posting loop until `shutdown` flips to true or its sender drops.
pub async fn run_posting_loop<S, C>(
    publisher: Arc<Publisher<S, C>>,
    policy: IntervalPolicy,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    S: ContentSource,
    C: ChannelSink,
{
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Started meme scheduler (tick every {:?})", tick);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let outcome = posting_tick(&publisher, &policy).await;
                debug!("Scheduler tick: {:?}", outcome);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Meme scheduler stopped");
}

/// Clears vote tracking every `period`, starting one period from now.
pub async fn run_reset_loop(
    state: Arc<FeedPosterState>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                state.votes.reset().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Vote reset loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::tests::{publisher_with, state_with};
    use crate::selector::tests::image;
    use memebot_core::{ActorId, MessageHandle, PostMessage, ReactionKind};

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_draws_stay_in_range() {
        let policy = IntervalPolicy::default();
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..1000 {
            let interval = policy.draw_interval(&mut rng);
            assert!((5.0..=10.0).contains(&interval));
            let retry = policy.draw_retry(&mut rng);
            assert!((1.0..=3.0).contains(&retry));
        }
    }

    #[test]
    fn test_failure_backoff_is_shorter_than_success() {
        let policy = IntervalPolicy::default();
        let mut rng = fastrand::Rng::with_seed(42);
        let now = Instant::now();

        for _ in 0..200 {
            let mut failed = SchedulerState::default();
            failed.record_failure(now, &policy, &mut rng);
            let retry_in = failed.next_post_in(now).unwrap();
            assert!(retry_in >= MINUTE && retry_in <= 3 * MINUTE);

            let mut posted = SchedulerState::default();
            posted.record_success(now, &policy, &mut rng);
            assert!(retry_in < posted.next_post_in(now).unwrap());
        }
    }

    #[test]
    fn test_due_after_interval() {
        let policy = IntervalPolicy::default();
        let mut rng = fastrand::Rng::with_seed(1);
        let start = Instant::now();

        let mut state = SchedulerState::default();
        assert!(!state.is_due(start));
        assert_eq!(state.next_post_in(start), None);

        state.initialize(start, &policy, &mut rng);
        assert!(!state.is_due(start + 4 * MINUTE));
        assert!(state.is_due(start + 10 * MINUTE));
    }

    #[test]
    fn test_huge_interval_does_not_overflow() {
        let now = Instant::now();
        let state = SchedulerState {
            last_post_time: Some(now),
            next_interval_minutes: 1e300,
            paused: false,
        };
        assert_eq!(state.next_post_in(now + MINUTE), Some(Duration::MAX - MINUTE));
        assert!(!state.is_due(now + MINUTE));
    }

    #[test]
    fn test_reschedule_requires_initialization() {
        let mut state = SchedulerState::default();
        assert!(!state.reschedule_now());

        let now = Instant::now();
        state.initialize(now, &IntervalPolicy::default(), &mut fastrand::Rng::new());
        assert!(state.reschedule_now());
        assert!(state.is_due(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_sequence_posts_then_backs_off() {
        let state = state_with(10);
        let publisher = publisher_with(vec![image("only")], state.clone());
        let policy = IntervalPolicy::default();

        assert_eq!(posting_tick(&publisher, &policy).await, TickOutcome::Initialized);
        assert_eq!(posting_tick(&publisher, &policy).await, TickOutcome::Waiting);

        tokio::time::advance(10 * MINUTE).await;
        assert_eq!(posting_tick(&publisher, &policy).await, TickOutcome::Posted);
        let next = state.scheduler.lock().await.next_interval_minutes();
        assert!((5.0..=10.0).contains(&next));

        // The only item is now cached, so the next attempt fails and backs off.
        tokio::time::advance(10 * MINUTE).await;
        assert_eq!(posting_tick(&publisher, &policy).await, TickOutcome::Failed);
        let retry = state.scheduler.lock().await.next_interval_minutes();
        assert!((1.0..=3.0).contains(&retry));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_scheduler_does_nothing() {
        let state = state_with(10);
        let publisher = publisher_with(vec![image("a")], state.clone());
        let policy = IntervalPolicy::default();

        posting_tick(&publisher, &policy).await;
        state.scheduler.lock().await.set_paused(true);
        tokio::time::advance(30 * MINUTE).await;

        assert_eq!(posting_tick(&publisher, &policy).await, TickOutcome::Paused);
        assert!(publisher.sink().sent.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_loop_clears_votes_each_period() {
        let state = state_with(10);
        let handle = MessageHandle("m".to_string());
        state
            .votes
            .register(
                handle.clone(),
                PostMessage {
                    title: "t".to_string(),
                    url: String::new(),
                    image_url: String::new(),
                    color: 0,
                    footer: String::new(),
                    timestamp: chrono::Utc::now(),
                },
            )
            .await;
        state
            .votes
            .on_reaction_added(&handle, ReactionKind::Upvote, &ActorId("u".to_string()))
            .await;

        let (tx, rx) = watch::channel(false);
        let period = Duration::from_secs(24 * 3600);
        let task = tokio::spawn(run_reset_loop(state.clone(), period, rx));

        tokio::time::sleep(period - MINUTE).await;
        assert_eq!(state.votes.tracked_count().await, 1);

        tokio::time::sleep(2 * MINUTE).await;
        assert_eq!(state.votes.tracked_count().await, 0);
        assert!(state.votes.best().await.is_empty());

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_posting_loop_stops_on_shutdown() {
        let state = state_with(10);
        let publisher = Arc::new(publisher_with(vec![image("a")], state.clone()));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(run_posting_loop(
            publisher.clone(),
            IntervalPolicy::default(),
            MINUTE,
            rx,
        ));

        tokio::time::sleep(10 * MINUTE + Duration::from_secs(1)).await;
        assert_eq!(publisher.sink().sent.lock().await.len(), 1);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
