use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{FeedFetcher, FeedSource};
use crate::matcher::{compile_all, match_post, CompiledSubscription};
use crate::models::{NewPost, Post, PushStatus, SettingsSnapshot, StatusUpdate, Subscription};
use crate::services::{DeliverySink, SenderFactory, TelegramSenderFactory};

/// Successful sends between two rate-limit pauses.
const SEND_BATCH: usize = 5;
const SEND_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    /// Left undelivered because push is paused or no destination is set.
    pub held: usize,
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} delivered, {} held back, {} error{}",
            self.delivered,
            self.held,
            self.failed,
            if self.failed == 1 { "" } else { "s" }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub new_posts: usize,
    pub insert_errors: usize,
    pub matched: usize,
    pub no_match: usize,
    pub delivery: DeliveryReport,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors = self.insert_errors + self.delivery.failed;
        write!(
            f,
            "{} new post{}, {} matched, {} delivered, {} held back, {} error{}",
            self.new_posts,
            if self.new_posts == 1 { "" } else { "s" },
            self.matched,
            self.delivery.delivered,
            self.delivery.held,
            errors,
            if errors == 1 { "" } else { "s" }
        )
    }
}

/// Result of a manual push, phrased for the admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub delivered: bool,
    pub message: String,
}

/// A post waiting to go out, with the rule that selected it.
struct Outgoing {
    post: Post,
    subscription: Subscription,
    keywords: Vec<String>,
}

/// Clears the running flag when a cycle ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct App {
    pub repository: Repository,
    source: Arc<dyn FeedSource>,
    senders: Arc<dyn SenderFactory>,
    site_base_url: String,
    retry_undelivered_each_cycle: bool,
    send_pause: Duration,
    running: AtomicBool,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let repository = Repository::new(&config.db_path).await?;
        let fetcher = FeedFetcher::from_config(config)?;
        let senders = TelegramSenderFactory::new(
            &config.telegram_api_base,
            config.request_timeout(),
            config.proxy.as_deref(),
        )?;

        let mut app = Self::with_parts(
            repository,
            Arc::new(fetcher),
            Arc::new(senders),
            &config.site_base_url,
        );
        app.retry_undelivered_each_cycle = config.retry_undelivered_each_cycle;
        Ok(app)
    }

    pub fn with_parts(
        repository: Repository,
        source: Arc<dyn FeedSource>,
        senders: Arc<dyn SenderFactory>,
        site_base_url: &str,
    ) -> Self {
        Self {
            repository,
            source,
            senders,
            site_base_url: site_base_url.to_string(),
            retry_undelivered_each_cycle: false,
            send_pause: SEND_PAUSE,
            running: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    fn with_send_pause(mut self, pause: Duration) -> Self {
        self.send_pause = pause;
        self
    }

    fn try_begin(&self) -> Option<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(&self.running))
    }

    /// Run cycles every `interval` until the future is dropped. A failing
    /// cycle is logged and never stops the loop.
    pub async fn run(&self, interval: Duration) {
        tracing::info!(
            "Pipeline started (poll interval: {} seconds)",
            interval.as_secs()
        );

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;
            match self.run_cycle().await {
                Ok(report) => tracing::info!("Cycle finished: {}", report),
                Err(AppError::CycleInProgress) => {
                    tracing::debug!("Previous cycle still running, tick skipped")
                }
                Err(e) => tracing::error!("Cycle failed: {}", e),
            }
        }
    }

    /// One fetch → insert → match → deliver pass.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let Some(_guard) = self.try_begin() else {
            return Err(AppError::CycleInProgress);
        };

        let mut report = CycleReport::default();

        let fetched = self.source.fetch_posts().await?;
        report.fetched = fetched.len();

        let inserted = self.ingest(fetched).await?;
        report.new_posts = inserted.inserted;
        report.insert_errors = inserted.failed;

        let settings = self.repository.get_settings().await?;
        let subscriptions = compile_all(self.repository.list_subscriptions().await?);

        let (mut outgoing, no_match) = self.match_sweep(&subscriptions, &settings).await?;
        report.matched = outgoing.len();
        report.no_match = no_match;

        if self.retry_undelivered_each_cycle {
            let fresh: HashSet<i64> = outgoing.iter().map(|o| o.post.post_id).collect();
            let stale = self.undelivered(&subscriptions, &settings).await?;
            outgoing.extend(stale.into_iter().filter(|o| !fresh.contains(&o.post.post_id)));
        }

        report.delivery = self.delivery_sweep(outgoing, &settings).await?;
        Ok(report)
    }

    /// Insert the posts that are not stored yet.
    async fn ingest(&self, fetched: Vec<NewPost>) -> Result<crate::db::InsertReport> {
        let mut seen = HashSet::new();
        let candidates: Vec<NewPost> = fetched
            .into_iter()
            .filter(|p| seen.insert(p.post_id))
            .collect();

        let existing = self
            .repository
            .existing_post_ids(candidates.iter().map(|p| p.post_id).collect())
            .await?;
        let unseen: Vec<NewPost> = candidates
            .into_iter()
            .filter(|p| !existing.contains(&p.post_id))
            .collect();

        if unseen.is_empty() {
            tracing::debug!("No new posts");
            return Ok(crate::db::InsertReport::default());
        }

        let report = self.repository.insert_posts(unseen).await?;
        if report.inserted > 0 {
            tracing::info!("Stored {} new post(s)", report.inserted);
        }
        Ok(report)
    }

    /// Decide every pending post, commit all decisions in one batch and
    /// return the posts that became `MatchedUndelivered` plus the number of
    /// `NoMatch` decisions.
    async fn match_sweep(
        &self,
        subscriptions: &[CompiledSubscription],
        settings: &SettingsSnapshot,
    ) -> Result<(Vec<Outgoing>, usize)> {
        let pending = self.repository.get_posts_by_status(PushStatus::Pending).await?;
        if pending.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let mut updates = Vec::with_capacity(pending.len());
        let mut matched = Vec::new();

        if subscriptions.is_empty() {
            tracing::debug!("No subscriptions, {} pending post(s) marked no-match", pending.len());
            updates.extend(pending.iter().map(|p| StatusUpdate::no_match(p.post_id)));
        } else {
            for post in pending {
                let first = match_post(&post, subscriptions, settings).into_iter().next();
                match first {
                    Some(result) => {
                        tracing::debug!(
                            "Post {} matched subscription {} ({})",
                            post.post_id,
                            result.subscription_id,
                            result.match_type
                        );
                        updates.push(StatusUpdate::matched(post.post_id, result.subscription_id));
                        let subscription = subscriptions
                            .iter()
                            .find(|s| s.id() == result.subscription_id)
                            .map(|s| s.subscription.clone());
                        if let Some(subscription) = subscription {
                            matched.push(Outgoing {
                                post,
                                subscription,
                                keywords: result.matched_keywords,
                            });
                        }
                    }
                    None => updates.push(StatusUpdate::no_match(post.post_id)),
                }
            }
        }

        let changed: HashSet<i64> = self
            .repository
            .update_post_statuses(updates)
            .await?
            .into_iter()
            .collect();

        let matched: Vec<Outgoing> = matched
            .into_iter()
            .filter(|o| changed.contains(&o.post.post_id))
            .map(|mut o| {
                o.post.push_status = PushStatus::MatchedUndelivered;
                o.post.matched_subscription_id = Some(o.subscription.id);
                o
            })
            .collect();
        let no_match = changed.len() - matched.len();

        Ok((matched, no_match))
    }

    /// Posts still `MatchedUndelivered`, joined with their subscription.
    /// Posts whose subscription was deleted are skipped.
    async fn undelivered(
        &self,
        subscriptions: &[CompiledSubscription],
        settings: &SettingsSnapshot,
    ) -> Result<Vec<Outgoing>> {
        let posts = self
            .repository
            .get_posts_by_status(PushStatus::MatchedUndelivered)
            .await?;

        let outgoing = posts
            .into_iter()
            .filter_map(|post| {
                let sub_id = post.matched_subscription_id?;
                let Some(compiled) = subscriptions.iter().find(|s| s.id() == sub_id) else {
                    tracing::warn!(
                        "Post {} matched subscription {} which no longer exists",
                        post.post_id,
                        sub_id
                    );
                    return None;
                };
                let keywords = keywords_for(compiled, &post, settings);
                Some(Outgoing {
                    post,
                    subscription: compiled.subscription.clone(),
                    keywords,
                })
            })
            .collect();
        Ok(outgoing)
    }

    /// Send each post once, marking successes `Delivered` as they happen.
    async fn delivery_sweep(
        &self,
        outgoing: Vec<Outgoing>,
        settings: &SettingsSnapshot,
    ) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::default();
        if outgoing.is_empty() {
            return Ok(report);
        }

        if settings.stop_push {
            tracing::info!("Push is paused, {} matched post(s) left undelivered", outgoing.len());
            report.held = outgoing.len();
            return Ok(report);
        }
        let Some((destination, token)) = settings.delivery_target() else {
            tracing::warn!(
                "No chat bound or no bot token set, {} matched post(s) left undelivered",
                outgoing.len()
            );
            report.held = outgoing.len();
            return Ok(report);
        };

        let sink = DeliverySink::new(self.senders.sender(token), &self.site_base_url);
        let total = outgoing.len();
        for (index, item) in outgoing.into_iter().enumerate() {
            let sent = sink
                .deliver(destination, &item.post, &item.subscription, &item.keywords)
                .await;
            if !sent {
                report.failed += 1;
                continue;
            }

            let update = StatusUpdate::delivered(item.post.post_id, item.subscription.id, Utc::now());
            if let Err(e) = self.repository.update_post_statuses(vec![update]).await {
                tracing::warn!(
                    "Post {} was sent but could not be marked delivered: {}",
                    item.post.post_id,
                    e
                );
            }
            report.delivered += 1;

            let more_to_send = index + 1 < total;
            if report.delivered % SEND_BATCH == 0 && more_to_send {
                tokio::time::sleep(self.send_pause).await;
            }
        }

        Ok(report)
    }

    /// Deliver every post still waiting in `MatchedUndelivered`.
    pub async fn retry_undelivered(&self) -> Result<DeliveryReport> {
        let Some(_guard) = self.try_begin() else {
            return Err(AppError::CycleInProgress);
        };

        let settings = self.repository.get_settings().await?;
        let subscriptions = compile_all(self.repository.list_subscriptions().await?);
        let outgoing = self.undelivered(&subscriptions, &settings).await?;

        self.delivery_sweep(outgoing, &settings).await
    }

    /// Send one post for one subscription outside the periodic sweep.
    pub async fn push_post(&self, post_id: i64, subscription_id: i64) -> Result<PushOutcome> {
        let post = self
            .repository
            .get_post(post_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("post {}", post_id)))?;
        let subscription = self
            .repository
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("subscription {}", subscription_id)))?;
        let settings = self.repository.get_settings().await?;

        if settings.stop_push {
            return Ok(PushOutcome {
                delivered: false,
                message: "Push is paused; nothing was sent".to_string(),
            });
        }
        let Some((destination, token)) = settings.delivery_target() else {
            return Ok(PushOutcome {
                delivered: false,
                message: "No chat bound or no bot token set; nothing was sent".to_string(),
            });
        };

        let compiled = CompiledSubscription::compile(subscription);
        let keywords = keywords_for(&compiled, &post, &settings);
        let sink = DeliverySink::new(self.senders.sender(token), &self.site_base_url);

        if !sink
            .deliver(destination, &post, &compiled.subscription, &keywords)
            .await
        {
            return Ok(PushOutcome {
                delivered: false,
                message: format!("Post {} could not be delivered", post_id),
            });
        }

        if post.push_status == PushStatus::MatchedUndelivered {
            self.repository
                .update_post_statuses(vec![StatusUpdate::delivered(
                    post_id,
                    subscription_id,
                    Utc::now(),
                )])
                .await?;
        }

        Ok(PushOutcome {
            delivered: true,
            message: format!("Post {} delivered", post_id),
        })
    }

    /// Ask the bot who it is, using the stored credential.
    pub async fn check_bot(&self) -> Result<String> {
        let settings = self.repository.get_settings().await?;
        let token = settings
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Config("no bot token configured".to_string()))?;
        self.senders.sender(token).identity().await
    }
}

/// Keywords to show for a post: the ones that matched now, or the rule's
/// own keywords if it no longer matches.
fn keywords_for(
    compiled: &CompiledSubscription,
    post: &Post,
    settings: &SettingsSnapshot,
) -> Vec<String> {
    compiled
        .evaluate(post, settings)
        .map(|r| r.matched_keywords)
        .unwrap_or_else(|| {
            compiled
                .keywords()
                .iter()
                .map(|k| k.text().to_string())
                .collect()
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;
    use futures::future::BoxFuture;

    use super::*;
    use crate::error::FetchError;
    use crate::models::{NewSubscription, SettingsUpdate};
    use crate::services::MessageSender;

    struct StaticFeed {
        posts: Mutex<Vec<NewPost>>,
        fail: bool,
    }

    impl StaticFeed {
        fn new(posts: Vec<NewPost>) -> Self {
            Self {
                posts: Mutex::new(posts),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                posts: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    impl FeedSource for StaticFeed {
        fn fetch_posts(&self) -> BoxFuture<'_, Result<Vec<NewPost>>> {
            let result = if self.fail {
                Err(AppError::Fetch(FetchError::Timeout))
            } else {
                Ok(self.posts.lock().unwrap().clone())
            };
            Box::pin(async move { result })
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
        reject: bool,
    }

    impl MessageSender for RecordingSender {
        fn send<'a>(&'a self, destination: &'a str, text: &'a str) -> BoxFuture<'a, bool> {
            self.sent
                .lock()
                .unwrap()
                .push((destination.to_string(), text.to_string()));
            let ok = !self.reject;
            Box::pin(async move { ok })
        }

        fn identity(&self) -> BoxFuture<'_, Result<String>> {
            Box::pin(async { Ok("@test_bot".to_string()) })
        }
    }

    struct RecordingFactory(Arc<RecordingSender>);

    impl SenderFactory for RecordingFactory {
        fn sender(&self, _credential: &str) -> Arc<dyn MessageSender> {
            Arc::clone(&self.0) as Arc<dyn MessageSender>
        }
    }

    fn new_post(post_id: i64, title: &str, creator: &str) -> NewPost {
        NewPost {
            post_id,
            title: title.to_string(),
            summary: String::new(),
            content: String::new(),
            category: "trade".to_string(),
            creator: creator.to_string(),
            pub_date: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    async fn app_with(feed: StaticFeed, sender: Arc<RecordingSender>) -> App {
        let repository = Repository::open_in_memory().await.unwrap();
        App::with_parts(
            repository,
            Arc::new(feed),
            Arc::new(RecordingFactory(sender)),
            "https://www.nodeseek.com",
        )
        .with_send_pause(Duration::ZERO)
    }

    async fn bind(app: &App) {
        app.repository
            .update_settings(SettingsUpdate {
                bound_chat_id: Some(Some("42".to_string())),
                bot_token: Some(Some("123:abc".to_string())),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    async fn subscribe(app: &App, keywords: &[&str], creator: Option<&str>) -> Subscription {
        app.repository
            .insert_subscription(NewSubscription {
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                creator: creator.map(String::from),
                category: None,
            })
            .await
            .unwrap()
    }

    async fn status_of(app: &App, post_id: i64) -> Post {
        app.repository.get_post(post_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn known_posts_are_skipped_and_new_ones_evaluated() {
        let sender = Arc::new(RecordingSender::default());
        let feed = StaticFeed::new(vec![
            new_post(101, "one", "a"),
            new_post(102, "two", "b"),
            new_post(103, "three", "c"),
        ]);
        let app = app_with(feed, sender).await;
        app.repository
            .insert_posts(vec![new_post(102, "two", "b")])
            .await
            .unwrap();
        app.repository
            .update_post_statuses(vec![StatusUpdate::no_match(102)])
            .await
            .unwrap();

        let report = app.run_cycle().await.unwrap();

        assert_eq!(report.fetched, 3);
        assert_eq!(report.new_posts, 2);
        // No subscriptions: both new posts go straight to no-match.
        assert_eq!(report.no_match, 2);
        for id in [101, 102, 103] {
            assert_eq!(status_of(&app, id).await.push_status, PushStatus::NoMatch);
        }
    }

    #[tokio::test]
    async fn repeated_cycles_insert_once() {
        let sender = Arc::new(RecordingSender::default());
        let app = app_with(StaticFeed::new(vec![new_post(1, "gpu", "x")]), Arc::clone(&sender)).await;
        bind(&app).await;
        subscribe(&app, &["gpu"], None).await;

        let first = app.run_cycle().await.unwrap();
        let second = app.run_cycle().await.unwrap();

        assert_eq!(first.new_posts, 1);
        assert_eq!(first.delivery.delivered, 1);
        assert_eq!(second, CycleReport { fetched: 1, ..Default::default() });
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn matching_post_is_delivered() {
        let sender = Arc::new(RecordingSender::default());
        let feed = StaticFeed::new(vec![new_post(7, "Cheap GPU deal", "alice2024")]);
        let app = app_with(feed, Arc::clone(&sender)).await;
        bind(&app).await;
        let sub = subscribe(&app, &["GPU"], Some("alice")).await;

        let report = app.run_cycle().await.unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.delivery.delivered, 1);
        let post = status_of(&app, 7).await;
        assert_eq!(post.push_status, PushStatus::Delivered);
        assert_eq!(post.matched_subscription_id, Some(sub.id));
        assert!(post.delivered_at.is_some());

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent[0].0, "42");
        assert!(sent[0].1.contains("https://www.nodeseek.com/post-7-1"));
    }

    #[tokio::test]
    async fn first_match_wins_is_the_newest_subscription() {
        for _ in 0..3 {
            let sender = Arc::new(RecordingSender::default());
            let app = app_with(StaticFeed::new(vec![new_post(1, "gpu vps", "x")]), sender).await;
            let _older = subscribe(&app, &["gpu"], None).await;
            let newer = subscribe(&app, &["vps"], None).await;

            app.run_cycle().await.unwrap();

            let post = status_of(&app, 1).await;
            assert_eq!(post.matched_subscription_id, Some(newer.id));
        }
    }

    #[tokio::test]
    async fn stop_push_holds_matches_without_sending() {
        let sender = Arc::new(RecordingSender::default());
        let app = app_with(StaticFeed::new(vec![new_post(1, "gpu", "x")]), Arc::clone(&sender)).await;
        bind(&app).await;
        subscribe(&app, &["gpu"], None).await;
        app.repository
            .update_settings(SettingsUpdate {
                stop_push: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let report = app.run_cycle().await.unwrap();

        assert_eq!(report.delivery.held, 1);
        assert_eq!(status_of(&app, 1).await.push_status, PushStatus::MatchedUndelivered);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unbound_destination_holds_matches() {
        let sender = Arc::new(RecordingSender::default());
        let app = app_with(StaticFeed::new(vec![new_post(1, "gpu", "x")]), Arc::clone(&sender)).await;
        subscribe(&app, &["gpu"], None).await;

        let report = app.run_cycle().await.unwrap();

        assert_eq!(report.delivery.held, 1);
        assert_eq!(status_of(&app, 1).await.push_status, PushStatus::MatchedUndelivered);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_stays_undelivered_and_is_not_resent_next_cycle() {
        let sender = Arc::new(RecordingSender {
            reject: true,
            ..Default::default()
        });
        let app = app_with(StaticFeed::new(vec![new_post(1, "gpu", "x")]), Arc::clone(&sender)).await;
        bind(&app).await;
        subscribe(&app, &["gpu"], None).await;

        let first = app.run_cycle().await.unwrap();
        let second = app.run_cycle().await.unwrap();

        assert_eq!(first.delivery.failed, 1);
        assert_eq!(second.delivery, DeliveryReport::default());
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
        assert_eq!(status_of(&app, 1).await.push_status, PushStatus::MatchedUndelivered);
    }

    #[tokio::test]
    async fn retry_undelivered_picks_up_held_posts() {
        let sender = Arc::new(RecordingSender::default());
        let app = app_with(StaticFeed::new(vec![new_post(1, "gpu", "x")]), Arc::clone(&sender)).await;
        subscribe(&app, &["gpu"], None).await;
        app.run_cycle().await.unwrap();
        assert_eq!(status_of(&app, 1).await.push_status, PushStatus::MatchedUndelivered);

        bind(&app).await;
        let report = app.retry_undelivered().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(status_of(&app, 1).await.push_status, PushStatus::Delivered);
        assert!(sender.sent.lock().unwrap()[0].1.contains("gpu"));
    }

    #[tokio::test]
    async fn retry_each_cycle_when_enabled() {
        let sender = Arc::new(RecordingSender::default());
        let mut app = app_with(StaticFeed::new(vec![new_post(1, "gpu", "x")]), Arc::clone(&sender)).await;
        app.retry_undelivered_each_cycle = true;
        subscribe(&app, &["gpu"], None).await;
        app.run_cycle().await.unwrap();

        bind(&app).await;
        let report = app.run_cycle().await.unwrap();

        assert_eq!(report.new_posts, 0);
        assert_eq!(report.delivery.delivered, 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_store_untouched() {
        let sender = Arc::new(RecordingSender::default());
        let app = app_with(StaticFeed::failing(), sender).await;

        let err = app.run_cycle().await.unwrap_err();

        assert!(matches!(err, AppError::Fetch(FetchError::Timeout)));
        assert!(app
            .repository
            .get_posts_by_status(PushStatus::Pending)
            .await
            .unwrap()
            .is_empty());
        // The running flag is released after a failed cycle.
        assert!(app.run_cycle().await.is_err());
        assert!(app.try_begin().is_some());
    }

    #[tokio::test]
    async fn overlapping_cycle_is_refused() {
        let sender = Arc::new(RecordingSender::default());
        let app = app_with(StaticFeed::new(vec![]), sender).await;

        let guard = app.try_begin().unwrap();
        assert!(matches!(app.run_cycle().await, Err(AppError::CycleInProgress)));
        drop(guard);

        tokio_test::assert_ok!(app.run_cycle().await);
    }

    #[tokio::test]
    async fn more_than_one_batch_of_sends() {
        let sender = Arc::new(RecordingSender::default());
        let posts = (1..=7).map(|id| new_post(id, "gpu", "x")).collect();
        let app = app_with(StaticFeed::new(posts), Arc::clone(&sender)).await;
        bind(&app).await;
        subscribe(&app, &["gpu"], None).await;

        let report = app.run_cycle().await.unwrap();

        assert_eq!(report.delivery.delivered, 7);
        assert_eq!(sender.sent.lock().unwrap().len(), 7);
    }

    async fn timed_sweep(post_count: i64) -> (CycleReport, Duration) {
        let sender = Arc::new(RecordingSender::default());
        let posts = (1..=post_count).map(|id| new_post(id, "gpu", "x")).collect();
        let app = app_with(StaticFeed::new(posts), sender)
            .await
            .with_send_pause(Duration::from_secs(1));
        bind(&app).await;
        subscribe(&app, &["gpu"], None).await;

        let start = tokio::time::Instant::now();
        let report = app.run_cycle().await.unwrap();
        (report, start.elapsed())
    }

    #[tokio::test(start_paused = true)]
    async fn sends_pause_between_batches_of_five() {
        let (report, elapsed) = timed_sweep(7).await;

        assert_eq!(report.delivery.delivered, 7);
        assert!(elapsed >= Duration::from_secs(1), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn no_pause_after_the_last_send() {
        // Ten sends: one pause after the fifth, none after the tenth.
        let (report, elapsed) = timed_sweep(10).await;
        assert_eq!(report.delivery.delivered, 10);
        assert!(elapsed >= Duration::from_secs(1), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "elapsed {:?}", elapsed);

        let (report, elapsed) = timed_sweep(5).await;
        assert_eq!(report.delivery.delivered, 5);
        assert!(elapsed < Duration::from_secs(1), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn manual_push_respects_stop_push_and_marks_delivered() {
        let sender = Arc::new(RecordingSender::default());
        let app = app_with(StaticFeed::new(vec![new_post(1, "Free (RTX) [deal]", "x")]), Arc::clone(&sender)).await;
        let sub = subscribe(&app, &["rtx"], None).await;
        app.repository
            .update_settings(SettingsUpdate {
                stop_push: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        bind(&app).await;
        app.run_cycle().await.unwrap();

        let paused = app.push_post(1, sub.id).await.unwrap();
        assert!(!paused.delivered);
        assert!(sender.sent.lock().unwrap().is_empty());

        app.repository
            .update_settings(SettingsUpdate {
                stop_push: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        let outcome = app.push_post(1, sub.id).await.unwrap();

        assert!(outcome.delivered);
        assert_eq!(status_of(&app, 1).await.push_status, PushStatus::Delivered);
        let sent = sender.sent.lock().unwrap();
        assert!(sent[0].1.contains("[Free （RTX） ［deal］](https://www.nodeseek.com/post-1-1)"));
    }

    #[tokio::test]
    async fn manual_push_of_unknown_post_is_not_found() {
        let sender = Arc::new(RecordingSender::default());
        let app = app_with(StaticFeed::new(vec![]), sender).await;
        let sub = subscribe(&app, &["x"], None).await;

        assert!(matches!(app.push_post(999, sub.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn check_bot_needs_a_token() {
        let sender = Arc::new(RecordingSender::default());
        let app = app_with(StaticFeed::new(vec![]), sender).await;

        assert!(matches!(app.check_bot().await, Err(AppError::Config(_))));
        bind(&app).await;
        assert_eq!(app.check_bot().await.unwrap(), "@test_bot");
    }

    #[test]
    fn report_wording() {
        let report = CycleReport {
            fetched: 3,
            new_posts: 2,
            insert_errors: 0,
            matched: 1,
            no_match: 1,
            delivery: DeliveryReport {
                delivered: 0,
                failed: 1,
                held: 0,
            },
        };
        assert_eq!(
            report.to_string(),
            "2 new posts, 1 matched, 0 delivered, 0 held back, 1 error"
        );
    }
}
