// src/watch/engine.rs
//! Per-platform watch loop.
//!
//! One `WatchLoop` polls every watched account of its platform in list order,
//! filters candidates through its own `DedupWindow`, classifies the batch and
//! notifies on findings, then sleeps for the check interval. Nothing it meets
//! at runtime is fatal; the loop only ends when its token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dedup::DedupWindow;
use super::types::{Finding, Platform, Post, PostSource};
use crate::analyze::{Classifier, Outcome};
use crate::config::SharedConfig;
use crate::error::FetchError;
use crate::notify::NotifierMux;

pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(15 * 60);
pub const ERROR_COOLDOWN: Duration = Duration::from_secs(60);

/// Timing knobs, fixed for the lifetime of one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchPolicy {
    pub interval: Duration,
    pub rate_limit_cooldown: Duration,
    pub error_cooldown: Duration,
}

impl WatchPolicy {
    pub fn from_minutes(check_interval: u64) -> Self {
        Self {
            interval: Duration::from_secs(check_interval.max(1) * 60),
            rate_limit_cooldown: RATE_LIMIT_COOLDOWN,
            error_cooldown: ERROR_COOLDOWN,
        }
    }

    pub fn cooldown_for(&self, err: &FetchError) -> Duration {
        if err.is_rate_limited() {
            self.rate_limit_cooldown
        } else {
            self.error_cooldown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Polling,
    Classifying,
    Notifying,
    Sleeping,
    Cancelled,
    Failed,
}

/// Everything a loop needs from the outside.
#[derive(Clone)]
pub struct WatchContext {
    pub platform: Platform,
    pub source: Arc<dyn PostSource>,
    pub classifier: Arc<Classifier>,
    pub notifier: Arc<NotifierMux>,
    pub config: SharedConfig,
    pub policy: WatchPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub accounts: usize,
    pub fetched: usize,
    pub new_posts: usize,
    pub findings: usize,
    pub fetch_errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopExit {
    pub cycles: u64,
}

pub struct WatchLoop {
    ctx: WatchContext,
    dedup: DedupWindow,
    /// Start of the previous scan; only posts created after it are new.
    watermark: DateTime<Utc>,
    phase: watch::Sender<Phase>,
}

impl WatchLoop {
    pub fn new(ctx: WatchContext) -> Self {
        let lookback = TimeDelta::from_std(ctx.policy.interval).unwrap_or(TimeDelta::minutes(15));
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            watermark: Utc::now() - lookback,
            dedup: DedupWindow::with_capacity(0),
            ctx,
            phase,
        }
    }

    pub fn platform(&self) -> Platform {
        self.ctx.platform
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }

    /// Run until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> LoopExit {
        let platform = self.ctx.platform;
        info!(
            target: "watch",
            platform = platform.as_str(),
            interval_secs = self.ctx.policy.interval.as_secs(),
            "watch loop started"
        );

        let started = format!("Starting new {platform} watch at {}.", Utc::now());
        let email = self.ctx.config.read().await.email.clone();
        let notifier = Arc::clone(&self.ctx.notifier);
        let mut cycles = 0u64;

        let announced = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = notifier.notify_status(&started, &email) => true,
        };

        if announced {
            while let Some(report) = self.cycle(&cancel).await {
                cycles += 1;
                info!(
                    target: "watch",
                    platform = platform.as_str(),
                    cycle = cycles,
                    accounts = report.accounts,
                    fetched = report.fetched,
                    new_posts = report.new_posts,
                    findings = report.findings,
                    fetch_errors = report.fetch_errors,
                    "cycle finished"
                );

                self.set_phase(Phase::Sleeping);
                debug!(target: "watch", platform = platform.as_str(), "sleeping until next check");
                if !pause(&cancel, self.ctx.policy.interval).await {
                    break;
                }
            }
        }

        self.set_phase(Phase::Cancelled);
        info!(target: "watch", platform = platform.as_str(), cycles, "watch loop cancelled");
        LoopExit { cycles }
    }

    /// One pass over every account of this platform. `None` means cancelled.
    pub async fn cycle(&mut self, cancel: &CancellationToken) -> Option<CycleReport> {
        let platform = self.ctx.platform;
        let cycle_start = Utc::now();
        counter!("watch_cycles_total", "platform" => platform.as_str()).increment(1);

        let accounts = self.ctx.config.read().await.accounts_for(platform);
        self.dedup.resize_for_accounts(accounts.len());

        let mut report = CycleReport {
            accounts: accounts.len(),
            ..Default::default()
        };
        let mut batch: Vec<Post> = Vec::new();

        self.set_phase(Phase::Polling);
        for account in &accounts {
            info!(target: "watch", platform = platform.as_str(), account = %account.username, "fetching posts");
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                r = self.ctx.source.list_recent_posts(&account.username, self.watermark) => r,
            };

            match fetched {
                Ok(posts) if posts.is_empty() => {
                    info!(target: "watch", platform = platform.as_str(), account = %account.username, "no new posts");
                }
                Ok(posts) => {
                    report.fetched += posts.len();
                    counter!("watch_posts_fetched_total", "platform" => platform.as_str())
                        .increment(posts.len() as u64);
                    for post in posts {
                        if post.created_at > self.watermark && !self.dedup.seen(&post.id) {
                            self.dedup.record(post.id.clone());
                            batch.push(post);
                        }
                    }
                }
                Err(err) => {
                    report.fetch_errors += 1;
                    counter!("watch_fetch_errors_total", "platform" => platform.as_str(), "kind" => err.kind())
                        .increment(1);
                    let cooldown = self.ctx.policy.cooldown_for(&err);
                    warn!(
                        target: "watch",
                        platform = platform.as_str(),
                        account = %account.username,
                        error = %err,
                        cooldown_secs = cooldown.as_secs(),
                        "fetch failed, cooling down before next account"
                    );
                    if !pause(cancel, cooldown).await {
                        return None;
                    }
                    self.set_phase(Phase::Polling);
                }
            }
        }
        self.watermark = cycle_start;

        report.new_posts = batch.len();
        counter!("watch_posts_new_total", "platform" => platform.as_str()).increment(batch.len() as u64);
        if batch.is_empty() {
            return Some(report);
        }

        self.set_phase(Phase::Classifying);
        info!(target: "watch", platform = platform.as_str(), posts = batch.len(), "classifying new posts");
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            o = self.ctx.classifier.classify_batch(&texts) => o,
        };

        let findings: Vec<Finding> = batch
            .into_iter()
            .zip(outcomes)
            .filter_map(|(post, outcome)| match outcome {
                Outcome::Relevant(narrative) => Some(Finding {
                    source_post: post.text,
                    narrative,
                }),
                Outcome::Irrelevant | Outcome::Error(_) => None,
            })
            .collect();
        report.findings = findings.len();
        if findings.is_empty() {
            return Some(report);
        }

        self.set_phase(Phase::Notifying);
        let email = self.ctx.config.read().await.email.clone();
        for finding in &findings {
            debug!(target: "watch", platform = platform.as_str(), post = %finding.source_post, "forwarding finding");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = self.ctx.notifier.notify_analysis(&finding.narrative, &email) => {}
            }
        }

        Some(report)
    }
}

/// Sleep for `dur` unless cancelled first; `false` means cancelled.
pub async fn pause(cancel: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(dur) => true,
    }
}
