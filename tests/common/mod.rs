// tests/common/mod.rs
//
// In-memory fakes for the three capabilities the watch loop talks to.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::time::Instant;

use xcryptowatch::analyze::{Classifier, ModelClient};
use xcryptowatch::config::{Config, EmailConfig, SharedConfig};
use xcryptowatch::error::{ClassifyError, ErrorCategory, FetchError};
use xcryptowatch::notify::{Envelope, NotifierMux, Sink};
use xcryptowatch::watch::{Platform, Post, PostSource, WatchContext, WatchPolicy, WatchedAccount};

/// Created well after any watermark a test can produce.
pub fn fresh(id: &str, text: &str) -> Post {
    Post {
        id: id.to_string(),
        text: text.to_string(),
        created_at: Utc::now() + TimeDelta::hours(1),
    }
}

/// Created before the first watermark.
pub fn stale(id: &str, text: &str) -> Post {
    Post {
        id: id.to_string(),
        text: text.to_string(),
        created_at: Utc::now() - TimeDelta::days(1),
    }
}

pub fn shared_config(platform: Platform, accounts: &[&str]) -> SharedConfig {
    let mut cfg = Config::default();
    for a in accounts {
        cfg.watch_accounts.push(WatchedAccount::new(*a, platform));
    }
    cfg.email = EmailConfig {
        from_email: "bot@example.com".into(),
        to_email: vec!["ops@example.com".into()],
        ..Default::default()
    };
    Arc::new(RwLock::new(cfg))
}

// ---------- PostSource ----------

#[derive(Debug, Clone)]
pub struct FetchCall {
    pub username: String,
    pub created_after: DateTime<Utc>,
    pub at: Instant,
}

pub struct ScriptedSource {
    platform: Platform,
    scripts: Mutex<HashMap<String, VecDeque<Result<Vec<Post>, FetchError>>>>,
    /// Returned once an account's script is exhausted.
    fallback: Mutex<HashMap<String, Vec<Post>>>,
    calls: Mutex<Vec<FetchCall>>,
    probe_ok: bool,
}

impl ScriptedSource {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            probe_ok: true,
        }
    }

    pub fn failing_probe(mut self) -> Self {
        self.probe_ok = false;
        self
    }

    pub fn then(self, username: &str, result: Result<Vec<Post>, FetchError>) -> Self {
        self.scripts
            .lock()
            .entry(username.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn always(self, username: &str, posts: Vec<Post>) -> Self {
        self.fallback.lock().insert(username.to_string(), posts);
        self
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, username: &str) -> Vec<FetchCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.username == username)
            .collect()
    }
}

#[async_trait]
impl PostSource for ScriptedSource {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn list_recent_posts(
        &self,
        username: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Post>, FetchError> {
        self.calls.lock().push(FetchCall {
            username: username.to_string(),
            created_after,
            at: Instant::now(),
        });
        let next = self
            .scripts
            .lock()
            .get_mut(username)
            .and_then(|q| q.pop_front());
        match next {
            Some(result) => result,
            None => Ok(self.fallback.lock().get(username).cloned().unwrap_or_default()),
        }
    }

    async fn probe(&self) -> Result<(), FetchError> {
        if self.probe_ok {
            Ok(())
        } else {
            Err(FetchError::Unauthorized("bad token".into()))
        }
    }
}

// ---------- ModelClient ----------

#[derive(Clone)]
pub enum Scripted {
    Reply(&'static str),
    Fail(ErrorCategory),
}

pub struct ScriptedModel {
    replies: HashMap<String, (Scripted, Duration)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedModel {
    /// Anything unscripted answers "nothing" immediately.
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(self, text: &str, reply: Scripted) -> Self {
        self.on_after(text, reply, Duration::ZERO)
    }

    pub fn on_after(mut self, text: &str, reply: Scripted, delay: Duration) -> Self {
        self.replies.insert(text.to_string(), (reply, delay));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

fn error_for(cat: ErrorCategory) -> ClassifyError {
    match cat {
        ErrorCategory::Auth => ClassifyError::Auth,
        ErrorCategory::PermissionDenied => ClassifyError::PermissionDenied,
        ErrorCategory::RateLimited => ClassifyError::RateLimited,
        ErrorCategory::BadRequest => ClassifyError::BadRequest("bad".into()),
        ErrorCategory::Unavailable => ClassifyError::Unavailable("down".into()),
        ErrorCategory::Timeout => ClassifyError::Timeout,
        ErrorCategory::Transport => ClassifyError::Transport("reset".into()),
        ErrorCategory::Malformed => ClassifyError::Malformed("no choices".into()),
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, text: &str) -> Result<String, ClassifyError> {
        self.calls.lock().push(text.to_string());
        let (reply, delay) = self
            .replies
            .get(text)
            .cloned()
            .unwrap_or((Scripted::Reply("nothing"), Duration::ZERO));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Scripted::Reply(r) => Ok(r.to_string()),
            Scripted::Fail(cat) => Err(error_for(cat)),
        }
    }

    async fn probe(&self) -> Result<(), ClassifyError> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

// ---------- Sinks ----------

#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Envelope>>,
}

impl RecordingSink {
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.delivered.lock().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.envelopes().into_iter().map(|e| e.body).collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, envelope: &Envelope) -> anyhow::Result<()> {
        self.delivered.lock().push(envelope.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FailingSink {
    attempts: Mutex<usize>,
}

impl FailingSink {
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl Sink for FailingSink {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn deliver(&self, _envelope: &Envelope) -> anyhow::Result<()> {
        *self.attempts.lock() += 1;
        anyhow::bail!("connection refused")
    }
}

// ---------- Wiring ----------

pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub model: Arc<ScriptedModel>,
    pub sink: Arc<RecordingSink>,
    pub config: SharedConfig,
    pub ctx: WatchContext,
}

pub fn harness(
    platform: Platform,
    accounts: &[&str],
    source: ScriptedSource,
    model: ScriptedModel,
) -> Harness {
    let source = Arc::new(source);
    let model = Arc::new(model);
    let sink = Arc::new(RecordingSink::default());
    let config = shared_config(platform, accounts);
    let ctx = WatchContext {
        platform,
        source: source.clone(),
        classifier: Arc::new(Classifier::new(model.clone())),
        notifier: Arc::new(NotifierMux::with_sinks(vec![sink.clone() as Arc<dyn Sink>])),
        config: config.clone(),
        policy: WatchPolicy::from_minutes(1),
    };
    Harness {
        source,
        model,
        sink,
        config,
        ctx,
    }
}
