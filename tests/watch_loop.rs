// tests/watch_loop.rs
//
// Cycle-level behaviour of WatchLoop against scripted fakes. Cooldown and
// interval tests run on tokio's paused clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use xcryptowatch::error::{ErrorCategory, FetchError};
use xcryptowatch::notify::{NotifierMux, Sink, STATUS_SUBJECT};
use xcryptowatch::watch::engine::{ERROR_COOLDOWN, RATE_LIMIT_COOLDOWN};
use xcryptowatch::watch::{Phase, Platform, WatchLoop, WatchedAccount};

#[tokio::test]
async fn second_cycle_only_classifies_the_unseen_post() {
    let source = ScriptedSource::new(Platform::Twitter)
        .then(
            "alice",
            Ok(vec![fresh("a1", "gm frens"), fresh("a2", "Buying more BTC today")]),
        )
        .then(
            "alice",
            Ok(vec![fresh("a1", "gm frens"), fresh("a3", "ETH looks weak")]),
        );
    let model = ScriptedModel::new().on(
        "Buying more BTC today",
        Scripted::Reply("Positive on BTC, in line with this week's rally."),
    );
    let h = harness(Platform::Twitter, &["alice", "bob"], source, model);
    let mut wl = WatchLoop::new(h.ctx.clone());
    let cancel = CancellationToken::new();

    let r1 = wl.cycle(&cancel).await.expect("cycle 1");
    assert_eq!(r1.accounts, 2);
    assert_eq!(r1.new_posts, 2);
    assert_eq!(r1.findings, 1);
    assert_eq!(h.model.calls(), vec!["gm frens", "Buying more BTC today"]);

    let sent = h.sink.envelopes();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "XCryptoWatch Analysis");
    assert_eq!(sent[0].body, "Positive on BTC, in line with this week's rally.");
    assert_eq!(sent[0].to, vec!["ops@example.com".to_string()]);

    let r2 = wl.cycle(&cancel).await.expect("cycle 2");
    assert_eq!(r2.fetched, 2);
    assert_eq!(r2.new_posts, 1);
    assert_eq!(r2.findings, 0);
    assert_eq!(
        h.model.calls(),
        vec!["gm frens", "Buying more BTC today", "ETH looks weak"]
    );
    assert_eq!(h.sink.envelopes().len(), 1);
    assert_eq!(h.source.calls_for("bob").len(), 2);
}

#[tokio::test]
async fn watermark_moves_to_previous_cycle_start() {
    let h = harness(
        Platform::Bluesky,
        &["alice.bsky.social"],
        ScriptedSource::new(Platform::Bluesky),
        ScriptedModel::new(),
    );
    let mut wl = WatchLoop::new(h.ctx.clone());
    let cancel = CancellationToken::new();
    let initial = wl.watermark();
    assert!(initial <= chrono::Utc::now() - chrono::TimeDelta::seconds(59));

    wl.cycle(&cancel).await.expect("cycle 1");
    wl.cycle(&cancel).await.expect("cycle 2");

    let calls = h.source.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].created_after, initial);
    assert!(calls[1].created_after > calls[0].created_after);
    assert!(wl.watermark() >= calls[1].created_after);
}

#[tokio::test]
async fn posts_older_than_watermark_are_ignored() {
    let source = ScriptedSource::new(Platform::Truth).always(
        "alice",
        vec![stale("old", "BTC to 100k"), fresh("new", "weather is nice")],
    );
    let h = harness(Platform::Truth, &["alice"], source, ScriptedModel::new());
    let mut wl = WatchLoop::new(h.ctx.clone());

    let r = wl.cycle(&CancellationToken::new()).await.expect("cycle");
    assert_eq!(r.fetched, 2);
    assert_eq!(r.new_posts, 1);
    assert_eq!(h.model.calls(), vec!["weather is nice"]);
    assert!(!wl.dedup().seen("old"));
}

#[tokio::test(start_paused = true)]
async fn rate_limit_pauses_without_skipping_other_accounts() {
    let source = ScriptedSource::new(Platform::Twitter)
        .then("alice", Err(FetchError::RateLimited { retry_after: None }))
        .always("bob", vec![fresh("b1", "SOL is pumping")]);
    let h = harness(Platform::Twitter, &["alice", "bob"], source, ScriptedModel::new());
    let mut wl = WatchLoop::new(h.ctx.clone());
    let cancel = CancellationToken::new();
    let start = Instant::now();

    let r1 = wl.cycle(&cancel).await.expect("cycle 1");
    assert_eq!(r1.fetch_errors, 1);
    assert_eq!(r1.new_posts, 1);
    let bob = h.source.calls_for("bob");
    assert_eq!(bob.len(), 1);
    assert!(bob[0].at - start >= RATE_LIMIT_COOLDOWN);

    let r2 = wl.cycle(&cancel).await.expect("cycle 2");
    assert_eq!(r2.fetch_errors, 0);
    let alice = h.source.calls_for("alice");
    assert_eq!(alice.len(), 2);
    assert!(alice[1].at - alice[0].at >= RATE_LIMIT_COOLDOWN);
}

#[tokio::test(start_paused = true)]
async fn network_error_uses_the_short_cooldown() {
    let source = ScriptedSource::new(Platform::Twitter)
        .then("alice", Err(FetchError::Network("connection reset".into())));
    let h = harness(Platform::Twitter, &["alice", "bob"], source, ScriptedModel::new());
    let mut wl = WatchLoop::new(h.ctx.clone());
    let start = Instant::now();

    wl.cycle(&CancellationToken::new()).await.expect("cycle");
    let bob = h.source.calls_for("bob");
    let waited = bob[0].at - start;
    assert!(waited >= ERROR_COOLDOWN);
    assert!(waited < RATE_LIMIT_COOLDOWN);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_cooldown_returns_promptly() {
    let source = ScriptedSource::new(Platform::Twitter)
        .then("alice", Err(FetchError::RateLimited { retry_after: None }));
    let h = harness(Platform::Twitter, &["alice", "bob"], source, ScriptedModel::new());
    let wl = WatchLoop::new(h.ctx.clone());
    let cancel = CancellationToken::new();
    let start = Instant::now();
    let task = tokio::spawn(wl.run(cancel.clone()));

    while h.source.calls_for("alice").is_empty() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    cancel.cancel();
    let exit = task.await.expect("loop task");

    assert_eq!(exit.cycles, 0);
    assert!(Instant::now() - start < RATE_LIMIT_COOLDOWN);
    assert!(h.source.calls_for("bob").is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_announces_start_and_stops_while_sleeping() {
    let h = harness(
        Platform::Truth,
        &["realDonaldTrump"],
        ScriptedSource::new(Platform::Truth),
        ScriptedModel::new(),
    );
    let wl = WatchLoop::new(h.ctx.clone());
    let mut phase = wl.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(wl.run(cancel.clone()));

    phase
        .wait_for(|p| *p == Phase::Sleeping)
        .await
        .expect("loop reaches sleep");
    cancel.cancel();
    let exit = task.await.expect("loop task");

    assert_eq!(exit.cycles, 1);
    assert_eq!(*phase.borrow(), Phase::Cancelled);
    let sent = h.sink.envelopes();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, STATUS_SUBJECT);
    assert!(sent[0]
        .body
        .starts_with("STATUS UPDATE: Starting new truth watch at"));
}

#[tokio::test(start_paused = true)]
async fn loop_keeps_polling_every_interval() {
    let h = harness(
        Platform::Bluesky,
        &["alice.bsky.social"],
        ScriptedSource::new(Platform::Bluesky),
        ScriptedModel::new(),
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn(WatchLoop::new(h.ctx.clone()).run(cancel.clone()));

    tokio::time::sleep(Duration::from_secs(3 * 60 + 30)).await;
    cancel.cancel();
    let exit = task.await.expect("loop task");

    assert_eq!(exit.cycles, 4);
    let calls = h.source.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls[1].at - calls[0].at >= Duration::from_secs(60));
}

#[tokio::test]
async fn zero_accounts_is_an_idle_cycle() {
    let h = harness(
        Platform::Twitter,
        &[],
        ScriptedSource::new(Platform::Twitter),
        ScriptedModel::new(),
    );
    let mut wl = WatchLoop::new(h.ctx.clone());

    let r = wl.cycle(&CancellationToken::new()).await.expect("cycle");
    assert_eq!(r.accounts, 0);
    assert!(h.source.calls().is_empty());
    assert_eq!(wl.dedup().capacity(), 0);
}

#[tokio::test]
async fn dedup_window_stays_within_account_budget() {
    let posts = (0..150)
        .map(|i| fresh(&format!("p{i}"), &format!("post {i}")))
        .collect();
    let source = ScriptedSource::new(Platform::Twitter).always("alice", posts);
    let h = harness(Platform::Twitter, &["alice"], source, ScriptedModel::new());
    let mut wl = WatchLoop::new(h.ctx.clone());

    let r = wl.cycle(&CancellationToken::new()).await.expect("cycle");
    assert_eq!(r.new_posts, 150);
    assert_eq!(wl.dedup().capacity(), 100);
    assert_eq!(wl.dedup().len(), 100);
    assert!(!wl.dedup().seen("p0"));
    assert!(!wl.dedup().seen("p49"));
    assert!(wl.dedup().seen("p50"));
    assert!(wl.dedup().seen("p149"));
}

#[tokio::test]
async fn only_accounts_of_the_loop_platform_are_fetched_and_new_ones_are_picked_up() {
    let h = harness(
        Platform::Twitter,
        &["alice"],
        ScriptedSource::new(Platform::Twitter),
        ScriptedModel::new(),
    );
    h.config
        .write()
        .await
        .watch_accounts
        .push(WatchedAccount::new("carol.bsky.social", Platform::Bluesky));
    let mut wl = WatchLoop::new(h.ctx.clone());
    let cancel = CancellationToken::new();

    wl.cycle(&cancel).await.expect("cycle 1");
    assert_eq!(h.source.calls().len(), 1);
    assert_eq!(wl.dedup().capacity(), 100);

    h.config
        .write()
        .await
        .add_account(WatchedAccount::new("@dave", Platform::Twitter))
        .expect("new account");
    wl.cycle(&cancel).await.expect("cycle 2");

    let names: Vec<String> = h.source.calls().into_iter().map(|c| c.username).collect();
    assert_eq!(names, vec!["alice", "alice", "dave"]);
    assert_eq!(wl.dedup().capacity(), 200);
}

#[tokio::test]
async fn classifier_and_sink_failures_do_not_stop_the_cycle() {
    let source = ScriptedSource::new(Platform::Twitter).always(
        "alice",
        vec![
            fresh("1", "Dogecoin to Mars"),
            fresh("2", "broken request"),
            fresh("3", "Bitcoin reserve announced"),
        ],
    );
    let model = ScriptedModel::new()
        .on("Dogecoin to Mars", Scripted::Reply("Positive on DOGE."))
        .on("broken request", Scripted::Fail(ErrorCategory::RateLimited))
        .on("Bitcoin reserve announced", Scripted::Reply("Strongly positive on BTC."));
    let mut h = harness(Platform::Twitter, &["alice"], source, model);

    let failing = Arc::new(FailingSink::default());
    h.ctx.notifier = Arc::new(NotifierMux::with_sinks(vec![
        failing.clone() as Arc<dyn Sink>,
        h.sink.clone() as Arc<dyn Sink>,
    ]));
    let mut wl = WatchLoop::new(h.ctx.clone());

    let r = wl.cycle(&CancellationToken::new()).await.expect("cycle");
    assert_eq!(r.new_posts, 3);
    assert_eq!(r.findings, 2);
    assert_eq!(failing.attempts(), 2);
    assert_eq!(
        h.sink.bodies(),
        vec!["Positive on DOGE.", "Strongly positive on BTC."]
    );
}
