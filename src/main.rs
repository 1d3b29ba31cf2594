//! xcryptowatch binary: loads config, connects platforms and the classifier,
//! starts the supervisor and serves the control API until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xcryptowatch::api::{self, AppState};
use xcryptowatch::bootstrap;
use xcryptowatch::config::Config;
use xcryptowatch::error::ControlError;
use xcryptowatch::metrics::Metrics;
use xcryptowatch::notify::NotifierMux;
use xcryptowatch::watch::{Platform, Supervisor};

/// Compact logs by default; `XCW_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("xcryptowatch=info,watch=info,classify=info,notify=info,control=info,config=info,bootstrap=info,warn"));

    let json = std::env::var("XCW_LOG_JSON").is_ok_and(|v| v == "1");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
    info!(target: "control", "shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let path = Config::default_path();
    let cfg = Config::load_or_write_template(&path)?;
    info!(target: "config", path = %path.display(), accounts = cfg.watch_accounts.len(), "configuration loaded");

    let metrics = Metrics::install()?;
    let sources = bootstrap::connect_sources(&cfg).await;
    let classifier = bootstrap::connect_classifier(&cfg.openai).await?;
    let notifier = NotifierMux::from_config(&cfg.email);

    let bind = cfg.control.bind.clone();
    let autostart = cfg.control.autostart;
    let shared = Arc::new(RwLock::new(cfg));

    let supervisor = sources.into_iter().fold(
        Supervisor::new(Arc::clone(&shared), Arc::new(classifier), Arc::new(notifier))
            .with_config_path(path.clone()),
        |sup, source| sup.with_source(source),
    );
    let (handle, supervisor_task) = supervisor.spawn();

    if autostart {
        for platform in Platform::ALL {
            match handle.start_watch(platform).await {
                Ok(_) => {}
                Err(ControlError::PlatformUnavailable(_)) => {}
                Err(e) => warn!(target: "control", platform = platform.as_str(), error = %e, "autostart failed"),
            }
        }
    }

    let app = api::router(AppState {
        supervisor: handle.clone(),
        metrics: Some(metrics.handle.clone()),
    });
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding control API on {bind}"))?;
    info!(target: "control", %bind, "control API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("control API server")?;

    if let Err(e) = handle.shutdown().await {
        warn!(target: "control", error = %e, "supervisor already gone");
    }
    supervisor_task.await.context("supervisor task")?;
    info!("bye");
    Ok(())
}
