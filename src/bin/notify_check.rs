//! Sends one status notification through every configured sink.

use anyhow::bail;
use chrono::Utc;
use xcryptowatch::config::Config;
use xcryptowatch::NotifierMux;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = Config::load_from(&Config::default_path())?;
    let mux = NotifierMux::from_config(&cfg.email);
    if mux.is_empty() {
        bail!("no notification sink is enabled in the configuration");
    }

    let summary = mux
        .notify_status(&format!("Notification check at {}.", Utc::now()), &cfg.email)
        .await;
    println!(
        "notify-check: delivered={} failed={} sinks={:?}",
        summary.delivered,
        summary.failed,
        mux.sink_names()
    );
    if summary.delivered == 0 {
        bail!("no sink delivered the check message");
    }
    Ok(())
}
