//! Notification fan-out.
//!
//! `NotifierMux` hands one envelope to every configured sink. A sink failure is
//! logged and counted, never returned to the caller.

pub mod email;
pub mod postal;

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::EmailConfig;

pub use email::SmtpSink;
pub use postal::PostalSink;

pub const STATUS_SUBJECT: &str = "XCryptoWatch Status Update";
pub const STATUS_PREFIX: &str = "STATUS UPDATE: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Loop lifecycle events.
    Status,
    /// A finding's narrative.
    Analysis,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Status => "status",
            NotificationKind::Analysis => "analysis",
        }
    }
}

/// One message as handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Envelope {
    pub fn build(kind: NotificationKind, payload: &str, email: &EmailConfig) -> Self {
        let (subject, body) = match kind {
            NotificationKind::Status => {
                (STATUS_SUBJECT.to_string(), format!("{STATUS_PREFIX}{payload}"))
            }
            NotificationKind::Analysis => (email.analysis_subject().to_string(), payload.to_string()),
        };
        Self {
            from: email.from_email.trim().to_string(),
            to: email
                .to_email
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            subject,
            body,
        }
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, envelope: &Envelope) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Sink set shared by every loop; settings changes swap it in place.
#[derive(Default)]
pub struct NotifierMux {
    sinks: RwLock<Vec<Arc<dyn Sink>>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sinks(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self {
            sinks: RwLock::new(sinks),
        }
    }

    pub fn push(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.get_mut().push(sink);
    }

    /// Take over the sinks of `other`; deliveries already running finish on the old set.
    pub fn replace_with(&self, other: NotifierMux) {
        let sinks = other.sinks.into_inner();
        info!(target: "notify", sinks = ?sinks.iter().map(|s| s.name()).collect::<Vec<_>>(), "notification sinks replaced");
        *self.sinks.write() = sinks;
    }

    /// Build every enabled sink; a sink that cannot be constructed is skipped.
    pub fn from_config(email: &EmailConfig) -> Self {
        let mut mux = Self::new();

        if email.postal_enabled() {
            match PostalSink::from_config(&email.postal) {
                Ok(s) => mux.push(Arc::new(s)),
                Err(e) => warn!(target: "notify", sink = "postal", error = %e, "postal sink disabled"),
            }
        }
        if email.smtp_enabled() {
            match SmtpSink::from_config(&email.smtp) {
                Ok(s) => mux.push(Arc::new(s)),
                Err(e) => warn!(target: "notify", sink = "smtp", error = %e, "smtp sink disabled"),
            }
        }

        info!(target: "notify", sinks = ?mux.sink_names(), "notification sinks ready");
        mux
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Deliver `payload` to every sink, isolated per sink.
    pub async fn notify(
        &self,
        kind: NotificationKind,
        payload: &str,
        email: &EmailConfig,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let sinks = self.sinks.read().clone();
        if sinks.is_empty() {
            return summary;
        }

        let envelope = Envelope::build(kind, payload, email);
        if envelope.to.is_empty() {
            warn!(target: "notify", kind = kind.as_str(), "no recipients configured, notification dropped");
            return summary;
        }

        for sink in &sinks {
            match sink.deliver(&envelope).await {
                Ok(()) => {
                    summary.delivered += 1;
                    counter!("notify_deliveries_total", "sink" => sink.name().to_string(), "outcome" => "ok")
                        .increment(1);
                    info!(target: "notify", sink = sink.name(), kind = kind.as_str(), recipients = envelope.to.len(), "delivered");
                }
                Err(e) => {
                    summary.failed += 1;
                    counter!("notify_deliveries_total", "sink" => sink.name().to_string(), "outcome" => "error")
                        .increment(1);
                    warn!(target: "notify", sink = sink.name(), kind = kind.as_str(), error = %e, "delivery failed");
                }
            }
        }
        summary
    }

    pub async fn notify_status(&self, message: &str, email: &EmailConfig) -> DispatchSummary {
        self.notify(NotificationKind::Status, message, email).await
    }

    pub async fn notify_analysis(&self, narrative: &str, email: &EmailConfig) -> DispatchSummary {
        self.notify(NotificationKind::Analysis, narrative, email).await
    }
}
