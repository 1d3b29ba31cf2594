use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{Envelope, Sink};
use crate::config::SmtpConfig;

/// SMTP delivery through lettre's async transport.
pub struct SmtpSink {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpSink {
    pub fn from_config(cfg: &SmtpConfig) -> Result<Self> {
        let host = cfg.host.trim();
        if host.is_empty() {
            return Err(anyhow!("smtp host is empty"));
        }

        let builder = if cfg.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .with_context(|| format!("invalid SMTP host {host}"))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        let mut builder = builder.port(cfg.port);

        let username = cfg.username.trim();
        if !username.is_empty() {
            if let Some(password) = cfg.resolved_password() {
                builder = builder.credentials(Credentials::new(username.to_string(), password));
            }
        }

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

pub(crate) fn build_message(envelope: &Envelope) -> Result<Message> {
    let from: Mailbox = envelope
        .from
        .parse()
        .with_context(|| format!("invalid from address {:?}", envelope.from))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(envelope.subject.clone())
        .header(header::ContentType::TEXT_PLAIN);
    for to in &envelope.to {
        let mailbox: Mailbox = to
            .parse()
            .with_context(|| format!("invalid recipient {to:?}"))?;
        builder = builder.to(mailbox);
    }

    builder.body(envelope.body.clone()).context("build email")
}

#[async_trait]
impl Sink for SmtpSink {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        let msg = build_message(envelope)?;
        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(from: &str, to: &[&str]) -> Envelope {
        Envelope {
            from: from.into(),
            to: to.iter().map(|s| s.to_string()).collect(),
            subject: "XCryptoWatch Analysis".into(),
            body: "BTC sentiment positive".into(),
        }
    }

    #[test]
    fn message_carries_every_recipient() {
        let msg = build_message(&envelope("bot@example.com", &["a@example.com", "B <b@example.com>"]))
            .expect("valid message");
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("a@example.com"));
        assert!(raw.contains("b@example.com"));
        assert!(raw.contains("Subject: XCryptoWatch Analysis"));
    }

    #[test]
    fn invalid_from_is_rejected() {
        assert!(build_message(&envelope("not an address", &["a@example.com"])).is_err());
    }

    #[test]
    fn blank_host_is_rejected() {
        assert!(SmtpSink::from_config(&SmtpConfig::default()).is_err());
    }
}
