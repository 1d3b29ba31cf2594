use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Envelope, Sink};
use crate::config::PostalConfig;

/// Upper bound on delivery attempts; keeps the backoff shift small.
pub const MAX_RETRIES: u8 = 8;

/// Postal HTTP send API.
#[derive(Clone)]
pub struct PostalSink {
    endpoint: String,
    api_key: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    to: &'a [String],
    from: &'a str,
    subject: &'a str,
    plain_body: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    status: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PostalSink {
    pub fn new(server: &str, api_key: String) -> Self {
        let server = server.trim().trim_end_matches('/');
        let base = if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("https://{server}")
        };
        Self {
            endpoint: format!("{base}/api/v1/send/message"),
            api_key,
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    pub fn from_config(cfg: &PostalConfig) -> Result<Self> {
        let api_key = cfg
            .resolved_api_key()
            .context("postal api_key missing (set it or POSTAL_API_KEY)")?;
        Ok(Self::new(&cfg.server, api_key))
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.clamp(1, MAX_RETRIES);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(&self, payload: &SendMessage<'_>) -> Result<()> {
        let rsp = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header("X-Server-API-Key", &self.api_key)
            .json(payload)
            .send()
            .await
            .context("postal request failed")?;
        let rsp = rsp
            .error_for_status()
            .map_err(|e| anyhow!("postal HTTP error: {e}"))?;
        let body: SendResponse = rsp.json().await.context("postal response")?;
        if body.status != "success" {
            return Err(anyhow!("postal rejected message: {} {}", body.status, body.data));
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for PostalSink {
    fn name(&self) -> &str {
        "postal"
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        let payload = SendMessage {
            to: &envelope.to,
            from: &envelope.from,
            subject: &envelope.subject,
            plain_body: &envelope.body,
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            match self.attempt(&payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    tracing::debug!(target: "notify", sink = "postal", attempt, error = %e, "retrying");
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
