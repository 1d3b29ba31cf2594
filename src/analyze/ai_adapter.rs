//! AI adapter: the single-post model call behind the classifier.
//!
//! `ModelClient` is the seam; `OpenAiProvider` talks to Chat Completions and
//! `FixedReplyModel` answers locally for dry runs (`AI_TEST_MODE=mock`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::error::ClassifyError;

const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Instruction given to the model for every post.
pub const SYSTEM_PROMPT: &str = "You analyze social-media posts for mentions of cryptocurrency and their sentiment. \
1. If the post does NOT mention cryptocurrency, reply with exactly the word nothing, lowercase, with no punctuation or other characters. \
2. If the post DOES mention cryptocurrency: decide whether the mention is positive or negative, \
summarize the sentiment in 1-2 sentences, and relate it to current cryptocurrency market trends \
(price movement, major news, investor sentiment).";

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Raw model reply for one post.
    async fn complete(&self, text: &str) -> Result<String, ClassifyError>;
    /// Cheap authenticated call used once at startup.
    async fn probe(&self) -> Result<(), ClassifyError>;
    fn provider_name(&self) -> &'static str;
}

pub type DynModelClient = Arc<dyn ModelClient>;

/// Build the model client for `cfg`; `AI_TEST_MODE=mock` swaps in a local stub.
pub fn build_model_client(cfg: &OpenAiConfig) -> anyhow::Result<DynModelClient> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        tracing::warn!(target: "classify", "AI_TEST_MODE=mock: every post is classified as irrelevant");
        return Ok(Arc::new(FixedReplyModel::new("nothing")));
    }
    Ok(Arc::new(OpenAiProvider::new(cfg)?))
}

/// OpenAI Chat Completions provider.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(cfg: &OpenAiConfig) -> anyhow::Result<Self> {
        let api_key = cfg.resolved_api_key()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("xcryptowatch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            base_url: OPENAI_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ModelClient for OpenAiProvider {
    async fn complete(&self, text: &str) -> Result<String, ClassifyError> {
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: text,
                },
            ],
            temperature: self.temperature,
        };

        let resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let body: Resp = resp.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClassifyError::Malformed("response has no choices".into()))?
            .message
            .content
            .ok_or_else(|| ClassifyError::Malformed("choice has no content".into()))?;
        Ok(content.trim().to_string())
    }

    async fn probe(&self) -> Result<(), ClassifyError> {
        let resp = self
            .http
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(map_status(status, body))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

fn map_status(status: StatusCode, body: String) -> ClassifyError {
    let body: String = body.chars().take(300).collect();
    match status.as_u16() {
        401 => ClassifyError::Auth,
        403 => ClassifyError::PermissionDenied,
        429 => ClassifyError::RateLimited,
        400 | 404 | 409 | 422 => ClassifyError::BadRequest(body),
        408 => ClassifyError::Timeout,
        s if s >= 500 => ClassifyError::Unavailable(format!("status {s}: {body}")),
        s => ClassifyError::Transport(format!("unexpected status {s}: {body}")),
    }
}

/// Returns the same reply for every post.
#[derive(Clone)]
pub struct FixedReplyModel {
    reply: String,
}

impl FixedReplyModel {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ModelClient for FixedReplyModel {
    async fn complete(&self, _text: &str) -> Result<String, ClassifyError> {
        Ok(self.reply.clone())
    }

    async fn probe(&self) -> Result<(), ClassifyError> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
