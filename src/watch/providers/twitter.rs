//! Twitter/X API v2 adapter: username lookup, then the user timeline since the
//! watermark.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{check_status, http_client};
use crate::error::FetchError;
use crate::watch::types::{Platform, Post, PostSource};

const BASE_URL: &str = "https://api.twitter.com";

/// Handle used for the startup probe.
const PROBE_HANDLE: &str = "X";

pub struct TwitterSource {
    http: reqwest::Client,
    bearer_token: String,
    base_url: String,
    max_results: u32,
    user_ids: Mutex<HashMap<String, String>>, // lowercased handle -> user id
}

#[derive(Debug, Deserialize)]
struct UserLookup {
    data: Option<UserData>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Timeline {
    data: Option<Vec<Tweet>>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    created_at: Option<DateTime<Utc>>,
}

impl TwitterSource {
    pub fn new(bearer_token: String, max_results: u32) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            bearer_token,
            base_url: BASE_URL.to_string(),
            max_results: max_results.clamp(5, 100),
            user_ids: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn lookup(&self, username: &str) -> Result<String, FetchError> {
        let url = format!("{}/2/users/by/username/{}", self.base_url, username);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;
        let body: UserLookup = check_status(resp).await?.json().await?;
        body.data
            .map(|d| d.id)
            .ok_or_else(|| FetchError::UnknownAccount(username.to_string()))
    }

    async fn user_id(&self, username: &str) -> Result<String, FetchError> {
        let key = username.to_ascii_lowercase();
        if let Some(id) = self.user_ids.lock().await.get(&key) {
            return Ok(id.clone());
        }
        let id = self.lookup(username).await?;
        self.user_ids.lock().await.insert(key, id.clone());
        Ok(id)
    }
}

#[async_trait]
impl PostSource for TwitterSource {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    async fn list_recent_posts(
        &self,
        username: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Post>, FetchError> {
        let user_id = self.user_id(username).await?;
        let url = format!("{}/2/users/{}/tweets", self.base_url, user_id);
        let start_time = created_after.to_rfc3339_opts(SecondsFormat::Secs, true);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("max_results", self.max_results.to_string()),
                ("start_time", start_time),
                ("tweet.fields", "created_at,text".to_string()),
            ])
            .send()
            .await?;
        let body: Timeline = check_status(resp).await?.json().await?;

        let posts = body
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|t| match t.created_at {
                Some(created_at) => Some(Post {
                    id: t.id,
                    text: t.text,
                    created_at,
                }),
                None => {
                    tracing::debug!(target: "watch", platform = "twitter", id = %t.id, "tweet without created_at skipped");
                    None
                }
            })
            .collect();
        Ok(posts)
    }

    async fn probe(&self) -> Result<(), FetchError> {
        self.lookup(PROBE_HANDLE).await.map(|_| ())
    }
}
