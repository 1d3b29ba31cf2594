// src/watch/providers/truth.rs
//! Truth Social adapter (Mastodon-compatible REST API).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{check_status, http_client, normalize_post_text};
use crate::error::FetchError;
use crate::watch::types::{Platform, Post, PostSource};

const STATUS_PAGE: u32 = 20;

pub struct TruthSource {
    http: reqwest::Client,
    access_token: String,
    base_url: String,
    account_ids: Mutex<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct Account {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    #[serde(default)]
    content: String,
    created_at: DateTime<Utc>,
}

impl TruthSource {
    pub fn new(access_token: String, base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_ids: Mutex::new(HashMap::new()),
        })
    }

    async fn account_id(&self, username: &str) -> Result<String, FetchError> {
        let key = username.to_ascii_lowercase();
        if let Some(id) = self.account_ids.lock().await.get(&key) {
            return Ok(id.clone());
        }
        let url = format!("{}/api/v1/accounts/lookup", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("acct", username)])
            .send()
            .await?;
        let account: Account = check_status(resp).await?.json().await?;
        self.account_ids.lock().await.insert(key, account.id.clone());
        Ok(account.id)
    }
}

#[async_trait]
impl PostSource for TruthSource {
    fn platform(&self) -> Platform {
        Platform::Truth
    }

    async fn list_recent_posts(
        &self,
        username: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Post>, FetchError> {
        let id = self.account_id(username).await?;
        let url = format!("{}/api/v1/accounts/{}/statuses", self.base_url, id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("exclude_replies", "true".to_string()),
                ("limit", STATUS_PAGE.to_string()),
            ])
            .send()
            .await?;
        let statuses: Vec<Status> = check_status(resp).await?.json().await?;

        // The statuses endpoint has no time filter; reblogs carry empty content.
        let posts = statuses
            .into_iter()
            .filter(|s| s.created_at > created_after)
            .filter_map(|s| {
                let text = normalize_post_text(&s.content);
                (!text.is_empty()).then(|| Post {
                    id: s.id,
                    text,
                    created_at: s.created_at,
                })
            })
            .collect();
        Ok(posts)
    }

    async fn probe(&self) -> Result<(), FetchError> {
        let url = format!("{}/api/v1/accounts/verify_credentials", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }
}
