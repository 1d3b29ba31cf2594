// src/watch/providers/bluesky.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{check_status, http_client};
use crate::error::FetchError;
use crate::watch::types::{Platform, Post, PostSource};

const FEED_PAGE: u32 = 30;
const PROBE_ACTOR: &str = "bsky.app";

/// Bluesky author feed via an AppView (public by default).
pub struct BlueskySource {
    http: reqwest::Client,
    service_url: String,
    access_jwt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorFeed {
    #[serde(default)]
    feed: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    post: PostView,
    /// Present for reposts; those are someone else's posts.
    #[serde(default)]
    reason: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PostView {
    uri: String,
    record: PostRecord,
}

#[derive(Debug, Deserialize)]
struct PostRecord {
    #[serde(default)]
    text: String,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
}

impl BlueskySource {
    pub fn new(service_url: &str, access_jwt: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            service_url: service_url.trim_end_matches('/').to_string(),
            access_jwt,
        })
    }

    fn get(&self, method: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/xrpc/{}", self.service_url, method);
        let req = self.http.get(url);
        match &self.access_jwt {
            Some(jwt) => req.bearer_auth(jwt),
            None => req,
        }
    }
}

#[async_trait]
impl PostSource for BlueskySource {
    fn platform(&self) -> Platform {
        Platform::Bluesky
    }

    async fn list_recent_posts(
        &self,
        username: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Post>, FetchError> {
        let resp = self
            .get("app.bsky.feed.getAuthorFeed")
            .query(&[
                ("actor", username.to_string()),
                ("limit", FEED_PAGE.to_string()),
                ("filter", "posts_no_replies".to_string()),
            ])
            .send()
            .await?;
        let body: AuthorFeed = check_status(resp).await?.json().await?;

        let mut posts = Vec::new();
        for item in body.feed {
            if item.reason.is_some() {
                continue;
            }
            let Some(created_at) = item
                .post
                .record
                .created_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
            else {
                tracing::debug!(target: "watch", platform = "bluesky", uri = %item.post.uri, "post without valid createdAt skipped");
                continue;
            };
            if created_at <= created_after || item.post.record.text.trim().is_empty() {
                continue;
            }
            posts.push(Post {
                id: item.post.uri,
                text: item.post.record.text,
                created_at,
            });
        }
        Ok(posts)
    }

    async fn probe(&self) -> Result<(), FetchError> {
        let resp = self
            .get("app.bsky.actor.getProfile")
            .query(&[("actor", PROBE_ACTOR)])
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }
}
