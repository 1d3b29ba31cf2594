// src/watch/types.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Truth,
    Bluesky,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Twitter, Platform::Truth, Platform::Bluesky];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Truth => "truth",
            Platform::Bluesky => "bluesky",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "truth" | "truthsocial" => Ok(Platform::Truth),
            "bluesky" | "bsky" => Ok(Platform::Bluesky),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Accepts any spelling `FromStr` does ("Twitter", "x", "bsky").
impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedAccount {
    pub username: String, // handle without '@'
    pub platform: Platform,
}

impl WatchedAccount {
    pub fn new(username: impl Into<String>, platform: Platform) -> Self {
        Self {
            username: username.into().trim().trim_start_matches('@').to_string(),
            platform,
        }
    }

    pub fn same_as(&self, other: &WatchedAccount) -> bool {
        self.platform == other.platform && self.username.eq_ignore_ascii_case(&other.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,   // opaque, unique per platform
    pub text: String, // normalized plain text
    pub created_at: DateTime<Utc>,
}

/// A relevant classification, handed straight to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub source_post: String,
    pub narrative: String,
}

/// One platform's post feed. Implementations are assumed authenticated.
#[async_trait::async_trait]
pub trait PostSource: Send + Sync {
    fn platform(&self) -> Platform;

    /// Recent posts of `username` created after `created_after`, newest first
    /// or in platform order; the loop does not rely on ordering.
    async fn list_recent_posts(
        &self,
        username: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Post>, FetchError>;

    /// Cheap authenticated call used once at startup.
    async fn probe(&self) -> Result<(), FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses_aliases_and_serializes_lowercase() {
        assert_eq!("X".parse::<Platform>().unwrap(), Platform::Twitter);
        assert_eq!("bsky".parse::<Platform>().unwrap(), Platform::Bluesky);
        assert!("myspace".parse::<Platform>().is_err());
        let json = serde_json::to_string(&Platform::Truth).unwrap();
        assert_eq!(json, "\"truth\"");
    }

    #[test]
    fn platform_deserializes_case_insensitively() {
        let p: Platform = serde_json::from_str("\"Twitter\"").unwrap();
        assert_eq!(p, Platform::Twitter);
        let p: Platform = serde_json::from_str("\" BlueSky \"").unwrap();
        assert_eq!(p, Platform::Bluesky);
        assert!(serde_json::from_str::<Platform>("\"mastodon\"").is_err());
    }

    #[test]
    fn account_handles_are_normalized_and_compared_case_insensitively() {
        let a = WatchedAccount::new(" @ElonMusk ", Platform::Twitter);
        assert_eq!(a.username, "ElonMusk");
        assert!(a.same_as(&WatchedAccount::new("elonmusk", Platform::Twitter)));
        assert!(!a.same_as(&WatchedAccount::new("elonmusk", Platform::Bluesky)));
    }
}
