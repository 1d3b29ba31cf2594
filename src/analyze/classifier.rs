// src/analyze/classifier.rs
//! Concurrent batch classification.
//!
//! Every post of a batch is submitted at once and the batch completes when all
//! submissions have finished. Failures stay attached to their own index.

use futures::future::join_all;
use metrics::counter;

use super::ai_adapter::DynModelClient;
use crate::error::{ClassifyError, ErrorCategory};

/// Reply meaning "no crypto relevance".
pub const IRRELEVANT_SENTINEL: &str = "nothing";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Irrelevant,
    Relevant(String),
    Error(ErrorCategory),
}

impl Outcome {
    /// Map a raw model reply. Surrounding whitespace is ignored.
    pub fn from_reply(reply: &str) -> Outcome {
        let reply = reply.trim();
        if reply == IRRELEVANT_SENTINEL {
            Outcome::Irrelevant
        } else if reply.is_empty() {
            Outcome::Error(ErrorCategory::Malformed)
        } else {
            Outcome::Relevant(reply.to_string())
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Irrelevant => "irrelevant",
            Outcome::Relevant(_) => "relevant",
            Outcome::Error(_) => "error",
        }
    }

    pub fn narrative(&self) -> Option<&str> {
        match self {
            Outcome::Relevant(n) => Some(n),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Classifier {
    model: DynModelClient,
}

impl Classifier {
    pub fn new(model: DynModelClient) -> Self {
        Self { model }
    }

    pub fn provider_name(&self) -> &'static str {
        self.model.provider_name()
    }

    pub async fn probe(&self) -> Result<(), ClassifyError> {
        self.model.probe().await
    }

    /// Classify every post concurrently; outcomes line up index-for-index.
    pub async fn classify_batch(&self, posts: &[String]) -> Vec<Outcome> {
        tracing::info!(target: "classify", batch = posts.len(), provider = self.provider_name(), "submitting batch");
        let outcomes = join_all(
            posts
                .iter()
                .enumerate()
                .map(|(i, post)| self.classify_one(i, post)),
        )
        .await;
        for o in &outcomes {
            counter!("classify_outcomes_total", "outcome" => o.label()).increment(1);
        }
        outcomes
    }

    async fn classify_one(&self, index: usize, post: &str) -> Outcome {
        match self.model.complete(post).await {
            Ok(reply) => {
                let outcome = Outcome::from_reply(&reply);
                match &outcome {
                    Outcome::Irrelevant => {
                        tracing::debug!(target: "classify", task = index, "no crypto mention")
                    }
                    Outcome::Relevant(_) => {
                        tracing::info!(target: "classify", task = index, post = %post, "crypto mention found")
                    }
                    Outcome::Error(cat) => {
                        tracing::error!(target: "classify", task = index, category = cat.as_str(), "empty model reply")
                    }
                }
                outcome
            }
            Err(e) => {
                let category = e.category();
                tracing::error!(target: "classify", task = index, category = category.as_str(), error = %e, "classification failed");
                Outcome::Error(category)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_maps_to_irrelevant_and_anything_else_to_relevant() {
        assert_eq!(Outcome::from_reply("nothing"), Outcome::Irrelevant);
        assert_eq!(Outcome::from_reply("  nothing\n"), Outcome::Irrelevant);
        assert_eq!(
            Outcome::from_reply("Nothing."),
            Outcome::Relevant("Nothing.".into())
        );
        assert_eq!(
            Outcome::from_reply("Positive about BTC."),
            Outcome::Relevant("Positive about BTC.".into())
        );
        assert_eq!(
            Outcome::from_reply("   "),
            Outcome::Error(ErrorCategory::Malformed)
        );
    }
}
