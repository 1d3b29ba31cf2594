// src/bootstrap.rs
//! Setup stage: build the authenticated capabilities before any loop starts.
//!
//! A platform whose adapter cannot be built or fails its probe is left out and
//! is never startable. A failing classifier probe is fatal.

use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::analyze::{build_model_client, Classifier};
use crate::config::{Config, OpenAiConfig};
use crate::watch::providers::{BlueskySource, TruthSource, TwitterSource};
use crate::watch::{Platform, PostSource};

/// Adapter for `platform`, or `None` when its credentials are absent.
pub fn build_source(cfg: &Config, platform: Platform) -> anyhow::Result<Option<Arc<dyn PostSource>>> {
    if !cfg.platform_enabled(platform) {
        return Ok(None);
    }
    let source: Arc<dyn PostSource> = match platform {
        Platform::Twitter => {
            let token = cfg
                .twitter
                .resolved_bearer_token()
                .context("twitter bearer token missing")?;
            Arc::new(TwitterSource::new(token, cfg.twitter.max_results)?)
        }
        Platform::Truth => {
            let token = cfg
                .truth
                .resolved_access_token()
                .context("truth access token missing")?;
            Arc::new(TruthSource::new(token, &cfg.truth.base_url)?)
        }
        Platform::Bluesky => Arc::new(BlueskySource::new(
            &cfg.bluesky.service_url,
            cfg.bluesky.resolved_access_jwt(),
        )?),
    };
    Ok(Some(source))
}

/// Probe every candidate concurrently and keep the ones that answered.
pub async fn probe_sources(candidates: Vec<Arc<dyn PostSource>>) -> Vec<Arc<dyn PostSource>> {
    let results = join_all(candidates.iter().map(|s| s.probe())).await;
    candidates
        .into_iter()
        .zip(results)
        .filter_map(|(source, res)| match res {
            Ok(()) => {
                info!(target: "bootstrap", platform = source.platform().as_str(), "platform connected");
                Some(source)
            }
            Err(e) => {
                error!(target: "bootstrap", platform = source.platform().as_str(), error = %e, "platform probe failed, watch disabled");
                None
            }
        })
        .collect()
}

pub async fn connect_sources(cfg: &Config) -> Vec<Arc<dyn PostSource>> {
    let mut candidates = Vec::new();
    for platform in Platform::ALL {
        match build_source(cfg, platform) {
            Ok(Some(source)) => candidates.push(source),
            Ok(None) => {
                info!(target: "bootstrap", platform = platform.as_str(), "no credentials, platform disabled")
            }
            Err(e) => {
                warn!(target: "bootstrap", platform = platform.as_str(), error = %e, "adapter could not be built")
            }
        }
    }
    probe_sources(candidates).await
}

pub async fn connect_classifier(cfg: &OpenAiConfig) -> anyhow::Result<Classifier> {
    let key_len = cfg.resolved_api_key().map(|k| k.len()).unwrap_or(0);
    info!(target: "bootstrap", model = %cfg.model, key_len, "connecting classifier");
    let classifier = Classifier::new(build_model_client(cfg)?);
    classifier
        .probe()
        .await
        .with_context(|| format!("{} probe failed", classifier.provider_name()))?;
    info!(target: "bootstrap", provider = classifier.provider_name(), "classifier connected");
    Ok(classifier)
}
