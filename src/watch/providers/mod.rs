// src/watch/providers/mod.rs
pub mod bluesky;
pub mod truth;
pub mod twitter;

use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::Response;

use crate::error::FetchError;

pub use bluesky::BlueskySource;
pub use truth::TruthSource;
pub use twitter::TwitterSource;

pub(crate) const USER_AGENT: &str = concat!("xcryptowatch/", env!("CARGO_PKG_VERSION"));

/// Max chars of an error body kept in `FetchError` messages.
const ERROR_BODY_CAP: usize = 300;

pub(crate) fn http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(20))
        .build()?;
    Ok(client)
}

/// Turn a non-2xx response into the matching `FetchError`.
pub(crate) async fn check_status(resp: Response) -> Result<Response, FetchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = retry_hint(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    let message: String = body.chars().take(ERROR_BODY_CAP).collect();
    Err(match status.as_u16() {
        429 => FetchError::RateLimited { retry_after },
        401 | 403 => FetchError::Unauthorized(message),
        404 => FetchError::UnknownAccount(message),
        s => FetchError::Api { status: s, message },
    })
}

/// Reads `retry-after` (seconds) or an epoch-seconds reset header.
pub(crate) fn retry_hint(headers: &HeaderMap) -> Option<Duration> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    if let Some(secs) = header_u64("retry-after") {
        return Some(Duration::from_secs(secs));
    }
    let reset = header_u64("x-rate-limit-reset").or_else(|| header_u64("ratelimit-reset"))?;
    let now = Utc::now().timestamp().max(0) as u64;
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

/// Plain text from an HTML post body: tags dropped, entities decoded,
/// whitespace collapsed.
pub fn normalize_post_text(s: &str) -> String {
    static RE_BREAKS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p>").expect("static regex"));
    static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

    let out = RE_BREAKS.replace_all(s, " ");
    let out = RE_TAGS.replace_all(&out, "");
    let out = html_escape::decode_html_entities(&out);
    let out = RE_WS.replace_all(&out, " ");
    out.trim().to_string()
}
