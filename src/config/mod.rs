//! Runtime configuration: platform credentials and cadence, the watch list,
//! notification settings and the control surface.
//!
//! Read from JSON or TOML (by file extension). The control surface is the only
//! writer; loops take read snapshots per cycle.

pub mod ai;
pub mod email;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::ControlError;
use crate::watch::types::{Platform, WatchedAccount};

pub use ai::OpenAiConfig;
pub use email::{EmailConfig, PostalConfig, SmtpConfig};

pub const DEFAULT_CONFIG_PATH: &str = "config/xcryptowatch.json";
pub const ENV_CONFIG_PATH: &str = "XCW_CONFIG_PATH";

pub const CONFIG_VERSION: &str = "0.1.0";
pub const DEFAULT_CHECK_INTERVAL_MIN: u64 = 15;

/// Config shared between the supervisor (writer) and the watch loops (readers).
pub type SharedConfig = Arc<RwLock<Config>>;

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}
fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_MIN
}
fn default_max_results() -> u32 {
    5
}
fn default_truth_base_url() -> String {
    "https://truthsocial.com".to_string()
}
fn default_bluesky_service_url() -> String {
    "https://public.api.bsky.app".to_string()
}
fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub twitter: TwitterConfig,
    #[serde(default)]
    pub truth: TruthConfig,
    #[serde(default)]
    pub bluesky: BlueskyConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default, deserialize_with = "lenient_watch_list")]
    pub watch_accounts: Vec<WatchedAccount>,
    #[serde(default)]
    pub control: ControlConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            twitter: TwitterConfig::default(),
            truth: TruthConfig::default(),
            bluesky: BlueskyConfig::default(),
            openai: OpenAiConfig::default(),
            email: EmailConfig::default(),
            watch_accounts: Vec::new(),
            control: ControlConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    /// "ENV" means: read from TWITTER_BEARER_TOKEN
    #[serde(default)]
    pub bearer_token: String,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Page size for the user timeline call (API accepts 5..=100).
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            bearer_token: String::new(),
            check_interval: default_check_interval(),
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthConfig {
    /// "ENV" means: read from TRUTH_ACCESS_TOKEN
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_truth_base_url")]
    pub base_url: String,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
}

impl Default for TruthConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: default_truth_base_url(),
            check_interval: default_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bluesky_service_url")]
    pub service_url: String,
    /// Optional session token; the public AppView works without one.
    /// "ENV" means: read from BLUESKY_ACCESS_JWT
    #[serde(default)]
    pub access_jwt: String,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_url: default_bluesky_service_url(),
            access_jwt: String::new(),
            check_interval: default_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Start a loop for every available platform at boot.
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            autostart: true,
        }
    }
}

/// Watch-list entry as written by hand; the platform may be missing or unknown.
#[derive(Deserialize)]
struct RawAccount {
    #[serde(default)]
    username: String,
    #[serde(default)]
    platform: Option<String>,
}

/// Entries whose platform is missing or unknown are skipped with a warning.
fn lenient_watch_list<'de, D>(deserializer: D) -> Result<Vec<WatchedAccount>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<RawAccount>::deserialize(deserializer)?;
    let accounts = raw
        .into_iter()
        .filter_map(|entry| match entry.platform.as_deref().map(str::parse::<Platform>) {
            Some(Ok(platform)) => Some(WatchedAccount::new(entry.username, platform)),
            Some(Err(e)) => {
                warn!(target: "config", account = %entry.username, error = %e, "watch entry skipped");
                None
            }
            None => {
                warn!(target: "config", account = %entry.username, "watch entry without platform skipped");
                None
            }
        })
        .collect();
    Ok(accounts)
}

/// Runtime settings change; absent fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub twitter_check_interval: Option<u64>,
    #[serde(default)]
    pub truth_check_interval: Option<u64>,
    #[serde(default)]
    pub bluesky_check_interval: Option<u64>,
    #[serde(default)]
    pub email_subject: Option<String>,
    #[serde(default)]
    pub smtp_enabled: Option<bool>,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub smtp_use_tls: Option<bool>,
    #[serde(default)]
    pub postal_enabled: Option<bool>,
    #[serde(default)]
    pub postal_server: Option<String>,
}

impl SettingsUpdate {
    /// Whether applying this changes how notifications are delivered.
    pub fn touches_sinks(&self) -> bool {
        self.smtp_enabled.is_some()
            || self.smtp_host.is_some()
            || self.smtp_port.is_some()
            || self.smtp_use_tls.is_some()
            || self.postal_enabled.is_some()
            || self.postal_server.is_some()
    }

    /// Platforms whose check interval this sets.
    pub fn interval_changes(&self) -> Vec<Platform> {
        [
            (Platform::Twitter, self.twitter_check_interval),
            (Platform::Truth, self.truth_check_interval),
            (Platform::Bluesky, self.bluesky_check_interval),
        ]
        .into_iter()
        .filter_map(|(p, v)| v.map(|_| p))
        .collect()
    }
}

/// Resolve a secret field. Empty means absent; "ENV" reads `env_var`.
pub fn resolve_secret(raw: &str, env_var: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.eq_ignore_ascii_case("env") {
        return std::env::var(env_var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
    }
    Some(raw.to_string())
}

impl TwitterConfig {
    pub fn resolved_bearer_token(&self) -> Option<String> {
        resolve_secret(&self.bearer_token, "TWITTER_BEARER_TOKEN")
    }
}

impl TruthConfig {
    pub fn resolved_access_token(&self) -> Option<String> {
        resolve_secret(&self.access_token, "TRUTH_ACCESS_TOKEN")
    }
}

impl BlueskyConfig {
    pub fn resolved_access_jwt(&self) -> Option<String> {
        resolve_secret(&self.access_jwt, "BLUESKY_ACCESS_JWT")
    }
}

impl Config {
    /// Path from $XCW_CONFIG_PATH, else the default location.
    pub fn default_path() -> PathBuf {
        std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: Config = match file_format(path) {
            Format::Toml => toml::from_str(&content)
                .with_context(|| format!("parsing TOML config {}", path.display()))?,
            Format::Json => serde_json::from_str(&content)
                .with_context(|| format!("parsing JSON config {}", path.display()))?,
        };
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `path`; if it does not exist, write a template there and fail with
    /// instructions.
    pub fn load_or_write_template(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from(path);
        }
        Config::default()
            .save_to(path)
            .context("writing config template")?;
        bail!(
            "no configuration found; a template was written to {}. Fill in credentials and restart",
            path.display()
        )
    }

    /// Atomic save (temp file + rename), in the format implied by the extension.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let body = match file_format(path) {
            Format::Toml => toml::to_string_pretty(self).context("serializing TOML config")?,
            Format::Json => serde_json::to_string_pretty(self).context("serializing JSON config")?,
        };
        let tmp = path.with_extension("tmp");
        let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(body.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        tracing::info!(target: "config", path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for p in Platform::ALL {
            if self.check_interval(p) < 1 {
                return Err(anyhow!("{p} check_interval must be at least 1 minute"));
            }
        }
        if !(5..=100).contains(&self.twitter.max_results) {
            return Err(anyhow!("twitter max_results must be within 5..=100"));
        }
        if self.email.smtp.enabled && self.email.smtp.host.trim().is_empty() {
            return Err(anyhow!("smtp is enabled but has no host"));
        }
        if self.email.smtp.port == 0 {
            return Err(anyhow!("smtp port must not be 0"));
        }
        if self.email.postal.enabled && self.email.postal.server.trim().is_empty() {
            return Err(anyhow!("postal is enabled but has no server"));
        }
        Ok(())
    }

    /// Apply `update` all-or-nothing: the result must pass `validate`.
    pub fn apply_settings(&mut self, update: &SettingsUpdate) -> Result<(), ControlError> {
        let mut next = self.clone();
        if let Some(v) = update.twitter_check_interval {
            next.twitter.check_interval = v;
        }
        if let Some(v) = update.truth_check_interval {
            next.truth.check_interval = v;
        }
        if let Some(v) = update.bluesky_check_interval {
            next.bluesky.check_interval = v;
        }
        if let Some(v) = &update.email_subject {
            next.email.subject = v.trim().to_string();
        }
        if let Some(v) = update.smtp_enabled {
            next.email.smtp.enabled = v;
        }
        if let Some(v) = &update.smtp_host {
            next.email.smtp.host = v.trim().to_string();
        }
        if let Some(v) = update.smtp_port {
            next.email.smtp.port = v;
        }
        if let Some(v) = update.smtp_use_tls {
            next.email.smtp.use_tls = v;
        }
        if let Some(v) = update.postal_enabled {
            next.email.postal.enabled = v;
        }
        if let Some(v) = &update.postal_server {
            next.email.postal.server = v.trim().to_string();
        }
        next.validate()
            .map_err(|e| ControlError::InvalidInput(format!("{e:#}")))?;
        *self = next;
        Ok(())
    }

    fn normalize(&mut self) {
        self.openai.sanitize();
        let mut kept: Vec<WatchedAccount> = Vec::with_capacity(self.watch_accounts.len());
        for acc in self.watch_accounts.drain(..) {
            let acc = WatchedAccount::new(acc.username, acc.platform);
            if acc.username.is_empty() || kept.iter().any(|k| k.same_as(&acc)) {
                continue;
            }
            kept.push(acc);
        }
        self.watch_accounts = kept;
        self.email.to_email.retain(|a| !a.trim().is_empty());
    }

    /// Whether the platform has what it needs to be polled.
    pub fn platform_enabled(&self, platform: Platform) -> bool {
        match platform {
            Platform::Twitter => self.twitter.resolved_bearer_token().is_some(),
            Platform::Truth => self.truth.resolved_access_token().is_some(),
            Platform::Bluesky => self.bluesky.enabled,
        }
    }

    /// Poll cadence in minutes.
    pub fn check_interval(&self, platform: Platform) -> u64 {
        match platform {
            Platform::Twitter => self.twitter.check_interval,
            Platform::Truth => self.truth.check_interval,
            Platform::Bluesky => self.bluesky.check_interval,
        }
    }

    /// Watched accounts on `platform`, in configured order.
    pub fn accounts_for(&self, platform: Platform) -> Vec<WatchedAccount> {
        self.watch_accounts
            .iter()
            .filter(|a| a.platform == platform)
            .cloned()
            .collect()
    }

    pub fn add_account(&mut self, account: WatchedAccount) -> Result<(), ControlError> {
        let account = WatchedAccount::new(account.username, account.platform);
        if account.username.is_empty() {
            return Err(ControlError::InvalidInput("username must not be empty".into()));
        }
        if self.watch_accounts.iter().any(|a| a.same_as(&account)) {
            return Err(ControlError::DuplicateAccount {
                username: account.username,
                platform: account.platform,
            });
        }
        self.watch_accounts.push(account);
        Ok(())
    }

    pub fn add_recipient(&mut self, address: &str) -> Result<(), ControlError> {
        let address = address.trim();
        address
            .parse::<lettre::message::Mailbox>()
            .map_err(|e| ControlError::InvalidInput(format!("invalid recipient {address:?}: {e}")))?;
        if self.email.has_recipient(address) {
            return Err(ControlError::DuplicateRecipient(address.to_string()));
        }
        self.email.to_email.push(address.to_string());
        Ok(())
    }
}

enum Format {
    Json,
    Toml,
}

fn file_format(path: &Path) -> Format {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if ext == "toml" {
        Format::Toml
    } else {
        Format::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const JSON: &str = r#"{
        "twitter": {"bearer_token": "tw-token", "check_interval": 5},
        "bluesky": {"enabled": true},
        "email": {
            "from_email": "watch@example.com",
            "to_email": ["ops@example.com", " "],
            "smtp": {"enabled": true, "host": "smtp.example.com"}
        },
        "watch_accounts": [
            {"username": "@alice", "platform": "twitter"},
            {"username": "ALICE", "platform": "twitter"},
            {"username": "bob.bsky.social", "platform": "bluesky"}
        ]
    }"#;

    #[test]
    fn json_config_fills_defaults_and_normalizes_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("cfg.json");
        fs::write(&p, JSON).unwrap();
        let cfg = Config::load_from(&p).unwrap();

        assert_eq!(cfg.check_interval(Platform::Twitter), 5);
        assert_eq!(cfg.check_interval(Platform::Truth), DEFAULT_CHECK_INTERVAL_MIN);
        assert_eq!(cfg.watch_accounts.len(), 2, "duplicate alice dropped");
        assert_eq!(cfg.watch_accounts[0].username, "alice");
        assert_eq!(cfg.email.to_email, vec!["ops@example.com".to_string()]);
        assert_eq!(cfg.email.smtp.port, 587);
        assert!(cfg.email.smtp_enabled());
        assert!(!cfg.email.postal_enabled());
        assert!(cfg.platform_enabled(Platform::Twitter));
        assert!(cfg.platform_enabled(Platform::Bluesky));
        assert!(!cfg.platform_enabled(Platform::Truth));
        assert_eq!(cfg.accounts_for(Platform::Bluesky).len(), 1);
    }

    #[test]
    fn toml_config_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("cfg.toml");
        fs::write(
            &p,
            r#"
[truth]
access_token = "t"
check_interval = 2

[[watch_accounts]]
username = "realDonaldTrump"
platform = "truth"
"#,
        )
        .unwrap();
        let cfg = Config::load_from(&p).unwrap();
        assert!(cfg.platform_enabled(Platform::Truth));
        assert_eq!(cfg.check_interval(Platform::Truth), 2);
        assert_eq!(cfg.accounts_for(Platform::Truth)[0].username, "realDonaldTrump");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("cfg.json");
        fs::write(&p, r#"{"truth": {"check_interval": 0}}"#).unwrap();
        let err = Config::load_from(&p).unwrap_err();
        assert!(err.to_string().contains("at least 1 minute"));
    }

    #[test]
    fn watch_list_skips_unknown_platforms_and_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("cfg.json");
        fs::write(
            &p,
            r#"{"watch_accounts": [
                {"username": "bob", "platform": "mastodon"},
                {"username": "alice", "platform": "Twitter"},
                {"username": "carol"},
                {"username": "dave", "platform": "BSKY"}
            ]}"#,
        )
        .unwrap();
        let cfg = Config::load_from(&p).unwrap();
        assert_eq!(
            cfg.watch_accounts,
            vec![
                WatchedAccount::new("alice", Platform::Twitter),
                WatchedAccount::new("dave", Platform::Bluesky),
            ]
        );
    }

    #[test]
    fn settings_update_is_validated_and_all_or_nothing() {
        let mut cfg = Config::default();
        let update = SettingsUpdate {
            truth_check_interval: Some(3),
            email_subject: Some("  Crypto desk ".into()),
            smtp_enabled: Some(true),
            smtp_host: Some("smtp.example.com".into()),
            ..Default::default()
        };
        assert!(update.touches_sinks());
        assert_eq!(update.interval_changes(), vec![Platform::Truth]);
        cfg.apply_settings(&update).unwrap();
        assert_eq!(cfg.check_interval(Platform::Truth), 3);
        assert_eq!(cfg.email.analysis_subject(), "Crypto desk");
        assert!(cfg.email.smtp_enabled());

        let bad = SettingsUpdate {
            twitter_check_interval: Some(0),
            email_subject: Some("ignored".into()),
            ..Default::default()
        };
        assert!(matches!(cfg.apply_settings(&bad), Err(ControlError::InvalidInput(_))));
        assert_eq!(cfg.email.subject, "Crypto desk");
        assert_eq!(cfg.check_interval(Platform::Twitter), DEFAULT_CHECK_INTERVAL_MIN);

        let no_host = SettingsUpdate {
            postal_enabled: Some(true),
            ..Default::default()
        };
        assert!(cfg.apply_settings(&no_host).is_err());
        assert!(!cfg.email.postal.enabled);
    }

    #[test]
    fn add_account_and_recipient_reject_duplicates() {
        let mut cfg = Config::default();
        cfg.add_account(WatchedAccount::new("alice", Platform::Twitter)).unwrap();
        let dup = cfg.add_account(WatchedAccount::new("@Alice", Platform::Twitter));
        assert!(matches!(dup, Err(ControlError::DuplicateAccount { .. })));
        cfg.add_account(WatchedAccount::new("alice", Platform::Truth)).unwrap();

        cfg.add_recipient("Ops <ops@example.com>").unwrap();
        let dup = cfg.add_recipient("Operations <OPS@example.com>");
        assert!(matches!(dup, Err(ControlError::DuplicateRecipient(_))));
        cfg.add_recipient("alerts@example.com").unwrap();
        assert_eq!(cfg.email.to_email.len(), 2);
        let bad = cfg.add_recipient("not an address");
        assert!(matches!(bad, Err(ControlError::InvalidInput(_))));
    }

    #[test]
    fn save_then_load_keeps_watch_list() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nested").join("cfg.json");
        let mut cfg = Config::default();
        cfg.add_account(WatchedAccount::new("carol", Platform::Bluesky)).unwrap();
        cfg.save_to(&p).unwrap();
        let back = Config::load_from(&p).unwrap();
        assert_eq!(back.watch_accounts, cfg.watch_accounts);
        assert!(!p.with_extension("tmp").exists());
    }

    #[test]
    fn missing_file_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("fresh.json");
        let err = Config::load_or_write_template(&p).unwrap_err();
        assert!(err.to_string().contains("template"));
        assert!(p.exists());
        assert!(Config::load_from(&p).is_ok());
    }

    #[serial_test::serial]
    #[test]
    fn env_placeholder_reads_environment() {
        env::remove_var("TWITTER_BEARER_TOKEN");
        let mut cfg = Config::default();
        cfg.twitter.bearer_token = "ENV".into();
        assert!(!cfg.platform_enabled(Platform::Twitter));

        env::set_var("TWITTER_BEARER_TOKEN", "from-env");
        assert_eq!(cfg.twitter.resolved_bearer_token().as_deref(), Some("from-env"));
        assert!(cfg.platform_enabled(Platform::Twitter));
        env::remove_var("TWITTER_BEARER_TOKEN");
    }
}
