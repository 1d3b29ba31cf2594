// src/config/email.rs
use serde::{Deserialize, Serialize};

use super::resolve_secret;

pub const DEFAULT_ANALYSIS_SUBJECT: &str = "XCryptoWatch Analysis";

fn default_smtp_port() -> u16 {
    587
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub to_email: Vec<String>,
    /// Subject for analysis mails; blank falls back to the default.
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub postal: PostalConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub server: String,
    /// "ENV" means: read from POSTAL_API_KEY
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    /// "ENV" means: read from SMTP_PASSWORD
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            use_tls: true,
        }
    }
}

impl EmailConfig {
    pub fn analysis_subject(&self) -> &str {
        let s = self.subject.trim();
        if s.is_empty() {
            DEFAULT_ANALYSIS_SUBJECT
        } else {
            s
        }
    }

    pub fn postal_enabled(&self) -> bool {
        self.postal.enabled && !self.postal.server.trim().is_empty()
    }

    pub fn smtp_enabled(&self) -> bool {
        self.smtp.enabled && !self.smtp.host.trim().is_empty()
    }

    /// Compares by mailbox address, ignoring display names and case.
    pub fn has_recipient(&self, address: &str) -> bool {
        let needle = address_key(address);
        self.to_email.iter().any(|a| address_key(a) == needle)
    }
}

fn address_key(raw: &str) -> String {
    let raw = raw.trim();
    raw.parse::<lettre::message::Mailbox>()
        .map(|m| m.email.to_string())
        .unwrap_or_else(|_| raw.to_string())
        .to_ascii_lowercase()
}

impl PostalConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_secret(&self.api_key, "POSTAL_API_KEY")
    }
}

impl SmtpConfig {
    pub fn resolved_password(&self) -> Option<String> {
        resolve_secret(&self.password, "SMTP_PASSWORD")
    }
}
