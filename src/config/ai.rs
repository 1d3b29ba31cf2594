// src/config/ai.rs
use serde::{Deserialize, Serialize};

use super::resolve_secret;

fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl OpenAiConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<String> {
        resolve_secret(&self.api_key, "OPENAI_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("Missing OpenAI API key (config or OPENAI_API_KEY env var)"))
    }

    /// Clamp values the API would reject.
    pub(crate) fn sanitize(&mut self) {
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        if self.model.trim().is_empty() {
            self.model = default_model();
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
    }
}
