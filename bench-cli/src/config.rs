// Copyright 2025 Longbench Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Run configuration: defaults, optional TOML file, environment
//! variables, and CLI flags, merged in that priority order (CLI wins).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_padding_size")]
    pub padding_size: usize,

    /// Sampling temperature passed to every model call.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum tokens requested per model call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-attempt request timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub provider: ProviderConfig,
}

fn default_concurrency() -> usize {
    4
}

fn default_padding_size() -> usize {
    50
}

fn default_temperature() -> f64 {
    0.0
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_base_url: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            padding_size: default_padding_size(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            provider: ProviderConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("loading configuration from {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        config = config.merge_with_env();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    fn merge_with_env(mut self) -> Self {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.provider.openai_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.provider.anthropic_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.provider.openai_base_url = Some(url);
        }
        if let Ok(val) = std::env::var("LONGBENCH_TEMPERATURE") {
            if let Ok(parsed) = val.parse() {
                self.temperature = parsed;
            }
        }
        if let Ok(val) = std::env::var("LONGBENCH_MAX_TOKENS") {
            if let Ok(parsed) = val.parse() {
                self.max_tokens = parsed;
            }
        }
        if let Ok(val) = std::env::var("LONGBENCH_TIMEOUT") {
            if let Ok(parsed) = val.parse() {
                self.timeout_secs = parsed;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be at least 1");
        }
        if self.provider.openai_api_key.is_none() && self.provider.anthropic_api_key.is_none() {
            anyhow::bail!("no model provider configured: set OPENAI_API_KEY or ANTHROPIC_API_KEY");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RunConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.padding_size, 50);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn from_file_parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("longbench.toml");
        std::fs::write(
            &path,
            "concurrency = 8\npadding_size = 20\ntemperature = 0.7\nmax_tokens = 512\ntimeout_secs = 15\n",
        )
        .unwrap();
        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.padding_size, 20);
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.timeout_secs, 15);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = RunConfig::default();
        config.timeout_secs = 0;
        config.provider.openai_api_key = Some("key".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_a_provider_key() {
        let config = RunConfig::default();
        assert!(config.validate().is_err());
    }
}
