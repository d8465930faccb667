//! Mailcast configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MailcastError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailcastConfig {
    #[serde(default)]
    pub smtp: SmtpSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub assets: AssetsSection,
}

impl MailcastConfig {
    /// Load config from the default path (~/.mailcast/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MailcastError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MailcastError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MailcastError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Mailcast home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mailcast")
    }
}

/// SMTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpSection {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_smtp_host() -> String { "localhost".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_from_address() -> String { "noreply@localhost".into() }
fn default_from_name() -> String { "Mailcast".into() }

impl Default for SmtpSection {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: default_from_address(),
            from_name: default_from_name(),
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String { "~/.mailcast/campaigns.db".into() }

impl Default for StoreSection {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

impl StoreSection {
    /// Database path with `~` expanded.
    pub fn expanded_db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).to_string())
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_host() -> String { "0.0.0.0".into() }
fn default_gateway_port() -> u16 { 8080 }

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

/// Dispatch engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Base URL for open-tracking pixels appended to each message.
    #[serde(default = "default_tracking_base")]
    pub tracking_base_url: String,
    /// Flush interim counters to the durable record every N recipients.
    #[serde(default = "default_flush_every")]
    pub flush_every: u32,
}

fn default_tracking_base() -> String { "http://127.0.0.1:8080".into() }
fn default_flush_every() -> u32 { 20 }

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tracking_base_url: default_tracking_base(),
            flush_every: default_flush_every(),
        }
    }
}

/// Embedded-asset resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsSection {
    /// Directory holding inline images referenced by `cid:`.
    #[serde(default = "default_assets_dir")]
    pub dir: String,
    /// When set, assets are fetched from `{base_url}/{cid}` instead.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_assets_dir() -> String { "~/.mailcast/assets".into() }

impl Default for AssetsSection {
    fn default() -> Self {
        Self {
            dir: default_assets_dir(),
            base_url: None,
        }
    }
}

impl AssetsSection {
    pub fn expanded_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MailcastConfig::default();
        assert_eq!(cfg.smtp.port, 587);
        assert_eq!(cfg.gateway.port, 8080);
        assert_eq!(cfg.engine.flush_every, 20);
        assert!(cfg.assets.base_url.is_none());
    }

    #[test]
    fn test_parse_partial_toml() {
        let cfg: MailcastConfig = toml::from_str(
            r#"
            [smtp]
            host = "smtp.example.com"
            username = "mailer"

            [gateway]
            port = 9090
            "#,
        )
        .unwrap();
        assert_eq!(cfg.smtp.host, "smtp.example.com");
        assert_eq!(cfg.smtp.port, 587);
        assert_eq!(cfg.gateway.port, 9090);
        assert_eq!(cfg.store.db_path, "~/.mailcast/campaigns.db");
    }
}
