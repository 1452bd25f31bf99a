use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::Meta;

/// Which fields error and prediction envelopes disclose.
///
/// Built once at start-up and read by reference when responses are shaped,
/// so every request under one process sees the same disclosure policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub return_message_on_error: bool,
    /// Useful for debugging, not recommended in production.
    pub return_traceback_on_error: bool,
    /// Echo the request payload back in error responses.
    pub return_user_data_on_error: bool,
    pub return_request_id_on_error: bool,
    pub return_request_id_with_prediction: bool,
    pub return_model_context_on_error: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            return_message_on_error: true,
            return_traceback_on_error: false,
            return_user_data_on_error: false,
            return_request_id_on_error: true,
            return_request_id_with_prediction: true,
            return_model_context_on_error: true,
        }
    }
}

impl ResponseConfig {
    /// Disclose everything. Meant for development.
    pub fn verbose() -> Self {
        Self {
            return_message_on_error: true,
            return_traceback_on_error: true,
            return_user_data_on_error: true,
            return_request_id_on_error: true,
            return_request_id_with_prediction: true,
            return_model_context_on_error: true,
        }
    }

    /// Disclose nothing beyond the error name.
    pub fn minimal() -> Self {
        Self {
            return_message_on_error: false,
            return_traceback_on_error: false,
            return_user_data_on_error: false,
            return_request_id_on_error: false,
            return_request_id_with_prediction: false,
            return_model_context_on_error: false,
        }
    }
}

/// Application identity and documentation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub meta: Meta,
    pub expose_docs: bool,
    pub docs_url: String,
    pub docs_json_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "porter".to_string(),
            description: None,
            version: "0.0.0".to_string(),
            meta: Meta::new(),
            expose_docs: false,
            docs_url: "/docs/".to_string(),
            docs_json_url: "/_docs.json".to_string(),
        }
    }
}

/// Process-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PorterConfig {
    pub bind: String,
    pub support_response_gzip: bool,
    pub responses: ResponseConfig,
    pub app: AppConfig,
}

impl Default for PorterConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            support_response_gzip: false,
            responses: ResponseConfig::default(),
            app: AppConfig::default(),
        }
    }
}

/// Loads [`PorterConfig`] from defaults, an optional TOML file and the
/// environment.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_file(path: &Path) -> Self {
        Self {
            config_path: Some(path.to_path_buf()),
        }
    }

    /// Use the file named by `PORTER_CONFIG`, if set.
    pub fn from_env() -> Self {
        match std::env::var("PORTER_CONFIG") {
            Ok(path) if !path.is_empty() => Self {
                config_path: Some(PathBuf::from(path)),
            },
            _ => Self::new(),
        }
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn figment(&self) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(PorterConfig::default()));

        if let Some(path) = &self.config_path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            }
        }

        figment.merge(Env::prefixed("PORTER_").split("__"))
    }

    /// Load configuration, with env var overrides (PORTER_ prefix, __ separator)
    pub fn load(&self) -> Result<PorterConfig> {
        let config: PorterConfig = self
            .figment()
            .extract()
            .context("Failed to load configuration")?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
