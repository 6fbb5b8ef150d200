//! Kernel configuration.

use std::path::Path;

use embedkern_comm::CommConfig;
use embedkern_wire::new_id;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Language description sent in `kernel_info_reply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_mimetype")]
    pub mimetype: String,
    #[serde(default)]
    pub file_extension: String,
}

fn default_mimetype() -> String {
    "text/plain".to_string()
}

impl Default for LanguageInfo {
    fn default() -> Self {
        Self {
            name: "embedkern".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mimetype: default_mimetype(),
            file_extension: ".txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpLink {
    pub text: String,
    pub url: String,
}

/// Configuration for the kernel.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Session id stamped on every outbound header.
    #[serde(default = "new_id")]
    pub session: String,

    #[serde(default = "default_username")]
    pub username: String,

    /// Maximum number of live comms.
    #[serde(default = "default_max_comms")]
    pub max_comms: usize,

    /// Page shown for a bare `?` request. No pager payload when unset.
    #[serde(default)]
    pub pager_url: Option<String>,

    #[serde(default)]
    pub language_info: LanguageInfo,

    #[serde(default = "default_banner")]
    pub banner: String,

    #[serde(default)]
    pub help_links: Vec<HelpLink>,

    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_username() -> String {
    "kernel".to_string()
}

fn default_max_comms() -> usize {
    CommConfig::default().max_comms
}

fn default_banner() -> String {
    format!("embedkern {}", env!("CARGO_PKG_VERSION"))
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            session: new_id(),
            username: default_username(),
            max_comms: default_max_comms(),
            pager_url: None,
            language_info: LanguageInfo::default(),
            banner: default_banner(),
            help_links: Vec::new(),
            log_filter: default_log_filter(),
        }
    }
}

impl KernelConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| KernelError::Config(e.to_string()))
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// The comm layer's part of this configuration.
    pub fn comm_config(&self) -> CommConfig {
        CommConfig {
            session: self.session.clone(),
            username: self.username.clone(),
            max_comms: self.max_comms,
        }
    }
}
