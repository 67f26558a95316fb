//! Engine configuration, read from RON.
//!
//! ```ron
//! (
//!     domain: "example.com",
//!     outbound: (workers: 4, dkim_key: Some("/etc/missive/dkim.pem")),
//!     inbound: (validate_dkim: false),
//!     smtp: (listen: Some("[::]:25")),
//!     http: (listen: Some("127.0.0.1:8080")),
//! )
//! ```

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use missive_common::tls::TlsPaths;
use missive_delivery::dns::DnsConfig;
use serde::Deserialize;

use crate::error::EngineError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Advertised by the SMTP listener, used as the DKIM signing domain and
    /// as the suffix of every registered mailbox.
    pub domain: String,

    #[serde(default)]
    pub outbound: OutboundConfig,

    #[serde(default)]
    pub inbound: InboundConfig,

    #[serde(default)]
    pub smtp: SmtpListenConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

impl EngineConfig {
    /// A configuration with every tunable at its default and no listeners.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            outbound: OutboundConfig::default(),
            inbound: InboundConfig::default(),
            smtp: SmtpListenConfig::default(),
            http: HttpConfig::default(),
        }
    }

    pub fn from_ron(content: &str) -> Result<Self, EngineError> {
        ron::from_str(content).map_err(|err| EngineError::Config(err.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!("Failed to read config from {}: {err}", path.display()))
        })?;

        Self::from_ron(&content)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutboundConfig {
    /// Number of delivery workers.
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Budget for one recipient; every ten seconds buys one delivery attempt.
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::queue_capacity")]
    pub queue_capacity: usize,

    /// DKIM selector published under `{selector}._domainkey.{domain}`.
    #[serde(default = "defaults::selector")]
    pub selector: String,

    /// PKCS#8 RSA key in PEM form. Outbound mail is not signed without one.
    #[serde(default)]
    pub dkim_key: Option<PathBuf>,

    #[serde(default)]
    pub dns: DnsConfig,
}

impl OutboundConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            workers: defaults::workers(),
            timeout_secs: defaults::timeout_secs(),
            queue_capacity: defaults::queue_capacity(),
            selector: defaults::selector(),
            dkim_key: None,
            dns: DnsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboundConfig {
    /// Refuse inbound mail without a valid DKIM signature.
    #[serde(default = "defaults::validate_dkim")]
    pub validate_dkim: bool,

    #[serde(default = "defaults::max_recipients")]
    pub max_recipients: usize,

    /// Largest message or ingestion body accepted.
    #[serde(default = "defaults::max_bytes")]
    pub max_bytes: usize,

    /// Idle limit for SMTP sessions and the per-request limit for ingestion.
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl InboundConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            validate_dkim: defaults::validate_dkim(),
            max_recipients: defaults::max_recipients(),
            max_bytes: defaults::max_bytes(),
            timeout_secs: defaults::timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmtpListenConfig {
    /// No SMTP listener is started when absent.
    #[serde(default)]
    pub listen: Option<SocketAddr>,

    /// Enables STARTTLS.
    #[serde(default)]
    pub tls: Option<TlsPaths>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// No ingestion endpoint is started when absent.
    #[serde(default)]
    pub listen: Option<SocketAddr>,
}

mod defaults {
    pub fn workers() -> usize {
        missive_delivery::default_workers()
    }

    pub const fn timeout_secs() -> u64 {
        30
    }

    pub const fn queue_capacity() -> usize {
        1024
    }

    pub fn selector() -> String {
        "default".to_string()
    }

    pub const fn validate_dkim() -> bool {
        true
    }

    pub const fn max_recipients() -> usize {
        5
    }

    pub const fn max_bytes() -> usize {
        10 << 20
    }
}

/// Find the configuration file using the following precedence:
/// 1. `MISSIVE_CONFIG` environment variable
/// 2. ./missive.config.ron (current working directory)
/// 3. /etc/missive/missive.config.ron (system-wide config)
pub fn find_config_file() -> Result<PathBuf, EngineError> {
    if let Ok(env_path) = std::env::var("MISSIVE_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(EngineError::Config(format!(
            "MISSIVE_CONFIG points to non-existent file: {}",
            path.display()
        )));
    }

    let default_paths = [
        PathBuf::from("./missive.config.ron"),
        PathBuf::from("/etc/missive/missive.config.ron"),
    ];

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|path| format!("  - {}", path.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(EngineError::Config(format!(
        "No configuration file found. Tried:\n  - MISSIVE_CONFIG environment variable\n{paths_tried}"
    )))
}
