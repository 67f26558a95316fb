//! A small ESMTP receiver.
//!
//! Each accepted connection runs a [`session::Session`], which collects one
//! message per transaction and hands the raw bytes to a [`MessageHandler`].
//! The handler's [`InboundOutcome`] decides the reply to the final dot.

pub mod command;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod listener;
pub mod session;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use missive_common::InboundOutcome;
use missive_inbound::InboundPipeline;
use tokio_rustls::{TlsAcceptor, rustls::ServerConfig};

pub use error::SmtpError;
pub use listener::Listener;

pub mod defaults {
    use std::time::Duration;

    pub const MAX_BYTES: usize = 10 << 20;
    pub const MAX_RECIPIENTS: usize = 5;
    pub const TIMEOUT: Duration = Duration::from_secs(30);
}

/// Decides what happens to a message received over SMTP.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &[u8]) -> InboundOutcome;
}

#[async_trait]
impl MessageHandler for InboundPipeline {
    async fn handle(&self, message: &[u8]) -> InboundOutcome {
        self.process(message).await
    }
}

#[derive(Clone)]
pub struct SmtpConfig {
    /// Sent in the greeting and the EHLO reply.
    pub domain: String,
    /// Largest message accepted, `0` for no limit.
    pub max_bytes: usize,
    pub max_recipients: usize,
    /// How long a client may stay silent before the session is closed.
    pub timeout: Duration,
    pub tls: Option<TlsAcceptor>,
}

impl SmtpConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            max_bytes: defaults::MAX_BYTES,
            max_recipients: defaults::MAX_RECIPIENTS,
            timeout: defaults::TIMEOUT,
            tls: None,
        }
    }

    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    #[must_use]
    pub const fn with_max_recipients(mut self, max_recipients: usize) -> Self {
        self.max_recipients = max_recipients;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables STARTTLS with the given server configuration.
    #[must_use]
    pub fn with_tls(mut self, tls: Option<Arc<ServerConfig>>) -> Self {
        self.tls = tls.map(TlsAcceptor::from);
        self
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("domain", &self.domain)
            .field("max_bytes", &self.max_bytes)
            .field("max_recipients", &self.max_recipients)
            .field("timeout", &self.timeout)
            .field("starttls", &self.tls.is_some())
            .finish()
    }
}
