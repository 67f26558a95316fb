use missive_common::error::{DkimError, TlsError};
use missive_delivery::dns::DnsError;
use missive_inbound::RegistryError;
use missive_ingest::IngestError;
use thiserror::Error;

use crate::engine::State;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration could not be found, read or parsed.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A setup operation was attempted after the engine started.
    #[error("Engine can only be configured before it starts (currently {0})")]
    NotInSetup(State),

    #[error("Engine has already been started")]
    AlreadyStarted,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Dkim(#[from] DkimError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Dns(#[from] DnsError),

    /// The SMTP listener could not bind its socket.
    #[error("Failed to bind SMTP listener to {address}: {source}")]
    SmtpBind {
        address: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Ingest(#[from] IngestError),
}
