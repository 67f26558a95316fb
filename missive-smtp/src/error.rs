//! Errors raised while serving an SMTP connection.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmtpError {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A command or data line exceeded the permitted length.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// The peer went quiet for longer than the inbound timeout.
    #[error("Timed out waiting for the client")]
    Timeout,

    /// TLS negotiation failed or was requested twice.
    #[error("TLS upgrade failed: {0}")]
    Tls(String),

    /// The connection was closed by the peer mid-transaction.
    #[error("Connection closed by peer")]
    Closed,
}

impl SmtpError {
    /// Errors after which the session can still answer the client.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::LineTooLong(_) | Self::Timeout)
    }
}

pub type SmtpResult<T> = std::result::Result<T, SmtpError>;
