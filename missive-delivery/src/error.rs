use std::fmt;

use missive_common::error::DkimError;
use thiserror::Error;

use crate::dns::DnsError;

/// Errors from building a MIME envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// An address could not be turned into a mailbox.
    #[error("invalid address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    /// An attachment declared a content type that does not parse.
    #[error("invalid content type '{content_type}' for attachment '{filename}'")]
    ContentType {
        content_type: String,
        filename: String,
    },

    /// The message builder refused the parts it was given.
    #[error("unable to build message: {0}")]
    Build(#[from] lettre::error::Error),
}

/// Errors from a single delivery attempt against one exchanger.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid envelope address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("invalid envelope: {0}")]
    Envelope(#[from] lettre::error::Error),

    #[error("{0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// Anything a custom transport wants to surface.
    #[error("{0}")]
    Other(String),
}

/// One failed attempt, as recorded by the pipeline.
#[derive(Debug)]
pub struct AttemptFailure {
    /// 1-based.
    pub attempt: usize,
    pub budget: usize,
    pub host: String,
    pub error: TransportError,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt {}/{} failed: {}",
            self.attempt, self.budget, self.error
        )
    }
}

/// Why an outbound email was not delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("outbound email contains no recipients")]
    NoRecipients,

    /// An outbound middleware stage refused the email. The cause is optional.
    #[error("outbound email cancelled by middleware{}", cause_suffix(.0.as_ref()))]
    Cancelled(Option<anyhow::Error>),

    /// A recipient address has no domain part.
    #[error("invalid email address: {0}")]
    InvalidRecipient(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Signing(#[from] DkimError),

    #[error("no mx records for outbound host '{host}'")]
    NoExchanger { host: String },

    #[error("cannot lookup mx records for outbound host '{host}': {source}")]
    Lookup {
        host: String,
        #[source]
        source: DnsError,
    },

    /// Every attempt in the budget failed.
    #[error("email delivery failed:\n {}", join_attempts(.0))]
    Exhausted(Vec<AttemptFailure>),
}

impl DeliveryError {
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    /// The recorded attempts when delivery ran out of budget.
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            Self::Exhausted(attempts) => attempts,
            _ => &[],
        }
    }
}

fn cause_suffix(cause: Option<&anyhow::Error>) -> String {
    cause.map_or_else(String::new, |cause| format!(": {cause:#}"))
}

fn join_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Why the queue refused an email.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("outbound queue is full")]
    Full,

    #[error("outbound queue is closed")]
    Closed,
}
