//! Error types shared by both pipelines.
//!
//! Validation failures describe what is wrong with an [`Email`](crate::Email)
//! before anything is sent or queued; the codec errors cover DKIM and TLS
//! material loading.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Why a single [`Address`](crate::Address) was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// Display name must be between 1 and 128 characters.
    #[error("name must be between 1 and 128 characters (got {0})")]
    NameLength(usize),

    /// The address could not be parsed as a single mailbox.
    #[error("'{0}' is not a valid email address")]
    Invalid(String),

    /// The address is longer than 128 characters.
    #[error("address must be at most 128 characters (got {0})")]
    TooLong(usize),
}

/// Why a single [`Attachment`](crate::Attachment) was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("content_type is required")]
    MissingContentType,

    #[error("content_type must be at most 255 characters (got {0})")]
    ContentTypeTooLong(usize),

    #[error("filename is required")]
    MissingFilename,

    #[error("filename must be at most 255 characters (got {0})")]
    FilenameTooLong(usize),

    #[error("data is required")]
    EmptyData,
}

/// Errors raised while validating an [`Email`](crate::Email).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// `to` was empty.
    #[error("'to' must contain at least one recipient")]
    NoRecipients,

    /// A recipient failed validation.
    #[error("'to[{index}]': {reason}")]
    Recipient { index: usize, reason: AddressError },

    /// The sender failed validation.
    #[error("'from': {0}")]
    Sender(AddressError),

    /// An attachment failed validation.
    #[error("'attachments[{index}]': {reason}")]
    Attachment {
        index: usize,
        reason: AttachmentError,
    },
}

/// Errors from DKIM signing, verification, and key loading.
#[derive(Debug, Error)]
pub enum DkimError {
    /// The key file could not be read.
    #[error("unable to read DKIM key {path:?}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The key file contained no private key, or one that is not RSA.
    #[error("expected rsa private key in {0:?}")]
    NotRsa(PathBuf),

    /// The message could not be signed.
    #[error("cannot sign outbound email: {0}")]
    Sign(String),

    /// The message could not be parsed for verification.
    #[error("message could not be parsed for dkim verification")]
    Unparsable,

    /// The message carries no DKIM-Signature header.
    #[error("no dkim signatures found")]
    Unsigned,

    /// At least one signature did not verify.
    #[error("dkim signature did not verify: {0}")]
    Failed(String),

    /// A domain key record could not be parsed.
    #[error("invalid domain key record: {0}")]
    InvalidRecord(String),

    /// The verifier's resolver could not be created.
    #[error("unable to create dkim resolver: {0}")]
    Resolver(String),
}

/// Errors from loading TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A certificate, key or CA file could not be read.
    #[error("unable to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The certificate file contained no certificates.
    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    /// The key file contained no private key.
    #[error("no private key found in {0:?}")]
    NoKey(PathBuf),

    /// The CA bundle had nothing usable in it.
    #[error("invalid or malformed certificate(s) in CA bundle")]
    InvalidCaBundle,

    /// Building the client verifier failed.
    #[error("unable to build client verifier: {0}")]
    Verifier(String),

    /// rustls rejected the configuration.
    #[error("invalid TLS configuration: {0}")]
    Config(#[from] tokio_rustls::rustls::Error),
}
