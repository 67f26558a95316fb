//! DKIM signing of outbound mail and verification of inbound mail.
//!
//! Both directions sit behind small traits so the pipelines never depend on
//! the crypto library directly. The `mail-auth` backed implementations live
//! here as well, together with key loading.

use std::{
    borrow::Borrow,
    fs::File,
    hash::Hash,
    io::BufReader,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use mail_auth::{
    AuthenticatedMessage, DkimResult, MessageAuthenticator, Parameters, ResolverCache, Txt,
    common::{
        crypto::{RsaKey, Sha256},
        headers::HeaderWriter,
        parse::TxtRecordParser,
        verify::DomainKey,
    },
    dkim::{DkimSigner as Signer, Done},
};
use tokio_rustls::rustls::pki_types::PrivateKeyDer;

use crate::{error::DkimError, internal};

/// Headers covered by outbound signatures.
pub const SIGNED_HEADERS: [&str; 7] = [
    "From",
    "To",
    "Subject",
    "Date",
    "Message-ID",
    "MIME-Version",
    "Content-Type",
];

/// Signs a fully built message.
pub trait DkimSigner: Send + Sync {
    /// Returns the message with a `DKIM-Signature` header prepended.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, DkimError>;
}

/// Verifies the DKIM signatures on a raw inbound message.
#[async_trait]
pub trait DkimVerifier: Send + Sync {
    async fn verify(&self, message: &[u8]) -> Result<(), DkimError>;
}

/// Reads an RSA private key from a PEM file.
///
/// PKCS#8 is the expected encoding; PKCS#1 (`BEGIN RSA PRIVATE KEY`) is
/// accepted as well.
pub fn load_signing_key<P: AsRef<Path>>(path: P) -> Result<RsaKey<Sha256>, DkimError> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path).map_err(|source| DkimError::KeyRead {
        path: path.to_path_buf(),
        source,
    })?);

    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|source| DkimError::KeyRead {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| DkimError::NotRsa(path.to_path_buf()))?;

    match key {
        PrivateKeyDer::Pkcs8(_) | PrivateKeyDer::Pkcs1(_) => {
            RsaKey::<Sha256>::from_key_der(key).map_err(|_| DkimError::NotRsa(path.to_path_buf()))
        }
        _ => Err(DkimError::NotRsa(path.to_path_buf())),
    }
}

/// RSA-SHA256 signer for one domain and selector.
pub struct RsaSigner {
    inner: Signer<RsaKey<Sha256>, Done>,
}

impl RsaSigner {
    pub fn new(key: RsaKey<Sha256>, domain: &str, selector: &str) -> Self {
        Self {
            inner: Signer::from_key(key)
                .domain(domain)
                .selector(selector)
                .headers(SIGNED_HEADERS),
        }
    }

    /// Loads the key at `path` and signs as `selector._domainkey.domain`.
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        domain: &str,
        selector: &str,
    ) -> Result<Self, DkimError> {
        Ok(Self::new(load_signing_key(path)?, domain, selector))
    }
}

impl DkimSigner for RsaSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, DkimError> {
        let signature = self
            .inner
            .sign(message)
            .map_err(|err| DkimError::Sign(err.to_string()))?;

        let header = signature.to_header();
        let mut signed = Vec::with_capacity(header.len() + message.len());
        signed.extend_from_slice(header.as_bytes());
        signed.extend_from_slice(message);

        Ok(signed)
    }
}

/// Domain key records, keyed by `selector._domainkey.domain.`.
///
/// The verifier consults this before going to DNS and stores what DNS
/// returns, so it doubles as the TXT cache.
#[derive(Default)]
pub struct DomainKeys {
    entries: DashMap<String, (Txt, Instant)>,
}

impl DomainKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the TXT record published for `selector` at `domain`.
    pub fn insert(
        &self,
        selector: &str,
        domain: &str,
        record: &str,
        ttl: Duration,
    ) -> Result<(), DkimError> {
        let key = DomainKey::parse(record.as_bytes())
            .map_err(|err| DkimError::InvalidRecord(err.to_string()))?;

        self.entries.insert(
            format!("{selector}._domainkey.{domain}.").to_lowercase(),
            (Txt::from(key), Instant::now() + ttl),
        );

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResolverCache<String, Txt> for DomainKeys {
    fn get<Q>(&self, name: &Q) -> Option<Txt>
    where
        String: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.entries.get(name)?;
        (entry.1 > Instant::now()).then(|| entry.0.clone())
    }

    fn remove<Q>(&self, name: &Q) -> Option<Txt>
    where
        String: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(name).map(|(_, (txt, _))| txt)
    }

    fn insert(&self, key: String, value: Txt, valid_until: Instant) {
        self.entries.insert(key, (value, valid_until));
    }
}

/// Verifier backed by `mail-auth`, resolving domain keys over DNS unless
/// they are already known.
pub struct AuthVerifier {
    authenticator: MessageAuthenticator,
    keys: Arc<DomainKeys>,
}

impl AuthVerifier {
    /// Uses the system resolver configuration, falling back to Cloudflare's
    /// public resolvers when it cannot be read.
    pub fn new() -> Result<Self, DkimError> {
        let authenticator = MessageAuthenticator::new_system_conf().or_else(|err| {
            internal!(
                level = WARN,
                "Unable to read system resolver configuration ({err}), using public resolvers"
            );
            MessageAuthenticator::new_cloudflare()
        });

        Ok(Self::with_authenticator(
            authenticator.map_err(|err| DkimError::Resolver(err.to_string()))?,
            Arc::default(),
        ))
    }

    pub const fn with_authenticator(
        authenticator: MessageAuthenticator,
        keys: Arc<DomainKeys>,
    ) -> Self {
        Self {
            authenticator,
            keys,
        }
    }

    pub fn keys(&self) -> &Arc<DomainKeys> {
        &self.keys
    }
}

#[async_trait]
impl DkimVerifier for AuthVerifier {
    async fn verify(&self, message: &[u8]) -> Result<(), DkimError> {
        let message = AuthenticatedMessage::parse(message).ok_or(DkimError::Unparsable)?;

        let results = self
            .authenticator
            .verify_dkim(Parameters::new(&message).with_txt_cache(self.keys.as_ref()))
            .await;

        if results.is_empty() {
            return Err(DkimError::Unsigned);
        }

        match results
            .iter()
            .map(mail_auth::DkimOutput::result)
            .find(|result| **result != DkimResult::Pass)
        {
            None => Ok(()),
            Some(DkimResult::None) => Err(DkimError::Unsigned),
            Some(
                DkimResult::Fail(err)
                | DkimResult::Neutral(err)
                | DkimResult::PermError(err)
                | DkimResult::TempError(err),
            ) => Err(DkimError::Failed(err.to_string())),
            Some(DkimResult::Pass) => Ok(()),
        }
    }
}
