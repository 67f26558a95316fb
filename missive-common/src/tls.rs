//! Loading of the server TLS configuration used for STARTTLS.

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use serde::Deserialize;
use tokio_rustls::rustls::{
    RootCertStore, ServerConfig,
    crypto::ring,
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    version::TLS13,
};

use crate::error::TlsError;

/// Paths to the PEM files making up a server identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsPaths {
    pub certificate: std::path::PathBuf,
    pub key: std::path::PathBuf,
    /// Bundle of CAs trusted for client certificates.
    pub ca: std::path::PathBuf,
}

impl TlsPaths {
    pub fn load(&self) -> Result<Arc<ServerConfig>, TlsError> {
        load_server_config(&self.certificate, &self.key, &self.ca)
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoKey(path.to_path_buf()))
}

/// Builds a TLS 1.3 only server configuration from a certificate chain, its
/// private key, and a CA bundle used to check client certificates.
///
/// Clients without a certificate are still admitted.
pub fn load_server_config<C, K, A>(
    certificate: C,
    key: K,
    ca: A,
) -> Result<Arc<ServerConfig>, TlsError>
where
    C: AsRef<Path>,
    K: AsRef<Path>,
    A: AsRef<Path>,
{
    let certs = load_certs(certificate.as_ref())?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(certificate.as_ref().to_path_buf()));
    }
    let key = load_key(key.as_ref())?;

    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(load_certs(ca.as_ref())?);
    if added == 0 {
        return Err(TlsError::InvalidCaBundle);
    }

    let provider = Arc::new(ring::default_provider());

    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .allow_unauthenticated()
        .build()
        .map_err(|err| TlsError::Verifier(err.to_string()))?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&TLS13])?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}
