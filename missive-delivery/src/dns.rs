//! Mail exchanger resolution for outbound delivery.
//!
//! Only MX records are considered: a domain without any is undeliverable,
//! there is no fallback to its address records. Answers are cached in a
//! `DashMap` for a fixed time so a burst of mail to the same domain costs a
//! single lookup.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use hickory_resolver::{TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider};
use missive_common::outgoing;
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while resolving exchangers.
#[derive(Debug, Error)]
pub enum DnsError {
    /// The domain does not exist or publishes no MX records.
    #[error("no mail exchangers found for domain: {0}")]
    NoExchanger(String),

    /// The query failed for any other reason.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::ResolveError),

    /// The resolver gave up waiting.
    #[error("DNS query timed out for domain: {0}")]
    Timeout(String),
}

impl DnsError {
    /// `true` when the domain simply has nowhere to deliver to.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NoExchanger(_))
    }
}

/// A host accepting mail for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Exchanger {
    pub host: String,
    /// Lower is more preferred.
    pub preference: u16,
}

impl Exchanger {
    pub fn new(host: impl Into<String>, preference: u16) -> Self {
        Self {
            host: host.into(),
            preference,
        }
    }
}

/// Looks up the exchangers responsible for a domain.
#[async_trait]
pub trait ExchangerResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<Vec<Exchanger>, DnsError>;
}

/// Resolver tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,

    /// How long an answer is reused before asking again.
    #[serde(default = "defaults::cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

mod defaults {
    pub const fn timeout_secs() -> u64 {
        5
    }

    pub const fn cache_ttl_secs() -> u64 {
        60
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout_secs(),
            cache_ttl_secs: defaults::cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedResult {
    exchangers: Arc<Vec<Exchanger>>,
    expires_at: Instant,
}

/// [`ExchangerResolver`] backed by the system's DNS configuration.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    cache: DashMap<String, CachedResult>,
    ttl: Duration,
    deadline: Duration,
}

impl DnsResolver {
    pub fn new() -> Result<Self, DnsError> {
        Self::with_config(&DnsConfig::default())
    }

    pub fn with_config(config: &DnsConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);
        let deadline = opts.timeout * u32::try_from(opts.attempts.max(1)).unwrap_or(1);

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self {
            resolver,
            cache: DashMap::new(),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            deadline,
        })
    }

    async fn lookup(&self, domain: &str) -> Result<Vec<Exchanger>, DnsError> {
        let lookup = tokio::time::timeout(self.deadline, self.resolver.mx_lookup(domain))
            .await
            .map_err(|_| DnsError::Timeout(domain.to_string()))?;

        let lookup = match lookup {
            Ok(lookup) => lookup,
            Err(err) if err.is_no_records_found() || err.is_nx_domain() => {
                return Err(DnsError::NoExchanger(domain.to_string()));
            }
            Err(err) => {
                outgoing!(level = WARN, "MX lookup failed for {domain}: {err}");
                return Err(DnsError::LookupFailed(err));
            }
        };

        let mut exchangers = lookup
            .iter()
            .map(|mx| {
                let host = mx.exchange().to_utf8();
                Exchanger::new(host.trim_end_matches('.'), mx.preference())
            })
            .collect::<Vec<_>>();

        if exchangers.is_empty() {
            return Err(DnsError::NoExchanger(domain.to_string()));
        }

        exchangers.sort_by_key(|exchanger| exchanger.preference);
        Ok(exchangers)
    }
}

#[async_trait]
impl ExchangerResolver for DnsResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<Exchanger>, DnsError> {
        let key = domain.to_ascii_lowercase();

        if let Some(cached) = self.cache.get(&key)
            && cached.expires_at > Instant::now()
        {
            outgoing!(level = DEBUG, "Cache hit for {domain}");
            return Ok(cached.exchangers.as_ref().clone());
        }

        let exchangers = self.lookup(&key).await?;
        outgoing!(
            level = DEBUG,
            "Resolved {} exchanger(s) for {domain}",
            exchangers.len()
        );

        remember(&self.cache, key, &exchangers, self.ttl);
        Ok(exchangers)
    }
}

/// Caches `exchangers` under `key`, evicting every answer that has expired.
fn remember(
    cache: &DashMap<String, CachedResult>,
    key: String,
    exchangers: &[Exchanger],
    ttl: Duration,
) {
    let now = Instant::now();
    cache.retain(|_, cached| cached.expires_at > now);
    cache.insert(
        key,
        CachedResult {
            exchangers: Arc::new(exchangers.to_vec()),
            expires_at: now + ttl,
        },
    );
}
