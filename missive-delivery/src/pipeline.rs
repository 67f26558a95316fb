//! The outbound delivery pipeline.
//!
//! An email is checked, offered to the outbound middleware, and then
//! delivered to each recipient on its own: a dedicated envelope is built,
//! optionally signed, and handed to the recipient's exchangers in order of
//! preference until one accepts it or the attempt budget runs out.

use std::{sync::Arc, time::Duration};

use missive_common::{Address, Email, MiddlewareChain, Verdict, dkim::DkimSigner, outgoing};

use crate::{
    dns::ExchangerResolver,
    envelope::{EnvelopeBuilder, LettreEnvelopeBuilder},
    error::{AttemptFailure, DeliveryError},
    transport::MailTransport,
};

/// Port every delivery attempt is made on.
pub const SMTP_PORT: u16 = 25;

/// Number of attempts a recipient gets for a given outbound timeout: one per
/// ten seconds, never fewer than one.
pub fn attempt_budget(timeout: Duration) -> usize {
    usize::try_from((timeout.as_secs() / 10).max(1)).unwrap_or(usize::MAX)
}

pub struct OutboundPipeline {
    middleware: Arc<MiddlewareChain>,
    envelopes: Arc<dyn EnvelopeBuilder>,
    signer: Option<Arc<dyn DkimSigner>>,
    resolver: Arc<dyn ExchangerResolver>,
    transport: Arc<dyn MailTransport>,
    timeout: Duration,
    port: u16,
}

impl OutboundPipeline {
    pub fn new(resolver: Arc<dyn ExchangerResolver>, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            middleware: Arc::default(),
            envelopes: Arc::new(LettreEnvelopeBuilder),
            signer: None,
            resolver,
            transport,
            timeout: Duration::from_secs(30),
            port: SMTP_PORT,
        }
    }

    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<MiddlewareChain>) -> Self {
        self.middleware = middleware;
        self
    }

    #[must_use]
    pub fn with_envelope_builder(mut self, envelopes: Arc<dyn EnvelopeBuilder>) -> Self {
        self.envelopes = envelopes;
        self
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Option<Arc<dyn DkimSigner>>) -> Self {
        self.signer = signer;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides [`SMTP_PORT`], for relays listening elsewhere.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn middleware(&self) -> &Arc<MiddlewareChain> {
        &self.middleware
    }

    /// Delivers `email` to every recipient, stopping at the first recipient
    /// that cannot be delivered to.
    pub async fn deliver(&self, mut email: Email) -> Result<(), DeliveryError> {
        if email.to.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        if let Verdict::Cancel(cause) = self.middleware.run(&mut email) {
            outgoing!(level = DEBUG, "Outbound middleware cancelled delivery");
            return Err(DeliveryError::Cancelled(cause));
        }

        let budget = attempt_budget(self.timeout);
        for recipient in &email.to {
            self.deliver_to(&email, recipient, budget).await?;
        }

        Ok(())
    }

    async fn deliver_to(
        &self,
        email: &Email,
        recipient: &Address,
        budget: usize,
    ) -> Result<(), DeliveryError> {
        let envelope = self.envelopes.build(email, recipient)?;
        let message = match &self.signer {
            Some(signer) => signer.sign(&envelope)?,
            None => envelope,
        };

        let domain = recipient
            .domain()
            .ok_or_else(|| DeliveryError::InvalidRecipient(recipient.address.clone()))?;

        let mut exchangers = self.resolver.resolve(domain).await.map_err(|source| {
            if source.is_not_found() {
                DeliveryError::NoExchanger {
                    host: domain.to_string(),
                }
            } else {
                DeliveryError::Lookup {
                    host: domain.to_string(),
                    source,
                }
            }
        })?;

        if exchangers.is_empty() {
            return Err(DeliveryError::NoExchanger {
                host: domain.to_string(),
            });
        }
        exchangers.sort_by_key(|exchanger| exchanger.preference);

        let mut failures = Vec::with_capacity(budget);
        for (index, exchanger) in exchangers.iter().cycle().take(budget).enumerate() {
            match self
                .transport
                .send(&exchanger.host, self.port, &email.from, recipient, &message)
                .await
            {
                Ok(()) => {
                    outgoing!(
                        level = INFO,
                        "Delivered to {} via {}",
                        recipient.address,
                        exchanger.host
                    );
                    return Ok(());
                }
                Err(error) => {
                    outgoing!(
                        level = WARN,
                        "Attempt {}/{budget} to {} via {} failed: {error}",
                        index + 1,
                        recipient.address,
                        exchanger.host
                    );
                    failures.push(AttemptFailure {
                        attempt: index + 1,
                        budget,
                        host: exchanger.host.clone(),
                        error,
                    });
                }
            }
        }

        Err(DeliveryError::Exhausted(failures))
    }
}

impl std::fmt::Debug for OutboundPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundPipeline")
            .field("middleware", &self.middleware)
            .field("signed", &self.signer.is_some())
            .field("timeout", &self.timeout)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}
