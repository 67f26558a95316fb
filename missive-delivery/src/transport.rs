use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    address::Envelope,
    transport::smtp::{
        client::{Tls, TlsParameters},
        extension::ClientId,
    },
};
use missive_common::{Address, outgoing};

use crate::error::TransportError;

/// Hands a finished message to one exchanger.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        host: &str,
        port: u16,
        from: &Address,
        recipient: &Address,
        message: &[u8],
    ) -> Result<(), TransportError>;
}

/// Anonymous SMTP client built per exchanger.
///
/// STARTTLS is used when the peer offers it and skipped otherwise.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    hello: String,
    timeout: Duration,
    opportunistic_tls: bool,
}

impl SmtpTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// `hello` is the name announced in `EHLO`.
    pub fn new(hello: impl Into<String>) -> Self {
        Self {
            hello: hello.into(),
            timeout: Self::DEFAULT_TIMEOUT,
            opportunistic_tls: true,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Never attempt STARTTLS.
    #[must_use]
    pub const fn plaintext(mut self) -> Self {
        self.opportunistic_tls = false;
        self
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(
        &self,
        host: &str,
        port: u16,
        from: &Address,
        recipient: &Address,
        message: &[u8],
    ) -> Result<(), TransportError> {
        let envelope = Envelope::new(
            Some(from.address.parse()?),
            vec![recipient.address.parse()?],
        )?;

        let tls = if self.opportunistic_tls {
            Tls::Opportunistic(TlsParameters::new(host.to_string())?)
        } else {
            Tls::None
        };

        let transport: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .port(port)
                .hello_name(ClientId::Domain(self.hello.clone()))
                .timeout(Some(self.timeout))
                .tls(tls)
                .build();

        outgoing!(
            level = DEBUG,
            "Sending to {} via {host}:{port}",
            recipient.address
        );

        let response = transport.send_raw(&envelope, message).await?;
        outgoing!(
            level = DEBUG,
            "{host}:{port} accepted message for {}: {}",
            recipient.address,
            response.code()
        );

        Ok(())
    }
}
