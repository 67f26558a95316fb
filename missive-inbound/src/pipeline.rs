//! The inbound processing pipeline.
//!
//! A raw message is parsed, its addressing checked, its DKIM signatures
//! verified (when enabled), and it is then offered to the inbound middleware
//! before being routed to every registered mailbox it is addressed to.

use std::sync::Arc;

use missive_common::{
    ErrorSink, InboundOutcome, MailboxHandler, MiddlewareChain, TracingErrorSink, Verdict,
    dkim::DkimVerifier, handler::report, incoming,
};

use crate::{
    message::{self, MessageError},
    registry::MailboxRegistry,
};

pub const DEFAULT_MAX_RECIPIENTS: usize = 5;

pub struct InboundPipeline {
    mailboxes: Arc<MailboxRegistry>,
    middleware: Arc<MiddlewareChain>,
    verifier: Option<Arc<dyn DkimVerifier>>,
    fallback: Option<Arc<dyn MailboxHandler>>,
    sink: Arc<dyn ErrorSink>,
    max_recipients: usize,
}

impl InboundPipeline {
    /// A pipeline routing to `mailboxes`, with DKIM verification disabled
    /// until a verifier is supplied.
    pub fn new(mailboxes: Arc<MailboxRegistry>) -> Self {
        Self {
            mailboxes,
            middleware: Arc::default(),
            verifier: None,
            fallback: None,
            sink: Arc::new(TracingErrorSink),
            max_recipients: DEFAULT_MAX_RECIPIENTS,
        }
    }

    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<MiddlewareChain>) -> Self {
        self.middleware = middleware;
        self
    }

    /// Require every message to carry valid DKIM signatures.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Option<Arc<dyn DkimVerifier>>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Shown mail that matched no mailbox. It cannot change the outcome.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Option<Arc<dyn MailboxHandler>>) -> Self {
        self.fallback = fallback;
        self
    }

    #[must_use]
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub const fn with_max_recipients(mut self, max_recipients: usize) -> Self {
        self.max_recipients = max_recipients;
        self
    }

    pub fn mailboxes(&self) -> &Arc<MailboxRegistry> {
        &self.mailboxes
    }

    pub const fn max_recipients(&self) -> usize {
        self.max_recipients
    }

    fn reset(&self, error: anyhow::Error) -> InboundOutcome {
        report(self.sink.as_ref(), &error);
        InboundOutcome::reset(format!("{error:#}"))
    }

    /// Decides what happens to one inbound message.
    pub async fn process(&self, raw: &[u8]) -> InboundOutcome {
        let mail = match mailparse::parse_mail(raw) {
            Ok(mail) => mail,
            Err(err) => return self.reset(MessageError::from(err).into()),
        };

        let (to, from) = match (message::recipients(&mail), message::sender(&mail)) {
            (Ok(to), Ok(from)) => (to, from),
            (Err(err), _) | (_, Err(err)) => return self.reset(err.into()),
        };

        if to.len() > self.max_recipients {
            return self.reset(anyhow::anyhow!(
                "incoming email includes too many recipients"
            ));
        }

        if let Some(verifier) = &self.verifier
            && let Err(err) = verifier.verify(raw).await
        {
            return self.reset(
                anyhow::Error::new(err).context("incoming email failed dkim signature validation"),
            );
        }

        let mut email = match message::to_email(&mail, from, to.clone()) {
            Ok(email) => email,
            Err(err) => return self.reset(err.into()),
        };

        if let Verdict::Cancel(cause) = self.middleware.run(&mut email) {
            incoming!(level = DEBUG, "Inbound middleware rejected message");
            return match cause {
                Some(cause) => {
                    self.reset(cause.context("incoming middleware encountered an error"))
                }
                None => InboundOutcome::reset("cancelled by middleware"),
            };
        }

        let mut delivered = 0_usize;
        for recipient in &to {
            let Some(mailbox) = self.mailboxes.get(&recipient.address) else {
                continue;
            };

            if let Err(err) = mailbox.invoke(&email).await {
                return self.reset(err.context("inbox handler encountered an error"));
            }

            incoming!(level = INFO, "Delivered message to {}", recipient.address);
            delivered += 1;
        }

        if delivered > 0 {
            return InboundOutcome::Accepted;
        }

        if let Some(fallback) = &self.fallback
            && let Err(err) = fallback.invoke(&email).await
        {
            return self.reset(err.context("no inbox handler encountered an error"));
        }

        incoming!(level = INFO, "No mailbox for message to {:?}", email.to);
        InboundOutcome::unknown_recipient()
    }
}

impl std::fmt::Debug for InboundPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundPipeline")
            .field("mailboxes", &self.mailboxes)
            .field("middleware", &self.middleware)
            .field("verify_dkim", &self.verifier.is_some())
            .field("fallback", &self.fallback.is_some())
            .field("max_recipients", &self.max_recipients)
            .finish_non_exhaustive()
    }
}
