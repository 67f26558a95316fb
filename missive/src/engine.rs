use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, OnceLock},
};

use missive_common::{
    Email, ErrorSink, MailboxHandler, Middleware, MiddlewareChain, Signal, TracingErrorSink,
    dkim::{AuthVerifier, DkimSigner, DkimVerifier, RsaSigner},
    handler::report,
    internal,
};
use missive_delivery::{
    DeliveryError, DnsResolver, EnvelopeBuilder, ExchangerResolver, LettreEnvelopeBuilder,
    MailTransport, OutboundPipeline, OutboundQueue, SmtpTransport, WorkerPool,
};
use missive_inbound::{InboundPipeline, MailboxRegistry};
use missive_ingest::{Authorizer, Ingest, IngestServer, LoopbackAuthorizer};
use missive_smtp::{Listener, MessageHandler, SmtpConfig};
use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, watch},
    task::{JoinError, JoinHandle},
};

use crate::{config::EngineConfig, error::EngineError};

/// Where the engine is in its life.
///
/// `Created → Running → ShuttingDown → Stopped`. Shutting down an engine
/// that never started goes straight through to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        })
    }
}

/// Addresses the listeners actually bound, so port `0` can be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bound {
    pub smtp: Option<SocketAddr>,
    pub http: Option<SocketAddr>,
}

/// Collaborators the engine would otherwise build from its configuration.
pub struct EngineBuilder {
    config: EngineConfig,
    resolver: Option<Arc<dyn ExchangerResolver>>,
    transport: Option<Arc<dyn MailTransport>>,
    envelopes: Option<Arc<dyn EnvelopeBuilder>>,
    signer: Option<Arc<dyn DkimSigner>>,
    verifier: Option<Arc<dyn DkimVerifier>>,
    sink: Arc<dyn ErrorSink>,
    fallback: Option<Arc<dyn MailboxHandler>>,
    authorizer: Arc<dyn Authorizer>,
}

impl EngineBuilder {
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ExchangerResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_envelope_builder(mut self, envelopes: Arc<dyn EnvelopeBuilder>) -> Self {
        self.envelopes = Some(envelopes);
        self
    }

    /// Signs outbound mail with `signer` instead of the configured key.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn DkimSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Only consulted when `inbound.validate_dkim` is set.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn DkimVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sees inbound mail no registered mailbox accepted.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn MailboxHandler>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let config = self.config;
        let domain = config.domain.as_str();

        let resolver: Arc<dyn ExchangerResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(DnsResolver::with_config(&config.outbound.dns)?),
        };

        let signer: Option<Arc<dyn DkimSigner>> = match (self.signer, &config.outbound.dkim_key) {
            (Some(signer), _) => Some(signer),
            (None, Some(path)) => Some(Arc::new(RsaSigner::from_file(
                path,
                domain,
                &config.outbound.selector,
            )?)),
            (None, None) => None,
        };

        let verifier: Option<Arc<dyn DkimVerifier>> = match self.verifier {
            _ if !config.inbound.validate_dkim => None,
            Some(verifier) => Some(verifier),
            None => Some(Arc::new(AuthVerifier::new()?)),
        };

        let tls = config
            .smtp
            .tls
            .as_ref()
            .map(missive_common::tls::TlsPaths::load)
            .transpose()?;

        let mailboxes = Arc::new(MailboxRegistry::new());
        let inbound_middleware = Arc::new(MiddlewareChain::new());
        let outbound_middleware = Arc::new(MiddlewareChain::new());

        let transport: Arc<dyn MailTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(SmtpTransport::new(domain)),
        };

        let envelopes: Arc<dyn EnvelopeBuilder> = match self.envelopes {
            Some(envelopes) => envelopes,
            None => Arc::new(LettreEnvelopeBuilder),
        };

        let outbound = OutboundPipeline::new(resolver, transport)
            .with_middleware(Arc::clone(&outbound_middleware))
            .with_envelope_builder(envelopes)
            .with_signer(signer)
            .with_timeout(config.outbound.timeout());

        let inbound = InboundPipeline::new(Arc::clone(&mailboxes))
            .with_middleware(Arc::clone(&inbound_middleware))
            .with_verifier(verifier)
            .with_fallback(self.fallback)
            .with_error_sink(Arc::clone(&self.sink))
            .with_max_recipients(config.inbound.max_recipients);

        let smtp = SmtpConfig::new(domain)
            .with_max_bytes(config.inbound.max_bytes)
            .with_max_recipients(config.inbound.max_recipients)
            .with_timeout(config.inbound.timeout())
            .with_tls(tls);

        let (signal, _) = broadcast::channel(16);

        Ok(Engine {
            queue: OutboundQueue::new(config.outbound.queue_capacity),
            config,
            state: Arc::new(Mutex::new(State::Created)),
            mailboxes,
            inbound_middleware,
            outbound_middleware,
            inbound: Arc::new(inbound),
            outbound: Arc::new(outbound),
            smtp,
            workers: OnceLock::new(),
            sink: self.sink,
            authorizer: self.authorizer,
            signal,
            servers: Mutex::default(),
            drained: OnceLock::new(),
        })
    }
}

#[derive(Default)]
struct Servers {
    smtp: Option<JoinHandle<anyhow::Result<()>>>,
    http: Option<JoinHandle<Result<(), missive_ingest::IngestError>>>,
}

/// Owns both pipelines, the outbound queue with its workers, and the
/// listeners feeding them.
pub struct Engine {
    config: EngineConfig,
    state: Arc<Mutex<State>>,
    mailboxes: Arc<MailboxRegistry>,
    inbound_middleware: Arc<MiddlewareChain>,
    outbound_middleware: Arc<MiddlewareChain>,
    inbound: Arc<InboundPipeline>,
    outbound: Arc<OutboundPipeline>,
    smtp: SmtpConfig,
    queue: OutboundQueue,
    workers: OnceLock<Arc<WorkerPool>>,
    sink: Arc<dyn ErrorSink>,
    authorizer: Arc<dyn Authorizer>,
    signal: broadcast::Sender<Signal>,
    servers: Mutex<Servers>,
    drained: OnceLock<watch::Receiver<bool>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            resolver: None,
            transport: None,
            envelopes: None,
            signer: None,
            verifier: None,
            sink: Arc::new(TracingErrorSink),
            fallback: None,
            authorizer: Arc::new(LoopbackAuthorizer),
        }
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `setup` while holding the state lock, so it cannot interleave
    /// with [`Self::start`].
    fn setup<T>(&self, setup: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
        let state = self.state.lock();
        if *state != State::Created {
            return Err(EngineError::NotInSetup(*state));
        }

        setup()
    }

    /// Registers `local@{domain}`, returning the address it is stored under.
    pub fn register_mailbox(
        &self,
        local: &str,
        handler: Arc<dyn MailboxHandler>,
    ) -> Result<String, EngineError> {
        self.setup(|| {
            let address = self.mailboxes.register(local, &self.config.domain, handler)?;
            internal!(level = DEBUG, "Registered mailbox {address}");
            Ok(address)
        })
    }

    pub fn use_inbound(&self, stage: Arc<dyn Middleware>) -> Result<(), EngineError> {
        self.setup(|| {
            self.inbound_middleware.push(stage);
            Ok(())
        })
    }

    pub fn use_outbound(&self, stage: Arc<dyn Middleware>) -> Result<(), EngineError> {
        self.setup(|| {
            self.outbound_middleware.push(stage);
            Ok(())
        })
    }

    /// Queues `email` for the workers. `false` when the queue is full or
    /// already closed.
    pub fn enqueue(&self, email: Email) -> bool {
        self.queue.enqueue(email)
    }

    /// Delivers `email` on the calling task, bypassing the queue.
    pub async fn send_now(&self, email: Email) -> Result<(), DeliveryError> {
        self.outbound.deliver(email).await
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_workers(&self) -> usize {
        self.workers.get().map_or(0, |workers| workers.active())
    }

    /// Binds the configured listeners, then starts them along with the
    /// delivery workers.
    pub async fn start(&self) -> Result<Bound, EngineError> {
        if self.state() != State::Created {
            return Err(EngineError::AlreadyStarted);
        }

        let smtp = match self.config.smtp.listen {
            Some(address) => {
                let handler: Arc<dyn MessageHandler> = Arc::clone(&self.inbound) as _;
                let listener = Listener::bind(address, self.smtp.clone(), handler)
                    .await
                    .map_err(|source| EngineError::SmtpBind { address, source })?;
                let local = listener
                    .local_addr()
                    .map_err(|source| EngineError::SmtpBind { address, source })?;
                Some((listener, local))
            }
            None => None,
        };

        let http = match self.config.http.listen {
            Some(address) => {
                let ingest = Arc::new(Ingest {
                    queue: self.queue.clone(),
                    authorizer: Arc::clone(&self.authorizer),
                    sink: Arc::clone(&self.sink),
                    max_bytes: self.config.inbound.max_bytes,
                });
                let server =
                    IngestServer::bind(address, ingest, self.config.inbound.timeout()).await?;
                let local = server.local_addr().map_err(|source| {
                    missive_ingest::IngestError::Bind {
                        address: address.to_string(),
                        source,
                    }
                })?;
                Some((server, local))
            }
            None => None,
        };

        let bound = Bound {
            smtp: smtp.as_ref().map(|(_, local)| *local),
            http: http.as_ref().map(|(_, local)| *local),
        };

        let mut state = self.state.lock();
        if *state != State::Created {
            return Err(EngineError::AlreadyStarted);
        }

        self.workers.get_or_init(|| {
            Arc::new(WorkerPool::spawn(
                self.config.outbound.workers,
                &self.queue,
                Arc::clone(&self.outbound),
                Arc::clone(&self.sink),
            ))
        });

        let mut servers = self.servers.lock();
        servers.smtp = smtp.map(|(listener, _)| tokio::spawn(listener.serve(self.signal.subscribe())));
        servers.http = http.map(|(server, _)| tokio::spawn(server.serve(self.signal.subscribe())));

        *state = State::Running;
        internal!(
            level = INFO,
            "Engine for {} running with {} workers ({bound:?})",
            self.config.domain,
            self.config.outbound.workers
        );

        Ok(bound)
    }

    /// Stops accepting work and waits for what is in flight to finish.
    ///
    /// Only the first call starts the drain, which then runs on its own task;
    /// every caller returns once that single drain has completed. Bound it
    /// with `tokio::time::timeout`: a caller giving up does not stop the
    /// drain.
    pub async fn shutdown(&self) {
        let mut drained = self.drained.get_or_init(|| self.drain()).clone();
        // The drain task only drops its sender early if it panicked.
        let _ = drained.wait_for(|drained| *drained).await;
    }

    fn drain(&self) -> watch::Receiver<bool> {
        let (smtp, http) = {
            let mut state = self.state.lock();
            *state = State::ShuttingDown;

            let mut servers = self.servers.lock();
            (servers.smtp.take(), servers.http.take())
        };

        internal!(level = INFO, "Engine shutting down ...");

        if self.signal.send(Signal::Shutdown).is_err() {
            internal!(level = DEBUG, "No listeners were running");
        }

        self.queue.close();
        let workers = self.workers.get().cloned();
        if workers.is_none() {
            let discarded = self.queue.discard();
            if discarded > 0 {
                report(
                    self.sink.as_ref(),
                    &anyhow::anyhow!(
                        "Discarded {discarded} queued emails, the engine was never started"
                    ),
                );
            }
        }

        let (done, drained) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);

        tokio::spawn(async move {
            tokio::join!(
                async {
                    if let Some(handle) = http {
                        finished(
                            sink.as_ref(),
                            "HTTP ingestion",
                            handle.await.map(|r| r.map_err(Into::into)),
                        );
                    }
                },
                async {
                    if let Some(handle) = smtp {
                        finished(sink.as_ref(), "SMTP listener", handle.await);
                    }
                },
                async {
                    if let Some(workers) = workers {
                        workers.join().await;
                    }
                    internal!(level = DEBUG, "Outbound workers stopped");
                },
            );

            *state.lock() = State::Stopped;
            internal!(level = INFO, "Engine stopped");
            done.send_replace(true);
        });

        drained
    }
}

fn finished(sink: &dyn ErrorSink, name: &str, result: Result<anyhow::Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => internal!(level = DEBUG, "{name} stopped"),
        Ok(Err(err)) => report(sink, &err.context(format!("{name} stopped with an error"))),
        Err(err) => report(
            sink,
            &anyhow::Error::new(err).context(format!("{name} did not exit cleanly")),
        ),
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("domain", &self.config.domain)
            .field("state", &self.state())
            .field("mailboxes", &self.mailboxes.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
