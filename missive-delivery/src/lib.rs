pub mod dns;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod transport;

pub use dns::{DnsResolver, Exchanger, ExchangerResolver};
pub use envelope::{EnvelopeBuilder, LettreEnvelopeBuilder};
pub use error::{DeliveryError, EnvelopeError, QueueError, TransportError};
pub use pipeline::{OutboundPipeline, SMTP_PORT, attempt_budget};
pub use queue::{OutboundQueue, WorkerPool};
pub use transport::{MailTransport, SmtpTransport};

/// Default worker count: one per available core.
pub fn default_workers() -> usize {
    num_cpus::get()
}
