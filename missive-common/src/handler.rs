use std::panic::{AssertUnwindSafe, catch_unwind};

use async_trait::async_trait;

use crate::{Email, internal};

/// Receives inbound mail for a registered mailbox, or for nobody at all
/// when used as the fallback handler.
#[async_trait]
pub trait MailboxHandler: Send + Sync {
    async fn invoke(&self, email: &Email) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> MailboxHandler for F
where
    F: Fn(&Email) -> anyhow::Result<()> + Send + Sync,
{
    async fn invoke(&self, email: &Email) -> anyhow::Result<()> {
        self(email)
    }
}

/// Where every failure in the engine ends up.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &anyhow::Error);
}

impl<F> ErrorSink for F
where
    F: Fn(&anyhow::Error) + Send + Sync,
{
    fn report(&self, error: &anyhow::Error) {
        self(error);
    }
}

/// Reports errors as `ERROR` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &anyhow::Error) {
        internal!(level = ERROR, "{error:#}");
    }
}

/// Hand `error` to `sink`, containing any panic the sink raises.
pub fn report(sink: &dyn ErrorSink, error: &anyhow::Error) {
    if catch_unwind(AssertUnwindSafe(|| sink.report(error))).is_err() {
        internal!(level = ERROR, "Error sink panicked while reporting: {error:#}");
    }
}
