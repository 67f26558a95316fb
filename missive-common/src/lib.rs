pub mod dkim;
pub mod email;
pub mod error;
pub mod handler;
pub mod logging;
pub mod middleware;
pub mod outcome;
pub mod status;
pub mod tls;

pub use tracing;

pub use email::{Address, Attachment, Email};
pub use handler::{ErrorSink, MailboxHandler, TracingErrorSink};
pub use middleware::{Middleware, MiddlewareChain, Verdict};
pub use outcome::InboundOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
