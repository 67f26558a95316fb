//! Everything that happens to a message between the protocol layer handing
//! it over and a mailbox handler receiving it.

pub mod message;
pub mod pipeline;
pub mod registry;

pub use message::MessageError;
pub use pipeline::{DEFAULT_MAX_RECIPIENTS, InboundPipeline};
pub use registry::{MailboxRegistry, RegistryError};
