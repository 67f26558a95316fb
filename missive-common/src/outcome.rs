use crate::status::Status;

/// How the inbound pipeline wants the protocol layer to answer a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Fully handled.
    Accepted,
    /// Transient rejection; the peer may retry. The reason is for logs only.
    Reset(String),
    /// Permanent rejection with a protocol code.
    Reject { code: Status, message: String },
}

impl InboundOutcome {
    pub fn unknown_recipient() -> Self {
        Self::Reject {
            code: Status::UnknownRecipient,
            message: Status::UnknownRecipient.default_text().to_string(),
        }
    }

    pub fn reset(reason: impl Into<String>) -> Self {
        Self::Reset(reason.into())
    }

    /// The SMTP reply line for this outcome.
    pub fn reply(&self) -> (Status, String) {
        match self {
            Self::Accepted => (Status::Ok, Status::Ok.default_text().to_string()),
            Self::Reset(_) => (
                Status::TransactionReset,
                Status::TransactionReset.default_text().to_string(),
            ),
            Self::Reject { code, message } => (*code, message.clone()),
        }
    }
}
