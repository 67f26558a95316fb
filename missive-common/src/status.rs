use core::fmt::{self, Display, Formatter};

macro_rules! statuses {
    ($($name:ident = $code:literal => $text:literal),* $(,)?) => {
        /// SMTP reply codes the server emits.
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
        pub enum Status {
            $($name,)*
            Unknown(u16),
        }

        impl From<u16> for Status {
            fn from(value: u16) -> Self {
                match value {
                    $($code => Self::$name,)*
                    _ => Self::Unknown(value),
                }
            }
        }

        impl From<Status> for u16 {
            fn from(value: Status) -> Self {
                match value {
                    $(Status::$name => $code,)*
                    Status::Unknown(code) => code,
                }
            }
        }

        impl Status {
            /// Text sent alongside the code when the caller has nothing more specific.
            pub const fn default_text(self) -> &'static str {
                match self {
                    $(Self::$name => $text,)*
                    Self::Unknown(_) => "Unknown",
                }
            }
        }
    };
}

statuses! {
    ServiceReady = 220 => "Service ready",
    GoodBye = 221 => "Bye",
    Ok = 250 => "Ok",
    StartMailInput = 354 => "End data with <CR><LF>.<CR><LF>",
    Unavailable = 421 => "Service not available, closing transmission channel",
    TransactionReset = 451 => "Requested action aborted: transaction reset",
    TooManyRecipients = 452 => "Too many recipients",
    SyntaxError = 500 => "Syntax error, command unrecognised",
    ParameterError = 501 => "Syntax error in parameters or arguments",
    NotImplemented = 502 => "Command not implemented",
    InvalidCommandSequence = 503 => "Bad sequence of commands",
    UnknownRecipient = 550 => "Unknown Recipient",
    ExceededStorage = 552 => "Message exceeds fixed maximum message size",
}

impl Status {
    /// Checks if the status is a permanent rejection
    pub fn is_permanent(self) -> bool {
        u16::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u16::from(self))
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u16::from(*self))
    }
}
