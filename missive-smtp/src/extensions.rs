use core::fmt::{self, Display};

/// SMTP service extensions advertised in the EHLO reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// RFC 1870. Advertises the largest message accepted, `0` meaning no limit.
    Size(usize),
    /// RFC 6152.
    EightBitMime,
    /// RFC 3207. Only offered on plaintext connections with TLS configured.
    StartTls,
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::Size(0) => fmt.write_str("SIZE"),
            Self::Size(max) => write!(fmt, "SIZE {max}"),
            Self::EightBitMime => fmt.write_str("8BITMIME"),
            Self::StartTls => fmt.write_str("STARTTLS"),
        }
    }
}
