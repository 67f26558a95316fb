use core::fmt::Display;

use missive_common::tracing;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, rustls::ServerConnection, server::TlsStream};

use crate::error::{SmtpError, SmtpResult};

const CHUNK_SIZE: usize = 8192;

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Negotiated TLS parameters, for the logs.
#[derive(Debug)]
pub struct TlsInfo {
    pub version: String,
    pub cipher: String,
}

impl TlsInfo {
    fn of(conn: &ServerConnection) -> Self {
        Self {
            version: conn
                .protocol_version()
                .map_or_else(String::new, |version| format!("{version:?}")),
            cipher: conn
                .negotiated_cipher_suite()
                .map_or_else(String::new, |suite| format!("{:?}", suite.suite())),
        }
    }
}

/// A client connection, before or after STARTTLS, with its own line buffer.
pub enum Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    Plain {
        stream: Stream,
        read_buf: Vec<u8>,
    },
    Tls {
        stream: Box<TlsStream<Stream>>,
        read_buf: Vec<u8>,
    },
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub const fn new(stream: Stream) -> Self {
        Self::Plain {
            stream,
            read_buf: Vec::new(),
        }
    }

    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    fn parts(&mut self) -> (&mut dyn Io, &mut Vec<u8>) {
        match self {
            Self::Plain { stream, read_buf } => (stream, read_buf),
            Self::Tls { stream, read_buf } => (stream.as_mut(), read_buf),
        }
    }

    /// Writes one reply line, appending the CRLF.
    pub async fn send<S: Display + Send + Sync>(&mut self, response: &S) -> SmtpResult<()> {
        let line = format!("{response}\r\n");
        let (stream, _) = self.parts();

        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;

        Ok(())
    }

    /// Reads up to and including the next `\n`.
    ///
    /// Returns `None` once the peer has closed its side. A line longer than
    /// `limit` is an error and whatever was buffered is discarded.
    pub async fn read_line(&mut self, limit: usize) -> SmtpResult<Option<Vec<u8>>> {
        let (stream, read_buf) = self.parts();
        let mut chunk = [0; CHUNK_SIZE];

        loop {
            if let Some(end) = read_buf.iter().position(|byte| *byte == b'\n') {
                if end + 1 > limit {
                    read_buf.clear();
                    return Err(SmtpError::LineTooLong(limit));
                }
                return Ok(Some(read_buf.drain(..=end).collect()));
            }

            if read_buf.len() > limit {
                read_buf.clear();
                return Err(SmtpError::LineTooLong(limit));
            }

            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                return Ok(None);
            }
            read_buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Performs the server side of the TLS handshake.
    ///
    /// Anything the client pipelined after `STARTTLS` is dropped, as RFC 3207
    /// requires.
    pub async fn upgrade(self, acceptor: &TlsAcceptor) -> SmtpResult<(Self, TlsInfo)> {
        tracing::debug!("Upgrading connection ...");

        match self {
            Self::Plain { stream, .. } => {
                let stream = acceptor.accept(stream).await?;
                let info = TlsInfo::of(stream.get_ref().1);

                Ok((
                    Self::Tls {
                        stream: Box::new(stream),
                        read_buf: Vec::new(),
                    },
                    info,
                ))
            }
            Self::Tls { .. } => Err(SmtpError::Tls("TLS already negotiated".to_string())),
        }
    }
}
