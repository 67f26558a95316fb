use std::{net::SocketAddr, sync::Arc};

use missive_common::{Signal, incoming, internal, outgoing, status::Status, tracing};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
};

use crate::{
    MessageHandler, SmtpConfig,
    command::{Command, HeloVariant},
    connection::Connection,
    error::{SmtpError, SmtpResult},
    extensions::Extension,
};

/// RFC 5321 limits a command line to 512 octets including the CRLF.
const COMMAND_LINE_LIMIT: usize = 512;
/// Text lines are limited to 1000 octets; this leaves room for clients that
/// do not fold.
const DATA_LINE_LIMIT: usize = 64 * 1024;

#[derive(PartialEq, Eq, Debug)]
pub enum Event {
    ConnectionClose,
    ConnectionKeepAlive,
    StartTls,
    Data,
}

pub type Response = (Vec<String>, Event);

/// Where the client is in the mail transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Connect,
    Greeted,
    MailFrom {
        sender: Option<String>,
    },
    RcptTo {
        sender: Option<String>,
        recipients: Vec<String>,
    },
}

fn reply(status: Status, text: impl core::fmt::Display) -> String {
    format!("{status} {text}")
}

fn keep_alive(status: Status, text: impl core::fmt::Display) -> Response {
    (vec![reply(status, text)], Event::ConnectionKeepAlive)
}

pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    peer: SocketAddr,
    config: Arc<SmtpConfig>,
    handler: Arc<dyn MessageHandler>,
    connection: Connection<Stream>,
    state: State,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn new(
        stream: Stream,
        peer: SocketAddr,
        config: Arc<SmtpConfig>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            peer,
            config,
            handler,
            connection: Connection::new(stream),
            state: State::Connect,
        }
    }

    fn extensions(&self) -> Vec<Extension> {
        let mut extensions = vec![
            Extension::Size(self.config.max_bytes),
            Extension::EightBitMime,
        ];
        if self.config.tls.is_some() && !self.connection.is_tls() {
            extensions.push(Extension::StartTls);
        }
        extensions
    }

    fn response_ehlo(&self, host: &str) -> Response {
        let extensions = self.extensions();
        let mut lines = vec![format!("{}-{} Hello {host}", Status::Ok, self.config.domain)];

        for (idx, extension) in extensions.iter().enumerate() {
            let separator = if idx == extensions.len() - 1 { ' ' } else { '-' };
            lines.push(format!("{}{separator}{extension}", Status::Ok));
        }

        (lines, Event::ConnectionKeepAlive)
    }

    fn response_mail_from(&mut self, sender: Option<String>, size: Option<usize>) -> Response {
        match self.state {
            State::Connect => keep_alive(Status::InvalidCommandSequence, "Send HELO/EHLO first"),
            State::MailFrom { .. } | State::RcptTo { .. } => {
                keep_alive(Status::InvalidCommandSequence, "Sender already specified")
            }
            State::Greeted => {
                if self.config.max_bytes > 0
                    && size.is_some_and(|size| size > self.config.max_bytes)
                {
                    return keep_alive(
                        Status::ExceededStorage,
                        Status::ExceededStorage.default_text(),
                    );
                }

                self.state = State::MailFrom { sender };
                keep_alive(Status::Ok, "Ok")
            }
        }
    }

    fn response_rcpt_to(&mut self, recipient: String) -> Response {
        match &mut self.state {
            State::MailFrom { sender } => {
                self.state = State::RcptTo {
                    sender: sender.take(),
                    recipients: vec![recipient],
                };
                keep_alive(Status::Ok, "Ok")
            }
            State::RcptTo { recipients, .. } => {
                if recipients.len() >= self.config.max_recipients {
                    return keep_alive(
                        Status::TooManyRecipients,
                        Status::TooManyRecipients.default_text(),
                    );
                }

                recipients.push(recipient);
                keep_alive(Status::Ok, "Ok")
            }
            State::Connect | State::Greeted => {
                keep_alive(Status::InvalidCommandSequence, "Need MAIL before RCPT")
            }
        }
    }

    /// Generate the reply to `command`, updating the transaction state.
    pub fn response(&mut self, command: Command) -> Response {
        match command {
            Command::Helo(HeloVariant::Ehlo(host)) => {
                self.state = State::Greeted;
                self.response_ehlo(&host)
            }
            Command::Helo(HeloVariant::Helo(host)) => {
                self.state = State::Greeted;
                keep_alive(Status::Ok, format_args!("Hello {host}"))
            }
            Command::MailFrom(sender, params) => self.response_mail_from(sender, params.size()),
            Command::RcptTo(recipient) => self.response_rcpt_to(recipient),
            Command::Data => {
                if matches!(self.state, State::RcptTo { .. }) {
                    (
                        vec![reply(
                            Status::StartMailInput,
                            Status::StartMailInput.default_text(),
                        )],
                        Event::Data,
                    )
                } else {
                    keep_alive(Status::InvalidCommandSequence, "Need RCPT before DATA")
                }
            }
            Command::Rset => {
                if self.state != State::Connect {
                    self.state = State::Greeted;
                }
                keep_alive(Status::Ok, "Ok")
            }
            Command::Noop => keep_alive(Status::Ok, "Ok"),
            Command::Quit => (
                vec![reply(Status::GoodBye, Status::GoodBye.default_text())],
                Event::ConnectionClose,
            ),
            Command::StartTls if self.config.tls.is_none() || self.connection.is_tls() => {
                keep_alive(Status::NotImplemented, "STARTTLS not available")
            }
            Command::StartTls => match self.state {
                State::MailFrom { .. } | State::RcptTo { .. } => {
                    keep_alive(Status::InvalidCommandSequence, "Transaction in progress")
                }
                State::Connect | State::Greeted => (
                    vec![reply(Status::ServiceReady, "Ready to begin TLS")],
                    Event::StartTls,
                ),
            },
            Command::Unsupported(_) => keep_alive(
                Status::NotImplemented,
                Status::NotImplemented.default_text(),
            ),
            Command::Invalid(reason) => {
                tracing::debug!("Invalid command: {reason}");
                keep_alive(Status::SyntaxError, Status::SyntaxError.default_text())
            }
        }
    }

    async fn send(&mut self, lines: &[String]) -> SmtpResult<()> {
        for line in lines {
            outgoing!("{line}");
            self.connection.send(line).await?;
        }

        Ok(())
    }

    async fn read_line(&mut self, limit: usize) -> SmtpResult<Option<Vec<u8>>> {
        tokio::time::timeout(self.config.timeout, self.connection.read_line(limit))
            .await
            .map_err(|_| SmtpError::Timeout)?
    }

    /// Reads the message following `DATA` up to the lone dot, undoing dot
    /// stuffing. Returns `None` if the message grew beyond the size limit;
    /// the rest of it is still consumed.
    async fn receive_data(&mut self) -> SmtpResult<Option<Vec<u8>>> {
        let max_bytes = self.config.max_bytes;
        let mut message = Vec::new();
        let mut oversized = false;

        loop {
            let line = self
                .read_line(DATA_LINE_LIMIT)
                .await?
                .ok_or(SmtpError::Closed)?;

            if line == b".\r\n" || line == b".\n" {
                break;
            }

            let line = line.strip_prefix(b".").unwrap_or(&line);
            if oversized || (max_bytes > 0 && message.len() + line.len() > max_bytes) {
                oversized = true;
                continue;
            }

            message.extend_from_slice(line);
        }

        Ok((!oversized).then_some(message))
    }

    async fn deliver(&mut self) -> SmtpResult<String> {
        let Some(message) = self.receive_data().await? else {
            incoming!(level = INFO, "Message from {} exceeded the size limit", self.peer);
            return Ok(reply(
                Status::ExceededStorage,
                Status::ExceededStorage.default_text(),
            ));
        };

        incoming!(level = DEBUG, "Received {} byte message from {}", message.len(), self.peer);
        let (status, text) = self.handler.handle(&message).await.reply();

        Ok(reply(status, text))
    }

    /// Serves the client until it quits, the connection drops, or `shutdown`
    /// fires while the session is waiting for a command. A closed shutdown
    /// channel counts as a shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<Signal>) -> SmtpResult<()> {
        internal!("Connected to {}", self.peer);

        let greeting = reply(Status::ServiceReady, &self.config.domain);
        self.send(&[greeting]).await?;

        loop {
            let line = tokio::select! {
                _ = shutdown.recv() => {
                    self.send(&[reply(Status::Unavailable, "Server shutting down")]).await?;
                    break;
                }
                line = self.read_line(COMMAND_LINE_LIMIT) => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(SmtpError::Timeout) => {
                    self.send(&[reply(Status::Unavailable, "Timed out waiting for command")])
                        .await?;
                    break;
                }
                Err(err @ SmtpError::LineTooLong(_)) => {
                    self.send(&[reply(Status::SyntaxError, "Line too long")]).await?;
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            let command = Command::try_from(line.as_slice()).unwrap_or_else(|err| err);
            incoming!("{command}");

            let (lines, event) = self.response(command);
            self.send(&lines).await?;

            match event {
                Event::ConnectionKeepAlive => {}
                Event::ConnectionClose => break,
                Event::Data => {
                    let response = match self.deliver().await {
                        Ok(response) => response,
                        Err(SmtpError::Timeout) => {
                            self.send(&[reply(Status::Unavailable, "Timed out receiving data")])
                                .await?;
                            break;
                        }
                        Err(err) => return Err(err),
                    };

                    self.state = State::Greeted;
                    self.send(&[response]).await?;
                }
                Event::StartTls => {
                    let Some(acceptor) = self.config.tls.clone() else {
                        continue;
                    };

                    let (connection, info) = self.connection.upgrade(&acceptor).await?;
                    internal!(level = DEBUG, "Connection upgraded with {info:?}");

                    self.connection = connection;
                    self.state = State::Connect;
                }
            }
        }

        internal!("Connection to {} closed", self.peer);
        Ok(())
    }
}
