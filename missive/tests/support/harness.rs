#![allow(dead_code)]

//! Runs a complete engine on loopback ports.
//!
//! Outbound delivery never leaves the process: exchangers come from a fixed
//! table and the transport records what it was asked to send. Inbound mail
//! goes through the real SMTP listener, and ingestion through the real HTTP
//! endpoint.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use missive::{Bound, Engine, EngineConfig, EngineError};
use missive_common::{Address, Email, ErrorSink, MailboxHandler};
use missive_delivery::{Exchanger, ExchangerResolver, MailTransport, TransportError, dns::DnsError};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::Notify,
};

pub const DOMAIN: &str = "test.example.com";

struct StaticResolver;

#[async_trait]
impl ExchangerResolver for StaticResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<Exchanger>, DnsError> {
        match domain {
            "nowhere.test" => Err(DnsError::NoExchanger(domain.to_string())),
            _ => Ok(vec![
                Exchanger::new(format!("mx2.{domain}"), 20),
                Exchanger::new(format!("mx1.{domain}"), 10),
            ]),
        }
    }
}

/// One message handed to the transport.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub host: String,
    pub recipient: String,
    pub message: Vec<u8>,
}

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Recorded>>,
    /// How long each send takes.
    pub delay: Mutex<Duration>,
    notify: Notify,
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(
        &self,
        host: &str,
        _port: u16,
        _from: &Address,
        recipient: &Address,
        message: &[u8],
    ) -> Result<(), TransportError> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.sent.lock().push(Recorded {
            host: host.to_string(),
            recipient: recipient.address.clone(),
            message: message.to_vec(),
        });
        self.notify.notify_waiters();
        Ok(())
    }
}

#[derive(Default)]
pub struct CollectingSink(pub Mutex<Vec<String>>);

impl ErrorSink for CollectingSink {
    fn report(&self, error: &anyhow::Error) {
        self.0.lock().push(format!("{error:#}"));
    }
}

/// Keeps every email a mailbox handler was given.
#[derive(Default)]
pub struct Mailbox(pub Mutex<Vec<Email>>);

#[async_trait]
impl MailboxHandler for Mailbox {
    async fn invoke(&self, email: &Email) -> anyhow::Result<()> {
        self.0.lock().push(email.clone());
        Ok(())
    }
}

pub fn config() -> EngineConfig {
    let mut config = EngineConfig::new(DOMAIN);
    config.outbound.workers = 2;
    config.outbound.queue_capacity = 16;
    config.inbound.validate_dkim = false;
    config.inbound.timeout_secs = 5;
    config.smtp.listen = Some("127.0.0.1:0".parse().unwrap());
    config.http.listen = Some("127.0.0.1:0".parse().unwrap());
    config
}

pub struct EngineHarness {
    pub engine: Arc<Engine>,
    pub transport: Arc<RecordingTransport>,
    pub sink: Arc<CollectingSink>,
    pub fallback: Arc<Mailbox>,
}

impl EngineHarness {
    /// Builds an engine from `config` without starting it.
    pub fn build(config: EngineConfig) -> Result<Self, EngineError> {
        let transport = Arc::new(RecordingTransport::default());
        let sink = Arc::new(CollectingSink::default());
        let fallback = Arc::new(Mailbox::default());

        let engine = Engine::builder(config)
            .with_resolver(Arc::new(StaticResolver))
            .with_transport(transport.clone())
            .with_error_sink(sink.clone())
            .with_fallback(fallback.clone())
            .build()?;

        Ok(Self {
            engine: Arc::new(engine),
            transport,
            sink,
            fallback,
        })
    }

    pub async fn start(&self) -> Bound {
        self.engine.start().await.unwrap()
    }

    pub fn sent(&self) -> Vec<Recorded> {
        self.transport.sent.lock().clone()
    }

    pub fn reported(&self) -> Vec<String> {
        self.sink.0.lock().clone()
    }

    /// Waits until the transport has seen at least `count` messages.
    pub async fn wait_for_sent(&self, count: usize, within: Duration) -> Vec<Recorded> {
        tokio::time::timeout(within, async {
            loop {
                let notified = self.transport.notify.notified();
                if self.transport.sent.lock().len() >= count {
                    return self.sent();
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} deliveries, got {:?}", self.sent()))
    }

    pub async fn shutdown(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.engine.shutdown())
            .await
            .unwrap();
    }
}

pub fn email(to: &[&str]) -> Email {
    Email::text(
        Address::new("Sender", format!("sender@{DOMAIN}")),
        to.iter()
            .map(|address| Address::new("Recipient", *address))
            .collect(),
        "Engine test",
        "Hello from the engine",
    )
}

/// Plays one SMTP transaction and returns the reply to the final dot.
pub async fn send_smtp(addr: SocketAddr, from: &str, to: &[&str], message: &str) -> String {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut stream = BufReader::new(stream);

    async fn reply(stream: &mut BufReader<TcpStream>) -> String {
        loop {
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            if line.as_bytes().get(3) != Some(&b'-') {
                return line.trim_end().to_string();
            }
        }
    }

    async fn command(stream: &mut BufReader<TcpStream>, line: &str) -> String {
        stream.get_mut().write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
        reply(stream).await
    }

    assert!(reply(&mut stream).await.starts_with("220"));
    assert!(command(&mut stream, "EHLO client.test").await.starts_with("250"));
    assert!(command(&mut stream, &format!("MAIL FROM:<{from}>")).await.starts_with("250"));
    for recipient in to {
        assert!(command(&mut stream, &format!("RCPT TO:<{recipient}>")).await.starts_with("250"));
    }
    assert!(command(&mut stream, "DATA").await.starts_with("354"));

    let body = message.replace('\n', "\r\n");
    let result = command(&mut stream, &format!("{body}\r\n.")).await;
    command(&mut stream, "QUIT").await;

    result
}

/// Posts `body` to the ingestion endpoint, returning the status and body.
pub async fn post_queue(addr: SocketAddr, body: &[u8]) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "POST /queue HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();

    (status, body)
}
