#![allow(dead_code)]

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use missive_common::{InboundOutcome, Signal};
use missive_smtp::{Listener, MessageHandler, SmtpConfig};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::broadcast,
    task::JoinHandle,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{ClientConfig, RootCertStore, crypto::ring, pki_types::ServerName, version::TLS13},
};

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../missive-common/tests/fixtures")
        .join(name)
}

/// Answers every message with a fixed outcome and keeps what it was given.
pub struct Recorder {
    outcome: InboundOutcome,
    pub messages: Mutex<Vec<Vec<u8>>>,
}

impl Recorder {
    pub fn new(outcome: InboundOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            messages: Mutex::default(),
        })
    }
}

#[async_trait::async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, message: &[u8]) -> InboundOutcome {
        self.messages.lock().push(message.to_vec());
        self.outcome.clone()
    }
}

pub struct Server {
    pub addr: SocketAddr,
    pub shutdown: broadcast::Sender<Signal>,
    pub handle: JoinHandle<anyhow::Result<()>>,
}

impl Server {
    pub async fn start(config: SmtpConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), config, handler)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, receiver) = broadcast::channel(1);

        Self {
            addr,
            shutdown,
            handle: tokio::spawn(listener.serve(receiver)),
        }
    }

    pub async fn stop(self) {
        self.shutdown.send(Signal::Shutdown).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

/// A line-oriented SMTP client good enough to script a session.
pub struct Client<S> {
    stream: BufReader<S>,
}

impl Client<TcpStream> {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: BufReader::new(TcpStream::connect(addr).await.unwrap()),
        }
    }

    /// Runs the client side of the TLS handshake after a `220` to `STARTTLS`.
    pub async fn starttls(self) -> Client<TlsStream<TcpStream>> {
        let mut roots = RootCertStore::empty();
        let ca = std::fs::read(fixture("tls_ca.pem")).unwrap();
        for cert in rustls_pemfile::certs(&mut ca.as_slice()) {
            roots.add(cert.unwrap()).unwrap();
        }

        let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_protocol_versions(&[&TLS13])
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let stream = TlsConnector::from(Arc::new(config))
            .connect(
                ServerName::try_from("localhost".to_string()).unwrap(),
                self.stream.into_inner(),
            )
            .await
            .unwrap();

        Client {
            stream: BufReader::new(stream),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub async fn write(&mut self, data: &str) {
        self.stream.get_mut().write_all(data.as_bytes()).await.unwrap();
        self.stream.get_mut().flush().await.unwrap();
    }

    /// Reads one (possibly multiline) reply.
    pub async fn reply(&mut self) -> (u16, Vec<String>) {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            let read = self.stream.read_line(&mut line).await.unwrap();
            assert!(read > 0, "connection closed while waiting for a reply");

            let line = line.trim_end().to_string();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);

            if last {
                break;
            }
        }

        let code = lines[0][..3].parse().unwrap();
        (code, lines)
    }

    pub async fn command(&mut self, command: &str) -> (u16, Vec<String>) {
        self.write(&format!("{command}\r\n")).await;
        self.reply().await
    }

    /// `true` once the server has closed the connection.
    pub async fn closed(&mut self) -> bool {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.map_or(true, |read| read == 0)
    }
}
