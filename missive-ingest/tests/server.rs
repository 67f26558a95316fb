use std::{net::SocketAddr, sync::Arc, time::Duration};

use missive_common::{Address, Email, ErrorSink, Signal};
use missive_delivery::OutboundQueue;
use missive_ingest::{Ingest, IngestServer, LoopbackAuthorizer, Summary};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::broadcast,
};

#[derive(Default)]
struct Sink(Mutex<Vec<String>>);

impl ErrorSink for Sink {
    fn report(&self, error: &anyhow::Error) {
        self.0.lock().push(format!("{error:#}"));
    }
}

async fn post(addr: SocketAddr, content_type: &str, body: &[u8]) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "POST /queue HTTP/1.1\r\nHost: {addr}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
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

fn email(to: &str) -> Email {
    Email::html(
        Address::new("Sender", "sender@example.org"),
        vec![Address::new("Recipient", to)],
        "Over HTTP",
        "<p>Hello</p>",
    )
}

#[tokio::test]
async fn test_queue_over_http_and_shut_down() {
    let queue = OutboundQueue::new(4);
    let sink = Arc::new(Sink::default());
    let ingest = Arc::new(Ingest {
        queue: queue.clone(),
        authorizer: Arc::new(LoopbackAuthorizer),
        sink: sink.clone(),
        max_bytes: 1 << 20,
    });

    let server = IngestServer::bind("127.0.0.1:0".parse().unwrap(), ingest, Duration::from_secs(5))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown, receiver) = broadcast::channel(1);
    let handle = tokio::spawn(server.serve(receiver));

    let body = serde_json::to_vec(&[email("a@example.com"), email("b@example.com")]).unwrap();
    let (status, response) = post(addr, "application/json", &body).await;
    assert_eq!(status, 201);
    let summary: Summary = serde_json::from_str(&response).unwrap();
    assert_eq!(summary.accepted, 2);
    assert!(summary.rejected.is_empty());
    assert_eq!(queue.len(), 2);

    let (status, _) = post(addr, "text/plain", &body).await;
    assert_eq!(status, 415);

    let (status, response) = post(addr, "application/json", b"{not json").await;
    assert_eq!(status, 422);
    assert_eq!(response, "Invalid Form Body");
    assert_eq!(sink.0.lock().len(), 1);

    shutdown.send(Signal::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_bind_failure_reports_address() {
    let ingest = Arc::new(Ingest {
        queue: OutboundQueue::new(1),
        authorizer: Arc::new(LoopbackAuthorizer),
        sink: Arc::new(Sink::default()),
        max_bytes: 1024,
    });

    let first = IngestServer::bind("127.0.0.1:0".parse().unwrap(), ingest.clone(), Duration::from_secs(1))
        .await
        .unwrap();
    let taken = first.local_addr().unwrap();

    let Err(err) = IngestServer::bind(taken, ingest, Duration::from_secs(1)).await else {
        panic!("second bind to {taken} should fail");
    };
    assert!(err.to_string().contains(&taken.to_string()));
}
