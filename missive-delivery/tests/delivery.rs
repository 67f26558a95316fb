//! Delivery against a live (mock) SMTP peer.
#![allow(clippy::unwrap_used)]

mod support;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use missive_common::{Address, Email};
use missive_delivery::{
    DeliveryError, Exchanger, ExchangerResolver, MailTransport, OutboundPipeline, OutboundQueue,
    SmtpTransport, WorkerPool, dns::DnsError,
};
use support::{MockSmtpServer, SmtpCommand};

/// Points every domain at the mock server.
struct Localhost;

#[async_trait]
impl ExchangerResolver for Localhost {
    async fn resolve(&self, _: &str) -> Result<Vec<Exchanger>, DnsError> {
        Ok(vec![Exchanger::new("127.0.0.1", 10)])
    }
}

fn email(to: &[&str]) -> Email {
    Email::text(
        Address::new("Sender", "sender@example.org"),
        to.iter().map(|rcpt| Address::new("Recipient", *rcpt)).collect(),
        "Delivery test",
        "Hello from the delivery tests",
    )
}

#[tokio::test]
async fn test_transport_speaks_smtp() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let transport = SmtpTransport::new("missive.test").plaintext();

    transport
        .send(
            "127.0.0.1",
            server.port(),
            &Address::new("Sender", "sender@example.org"),
            &Address::new("Recipient", "rcpt@example.com"),
            b"Subject: hi\r\n\r\nbody\r\n",
        )
        .await
        .unwrap();

    let commands = server.commands().await;
    assert_eq!(commands[0], SmtpCommand::Ehlo("missive.test".to_string()));
    assert!(commands.contains(&SmtpCommand::MailFrom("FROM:<sender@example.org>".to_string())));
    assert!(commands.contains(&SmtpCommand::RcptTo("TO:<rcpt@example.com>".to_string())));
    assert!(commands.contains(&SmtpCommand::Data));

    let messages = server.messages().await;
    assert_eq!(messages.len(), 1);
    assert!(String::from_utf8_lossy(&messages[0]).contains("body"));
}

#[tokio::test]
async fn test_transport_falls_back_without_starttls() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let transport = SmtpTransport::new("missive.test");

    transport
        .send(
            "127.0.0.1",
            server.port(),
            &Address::new("Sender", "sender@example.org"),
            &Address::new("Recipient", "rcpt@example.com"),
            b"Subject: hi\r\n\r\nbody\r\n",
        )
        .await
        .unwrap();

    assert_eq!(server.messages().await.len(), 1);
}

#[tokio::test]
async fn test_transport_reports_rejection() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(550, "No such user")
        .build()
        .await
        .unwrap();
    let transport = SmtpTransport::new("missive.test").plaintext();

    let err = transport
        .send(
            "127.0.0.1",
            server.port(),
            &Address::new("Sender", "sender@example.org"),
            &Address::new("Recipient", "ghost@example.com"),
            b"Subject: hi\r\n\r\nbody\r\n",
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("No such user"));
    assert!(server.messages().await.is_empty());
}

#[tokio::test]
async fn test_pipeline_delivers_each_recipient_separately() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let pipeline = OutboundPipeline::new(
        Arc::new(Localhost),
        Arc::new(SmtpTransport::new("missive.test").plaintext()),
    )
    .with_port(server.port());

    pipeline
        .deliver(email(&["one@example.com", "two@example.net"]))
        .await
        .unwrap();

    let commands = server.commands().await;
    let recipients = commands
        .iter()
        .filter_map(|command| match command {
            SmtpCommand::RcptTo(rcpt) => Some(rcpt.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(recipients, vec!["TO:<one@example.com>", "TO:<two@example.net>"]);

    let messages = server.messages().await;
    assert_eq!(messages.len(), 2);
    let first = String::from_utf8_lossy(&messages[0]);
    assert!(first.contains("one@example.com"));
    assert!(!first.contains("two@example.net"));
}

#[tokio::test]
async fn test_pipeline_exhausts_budget_against_rejecting_peer() {
    let server = MockSmtpServer::builder()
        .with_data_end_response(451, "Try again later")
        .build()
        .await
        .unwrap();
    let pipeline = OutboundPipeline::new(
        Arc::new(Localhost),
        Arc::new(SmtpTransport::new("missive.test").plaintext()),
    )
    .with_port(server.port())
    .with_timeout(Duration::from_secs(20));

    let err = pipeline
        .deliver(email(&["one@example.com"]))
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Exhausted(_)));
    assert_eq!(err.attempts().len(), 2);
    assert!(err.to_string().contains("attempt 2/2 failed: "));
    assert_eq!(server.messages().await.len(), 2);
}

#[tokio::test]
async fn test_queue_feeds_workers() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let pipeline = Arc::new(
        OutboundPipeline::new(
            Arc::new(Localhost),
            Arc::new(SmtpTransport::new("missive.test").plaintext()),
        )
        .with_port(server.port()),
    );

    let queue = OutboundQueue::new(8);
    for i in 0..4 {
        assert!(queue.enqueue(email(&[&format!("user{i}@example.com")])));
    }

    let failures = Arc::new(Mutex::new(Vec::new()));
    let reported = Arc::clone(&failures);
    let sink = move |err: &anyhow::Error| reported.lock().unwrap().push(err.to_string());

    let pool = WorkerPool::spawn(2, &queue, pipeline, Arc::new(sink));
    queue.close();
    pool.join().await;

    assert!(failures.lock().unwrap().is_empty());
    assert_eq!(server.messages().await.len(), 4);
}
