//! `POST /queue`: queue a batch of emails for delivery.

use std::{io::Read, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, header},
    routing::post,
};
use flate2::read::GzDecoder;
use missive_common::{Email, ErrorSink, Signal, handler::report, incoming, internal};
use missive_delivery::{OutboundQueue, QueueError};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::timeout::TimeoutLayer;

use crate::{
    auth::{Authorizer, RequestInfo},
    error::{IngestError, RequestError},
};

/// One entry of a batch that was not queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejected {
    pub index: usize,
    pub reason: String,
}

/// Body of the `201 Created` response.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub accepted: usize,
    pub rejected: Vec<Rejected>,
}

/// Everything a request handler needs.
pub struct Ingest {
    pub queue: OutboundQueue,
    pub authorizer: Arc<dyn Authorizer>,
    pub sink: Arc<dyn ErrorSink>,
    /// Largest body accepted, before and after decompression.
    pub max_bytes: usize,
}

pub fn router(ingest: Arc<Ingest>, timeout: Duration) -> Router {
    Router::new()
        .route("/queue", post(enqueue))
        .with_state(ingest)
        .layer(TimeoutLayer::new(timeout))
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn inflate(body: &[u8], max_bytes: usize) -> Result<Vec<u8>, RequestError> {
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut inflated = Vec::new();

    GzDecoder::new(body)
        .take(limit)
        .read_to_end(&mut inflated)
        .map_err(|_| RequestError::BadEncoding)?;

    if inflated.len() > max_bytes {
        return Err(RequestError::PayloadTooLarge);
    }

    Ok(inflated)
}

/// Header checks, authorization, then the (possibly compressed) body.
async fn read_body(
    ingest: &Ingest,
    request: &RequestInfo,
    body: Body,
) -> Result<Bytes, RequestError> {
    let headers = &request.headers;

    if header_str(headers, header::CONTENT_TYPE) != Some("application/json") {
        return Err(RequestError::UnsupportedMediaType);
    }

    if header_str(headers, header::CONTENT_LENGTH)
        .and_then(|length| length.parse::<usize>().ok())
        .is_some_and(|length| length > ingest.max_bytes)
    {
        return Err(RequestError::PayloadTooLarge);
    }

    if !ingest.authorizer.authorize(request) {
        incoming!(level = INFO, "Refused queue request from {}", request.peer);
        return Err(RequestError::Unauthorized);
    }

    let gzip = match header_str(headers, header::CONTENT_ENCODING).unwrap_or_default() {
        "" => false,
        encoding if encoding.eq_ignore_ascii_case("gzip") => true,
        _ => return Err(RequestError::UnsupportedMediaType),
    };

    // Reading only fails on the length limit or a client that went away.
    let body = axum::body::to_bytes(body, ingest.max_bytes)
        .await
        .map_err(|_| RequestError::PayloadTooLarge)?;

    if gzip {
        inflate(&body, ingest.max_bytes).map(Bytes::from)
    } else {
        Ok(body)
    }
}

async fn enqueue(
    State(ingest): State<Arc<Ingest>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<Summary>), RequestError> {
    let body = read_body(&ingest, &RequestInfo { peer, headers }, body).await?;

    let emails: Vec<Email> = serde_json::from_slice(&body).map_err(|err| {
        report(ingest.sink.as_ref(), &anyhow::Error::new(err).context("Invalid Form Body"));
        RequestError::InvalidBody
    })?;

    incoming!(level = DEBUG, "Received {} emails from {peer}", emails.len());

    let mut summary = Summary::default();
    for (index, email) in emails.into_iter().enumerate() {
        if let Err(err) = email.validate() {
            report(
                ingest.sink.as_ref(),
                &anyhow::anyhow!("Validation Failed for Email at Index {index}: {err}"),
            );
            summary.rejected.push(Rejected {
                index,
                reason: err.to_string(),
            });
            continue;
        }

        if let Err(err) = ingest.queue.try_enqueue(email) {
            let refused = match err {
                QueueError::Full => anyhow::anyhow!("Email queue is full at index: {index}"),
                QueueError::Closed => {
                    anyhow::anyhow!("Email queue is closed, refused index: {index}")
                }
            };
            report(ingest.sink.as_ref(), &refused);
            summary.rejected.push(Rejected {
                index,
                reason: err.to_string(),
            });
            continue;
        }

        summary.accepted += 1;
    }

    Ok((StatusCode::CREATED, Json(summary)))
}

/// The HTTP ingestion endpoint, bound and ready to serve.
pub struct IngestServer {
    listener: TcpListener,
    router: Router,
}

impl IngestServer {
    pub async fn bind(
        address: SocketAddr,
        ingest: Arc<Ingest>,
        timeout: Duration,
    ) -> Result<Self, IngestError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| IngestError::Bind {
                address: address.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            router: router(ingest, timeout),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` fires, then lets in-flight requests finish.
    pub async fn serve(
        self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), IngestError> {
        let address = self.local_addr().map_err(|err| IngestError::Server(err.to_string()))?;
        internal!(level = INFO, "Serving HTTP ingestion on {address}");

        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            internal!(level = INFO, "HTTP ingestion on {address} received shutdown signal");
        })
        .await
        .map_err(|err| IngestError::Server(err.to_string()))?;

        internal!(level = INFO, "HTTP ingestion on {address} stopped");
        Ok(())
    }
}
