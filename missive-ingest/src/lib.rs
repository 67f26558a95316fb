//! HTTP ingestion endpoint for the missive mail engine
//!
//! A single route, `POST /queue`, takes a JSON array of emails and hands each
//! valid entry to the outbound queue. Bodies may be gzip compressed.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use missive_common::TracingErrorSink;
//! use missive_delivery::OutboundQueue;
//! use missive_ingest::{Ingest, IngestServer, LoopbackAuthorizer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ingest = Arc::new(Ingest {
//!     queue: OutboundQueue::new(1024),
//!     authorizer: Arc::new(LoopbackAuthorizer),
//!     sink: Arc::new(TracingErrorSink),
//!     max_bytes: 10 << 20,
//! });
//!
//! let server = IngestServer::bind("127.0.0.1:8080".parse()?, ingest, Duration::from_secs(30)).await?;
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod error;
mod server;

pub use auth::{Authorizer, LoopbackAuthorizer, RequestInfo};
pub use error::{IngestError, RequestError};
pub use server::{Ingest, IngestServer, Rejected, Summary, router};
