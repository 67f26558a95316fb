//! A mail engine.
//!
//! Outbound mail is queued, either directly or through the HTTP ingestion
//! endpoint, and delivered by a pool of workers to each recipient's mail
//! exchangers, DKIM signed when a key is configured. Inbound mail arrives
//! over SMTP, is checked, and is routed to the handlers of registered
//! mailboxes.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use missive::{Engine, EngineConfig};
//! use missive_common::Email;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = Engine::builder(EngineConfig::from_file("missive.config.ron")?).build()?;
//!
//! engine.register_mailbox(
//!     "support",
//!     Arc::new(|email: &Email| {
//!         println!("{}", email.subject);
//!         Ok::<_, anyhow::Error>(())
//!     }),
//! )?;
//!
//! let bound = engine.start().await?;
//! println!("SMTP on {:?}", bound.smtp);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;

pub use config::EngineConfig;
pub use engine::{Bound, Engine, EngineBuilder, State};
pub use error::EngineError;
