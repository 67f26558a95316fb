#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::{sync::Arc, time::Duration};

use missive::{Engine, EngineConfig, config::find_config_file};
use missive_common::{Email, MailboxHandler, incoming, internal, logging};
use tokio::signal::unix::{SignalKind, signal};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(60);

async fn wait_for_signal() -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config_path = find_config_file()?;
    let config = EngineConfig::from_file(&config_path)?;
    internal!(level = INFO, "Loaded configuration from {}", config_path.display());

    let fallback: Arc<dyn MailboxHandler> = Arc::new(|email: &Email| {
        incoming!(
            level = INFO,
            "Dropping email '{}' from {} with no matching mailbox",
            email.subject,
            email.from.address
        );
        Ok::<_, anyhow::Error>(())
    });

    let engine = Engine::builder(config).with_fallback(fallback).build()?;
    engine.start().await?;

    let signalled = wait_for_signal().await;

    if tokio::time::timeout(SHUTDOWN_DEADLINE, engine.shutdown())
        .await
        .is_err()
    {
        internal!(
            level = ERROR,
            "Shutdown did not finish within {}s, exiting anyway",
            SHUTDOWN_DEADLINE.as_secs()
        );
    }

    signalled
}
