use std::{io, net::SocketAddr, sync::Arc};

use futures_util::future::join_all;
use missive_common::{Signal, internal, tracing};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};

use crate::{MessageHandler, SmtpConfig, session::Session};

/// Accepts SMTP connections and runs a session for each of them.
pub struct Listener {
    listener: TcpListener,
    config: Arc<SmtpConfig>,
    handler: Arc<dyn MessageHandler>,
}

impl Listener {
    /// Binds `socket`. Port `0` picks a free port, see [`Self::local_addr`].
    pub async fn bind(
        socket: SocketAddr,
        config: SmtpConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(socket).await?,
            config: Arc::new(config),
            handler,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` fires, then waits for every
    /// session to finish. Idle sessions see the same signal and close with a
    /// `421`; sessions in the middle of a message finish it first.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        let address = self.local_addr()?;
        internal!(level = INFO, "Serving SMTP on {address} with {:?}", self.config);

        let mut sessions: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    internal!(
                        level = INFO,
                        "SMTP Listener {address} received shutdown signal, finishing sessions ..."
                    );
                    break;
                }

                connection = self.listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(connection) => connection,
                        Err(err) => {
                            internal!(level = WARN, "Failed to accept connection: {err}");
                            continue;
                        }
                    };
                    tracing::debug!("Connection received on {address} from {peer}");

                    sessions.retain(|session| !session.is_finished());

                    let session = Session::new(
                        stream,
                        peer,
                        Arc::clone(&self.config),
                        Arc::clone(&self.handler),
                    );
                    let signal = shutdown.resubscribe();

                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = session.run(signal).await {
                            internal!(level = ERROR, "Session with {peer} failed: {err}");
                        }
                    }));
                }
            }
        }

        drop(self.listener);
        join_all(sessions).await;
        internal!(level = INFO, "SMTP Listener {address} stopped");

        Ok(())
    }
}
