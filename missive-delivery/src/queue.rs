//! Bounded in-memory queue of outbound mail and the workers draining it.

use std::{future::Future, sync::Arc};

use async_channel::{Receiver, Sender, TrySendError};
use missive_common::{Email, ErrorSink, handler::report, internal};
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};

use crate::{DeliveryError, OutboundPipeline, error::QueueError};

pub const DEFAULT_CAPACITY: usize = 1024;

/// Multi-producer, multi-consumer buffer of emails waiting for a worker.
///
/// Producers never wait: a full or closed queue refuses the email and the
/// caller decides what to do with it.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    sender: Sender<Email>,
    receiver: Receiver<Email>,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        Self { sender, receiver }
    }

    pub fn try_enqueue(&self, email: Email) -> Result<(), QueueError> {
        self.sender.try_send(email).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Queues `email` for delivery, returning `false` when it was refused.
    pub fn enqueue(&self, email: Email) -> bool {
        match self.try_enqueue(email) {
            Ok(()) => true,
            Err(err) => {
                internal!(level = WARN, "Unable to queue outbound email: {err}");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or(DEFAULT_CAPACITY)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Stops accepting new emails. Emails already queued are still handed
    /// out until the queue is empty.
    ///
    /// Returns `true` if this call closed the queue.
    pub fn close(&self) -> bool {
        self.sender.close()
    }

    /// Drops every email still waiting, returning how many there were.
    pub fn discard(&self) -> usize {
        std::iter::from_fn(|| self.receiver.try_recv().ok()).count()
    }
}

/// Decrements the live worker count when a worker exits, however it exits.
struct Active(Arc<watch::Sender<usize>>);

impl Active {
    fn enter(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|active| *active += 1);
        Self(Arc::clone(counter))
    }
}

impl Drop for Active {
    fn drop(&mut self) {
        self.0.send_modify(|active| *active = active.saturating_sub(1));
    }
}

/// A fixed set of tasks delivering whatever the queue hands them.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Mutex<Vec<JoinHandle<()>>>,
    active: Arc<watch::Sender<usize>>,
}

impl WorkerPool {
    /// Spawns `workers` tasks on the current runtime. Each one runs until
    /// `queue` is closed and empty.
    pub fn spawn(
        workers: usize,
        queue: &OutboundQueue,
        pipeline: Arc<OutboundPipeline>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        let active = Arc::new(watch::Sender::new(0));

        let handles = (0..workers.max(1))
            .map(|id| {
                let receiver = queue.receiver.clone();
                let pipeline = Arc::clone(&pipeline);
                let sink = Arc::clone(&sink);
                let active = Active::enter(&active);

                tokio::spawn(async move {
                    let _active = active;
                    internal!(level = DEBUG, "Outbound worker {id} started");

                    while let Ok(email) = receiver.recv().await {
                        match pipeline.deliver(email).await {
                            Ok(()) => {}
                            Err(DeliveryError::Cancelled(None)) => {
                                internal!(level = DEBUG, "Outbound email dropped by middleware");
                            }
                            Err(err) => report(sink.as_ref(), &anyhow::Error::new(err)),
                        }
                    }

                    internal!(level = DEBUG, "Outbound worker {id} finished");
                })
            })
            .collect();

        Self {
            handles: Mutex::new(handles),
            active,
        }
    }

    /// Workers that have not exited yet.
    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolves once no worker is left running. Holds no borrow of the pool,
    /// and may be polled by any number of callers or dropped early.
    pub fn idle(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut active = self.active.subscribe();
        async move {
            // The pool owns the sender, so this only errs once it is gone.
            let _ = active.wait_for(|active| *active == 0).await;
        }
    }

    /// Waits for every worker to exit. Close the queue first, or this waits
    /// forever.
    ///
    /// A worker that panicked is logged by whichever call collects it; every
    /// call returns only once the pool is idle.
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());

        for handle in handles {
            if let Err(err) = handle.await {
                internal!(level = ERROR, "Outbound worker did not exit cleanly: {err}");
            }
        }

        self.idle().await;
    }
}
