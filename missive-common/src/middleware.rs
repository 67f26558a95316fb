//! Middleware stages run over a message before it is delivered or routed.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::Email;

/// What a stage decided about the message it was shown.
#[derive(Debug)]
pub enum Verdict {
    /// Hand the message to the next stage.
    Proceed,
    /// Stop processing. `None` drops the message silently, without a cause.
    Cancel(Option<anyhow::Error>),
}

impl Verdict {
    pub const fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// A stage in an inbound or outbound middleware chain.
///
/// Stages run synchronously, in registration order, on the task that owns
/// the message, and may rewrite it in place.
pub trait Middleware: Send + Sync {
    fn invoke(&self, email: &mut Email) -> Verdict;
}

impl<F> Middleware for F
where
    F: Fn(&mut Email) -> Verdict + Send + Sync,
{
    fn invoke(&self, email: &mut Email) -> Verdict {
        self(email)
    }
}

/// Append-only list of stages.
#[derive(Default)]
pub struct MiddlewareChain {
    stages: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stage: Arc<dyn Middleware>) {
        self.stages.write().push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.read().is_empty()
    }

    /// Runs every stage in order, stopping at the first cancellation.
    pub fn run(&self, email: &mut Email) -> Verdict {
        let stages = self.stages.read().clone();

        for stage in stages {
            if let Verdict::Cancel(cause) = stage.invoke(email) {
                return Verdict::Cancel(cause);
            }
        }

        Verdict::Proceed
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("stages", &self.len())
            .finish()
    }
}
