use async_trait::async_trait;
use tokio::sync::watch;

/// Cancellation-aware handle given to [`ElectionHandler::start_leading`].
///
/// The context is cancelled the instant this instance stops considering
/// itself leader, so long-running leader-only work can observe the loss and
/// wind down.
#[derive(Clone, Debug)]
pub struct LeaderContext {
    cancelled: watch::Receiver<bool>,
}

impl LeaderContext {
    pub(crate) fn new(cancelled: watch::Receiver<bool>) -> Self {
        Self { cancelled }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once leadership has been lost. Also resolves if the elector
    /// has been torn down entirely.
    pub async fn cancelled(&self) {
        let mut cancelled = self.cancelled.clone();
        if *cancelled.borrow() {
            return;
        }
        while cancelled.changed().await.is_ok() {
            if *cancelled.borrow() {
                return;
            }
        }
    }
}

/// The three leadership-transition notifications an integrator receives.
///
/// `start_leading` runs on its own task and may block for the lifetime of
/// the leadership; watch `ctx` to stop. `stop_leading` is the loss signal
/// and must return quickly. `elected_leader` reports every observed change
/// of the record's holder, including to and from this instance's own
/// identity.
#[async_trait]
pub trait ElectionHandler: Send + Sync {
    async fn start_leading(&self, ctx: LeaderContext);
    async fn stop_leading(&self);
    async fn elected_leader(&self, identity: String);
}
