use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use super::LeadershipFlag;
use crate::interface::handler::{ElectionHandler, LeaderContext};

/// Fires the three transition notifications on behalf of the elector.
///
/// `start_leading` gets its own task and a [`LeaderContext`] that is
/// cancelled the moment leadership is lost; the other two callbacks run in
/// short-lived tasks the dispatcher awaits, so a panicking handler never
/// unwinds into the election loop. The dispatcher also owns the transition
/// writes to the shared [`LeadershipFlag`].
pub(crate) struct CallbackDispatcher {
    handler: Arc<dyn ElectionHandler>,
    flag: LeadershipFlag,
    leader_cancel: Option<watch::Sender<bool>>,
    leader_task: Option<JoinHandle<()>>,
}

impl CallbackDispatcher {
    pub(crate) fn new(handler: Arc<dyn ElectionHandler>, flag: LeadershipFlag) -> Self {
        Self {
            handler,
            flag,
            leader_cancel: None,
            leader_task: None,
        }
    }

    /// Marks this instance leader and launches the integrator's leader work.
    pub(crate) fn start_leading(&mut self) {
        let (cancel, cancelled) = watch::channel(false);
        let ctx = LeaderContext::new(cancelled);
        let handler = self.handler.clone();

        self.flag.set(true);
        self.leader_cancel = Some(cancel);
        self.leader_task = Some(tokio::spawn(async move {
            handler.start_leading(ctx).await;
        }));
    }

    /// Clears the flag, cancels the leader context, then reports the loss.
    ///
    /// The leader task is left to observe its cancelled context and wind
    /// down on its own; only the cheap loss notification is awaited here.
    pub(crate) async fn stop_leading(&mut self) {
        self.flag.set(false);
        if let Some(cancel) = self.leader_cancel.take() {
            let _ = cancel.send(true);
        }
        self.leader_task.take();

        let handler = self.handler.clone();
        let notification = tokio::spawn(async move {
            handler.stop_leading().await;
        });
        if notification.await.is_err() {
            warn!("stop-leading callback panicked");
        }
    }

    pub(crate) async fn elected_leader(&self, identity: String) {
        let handler = self.handler.clone();
        let notification = tokio::spawn(async move {
            handler.elected_leader(identity).await;
        });
        if notification.await.is_err() {
            warn!("elected-leader callback panicked");
        }
    }
}
