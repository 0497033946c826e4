//! Lease-based leader election over a shared coordination record.
//!
//! Among N cooperating instances at most one is recognized as leader at a
//! time. The only source of truth is a single record in a strongly
//! consistent store with conditional-update semantics; instances never talk
//! to each other. A leader keeps its claim alive by renewing the record;
//! standbys watch it and take over once the lease expires (or the leader
//! releases it on shutdown).
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use lease_election::{
//!     ElectionConfig, ElectionHandler, ElectionRunner, InMemoryRecordStore, LeaderContext,
//! };
//!
//! struct Handler;
//!
//! #[async_trait]
//! impl ElectionHandler for Handler {
//!     async fn start_leading(&self, ctx: LeaderContext) {
//!         // Leader-only work goes here; wind down once `ctx` cancels.
//!         ctx.cancelled().await;
//!     }
//!
//!     async fn stop_leading(&self) {}
//!
//!     async fn elected_leader(&self, identity: String) {
//!         println!("leader is {}", identity);
//!     }
//! }
//!
//! let config = ElectionConfig::new(
//!     "microservice",
//!     Duration::from_secs(15),
//!     Duration::from_secs(10),
//!     Duration::from_secs(2),
//! );
//! let store = Arc::new(InMemoryRecordStore::new());
//! let runner = ElectionRunner::new(config, store, Arc::new(Handler))?;
//! runner.start().await?;
//!
//! // Workers poll the shared flag; it never blocks.
//! let leadership = runner.leadership();
//! loop {
//!     if leadership.is_leader() {
//!         // do leader things
//!     }
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//! }
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::warn;

use election::elector::LeaderElector;
use util::runnable::PeriodicRunnable;

pub mod election;
pub mod interface;
pub mod store;
mod util;

pub use election::{ElectionConfig, ElectionError, LeaderState, LeadershipFlag, StartupPolicy};
pub use interface::handler::{ElectionHandler, LeaderContext};
pub use store::{
    DynamoRecordStore, InMemoryRecordStore, LeadershipRecord, RecordStore, RecordVersion,
    StoreError, VersionedRecord,
};

/// Wires configuration, store and handler together and runs the elector as
/// a cancellable background task.
///
/// The runner validates the config up front (fatal on error), probes the
/// store once at startup and applies the configured [`StartupPolicy`] when
/// it is unreachable. It never restarts the elector on internal errors;
/// transient store trouble is handled inside the tick loop itself.
pub struct ElectionRunner {
    config: ElectionConfig,
    store: Arc<dyn RecordStore>,
    elector: Arc<LeaderElector>,
    flag: LeadershipFlag,
    started: AtomicBool,
    loop_running: AtomicBool,
}

impl ElectionRunner {
    pub fn new(
        config: ElectionConfig,
        store: Arc<dyn RecordStore>,
        handler: Arc<dyn ElectionHandler>,
    ) -> Result<Self, ElectionError> {
        config.validate()?;
        let elector = Arc::new(LeaderElector::new(config.clone(), store.clone(), handler));
        let flag = elector.leadership();
        Ok(Self {
            config,
            store,
            elector,
            flag,
            started: AtomicBool::new(false),
            loop_running: AtomicBool::new(false),
        })
    }

    /// Non-blocking leadership check for workers.
    pub fn is_leader(&self) -> bool {
        self.flag.is_leader()
    }

    /// A cloneable handle workers can poll without going through the runner.
    pub fn leadership(&self) -> LeadershipFlag {
        self.flag.clone()
    }

    pub async fn state(&self) -> LeaderState {
        self.elector.phase().await
    }

    /// Probes the store, then spawns the election loop.
    ///
    /// With an unreachable store the outcome depends on the configured
    /// [`StartupPolicy`]: refuse to start, or claim single-instance
    /// leadership without a loop.
    pub async fn start(&self) -> Result<(), ElectionError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ElectionError::AlreadyStarted);
        }

        if let Err(err) = self.probe_store().await {
            match self.config.startup_policy {
                StartupPolicy::RequireStore => {
                    self.started.store(false, Ordering::SeqCst);
                    return Err(ElectionError::StoreUnavailable(err));
                }
                StartupPolicy::AssumeLeadershipWithoutStore => {
                    warn!(
                        error = %err,
                        "coordination store unreachable; claiming single-instance leadership"
                    );
                    self.elector.assume_leadership().await;
                    return Ok(());
                }
            }
        }

        let elector = self.elector.clone();
        self.loop_running.store(true, Ordering::SeqCst);
        tokio::spawn(async move { elector.run().await });
        Ok(())
    }

    /// Cancels the election. If currently leading this releases the record
    /// (when configured) and fires `stop_leading` before returning.
    pub async fn shutdown(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        if self.loop_running.swap(false, Ordering::SeqCst) {
            self.elector.shutdown().await;
        } else {
            self.elector.halt_standalone().await;
        }
    }

    async fn probe_store(&self) -> Result<(), StoreError> {
        let key = self.config.lock_key();
        match tokio::time::timeout(self.config.store_timeout, self.store.get(&key)).await {
            Ok(Ok(_)) | Ok(Err(StoreError::NotFound(_))) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(StoreError::Timeout(self.config.store_timeout)),
        }
    }
}
