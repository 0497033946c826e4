use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

pub(crate) mod dispatcher;
pub(crate) mod elector;

/// What the runner does when the coordination store cannot be reached at
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPolicy {
    /// Refuse to start. Without a reachable store there is no mutual
    /// exclusion, so the safe answer is no election at all.
    RequireStore,
    /// Claim leadership unconditionally and skip the election loop. Only
    /// sound when a single instance runs, which is exactly the situation
    /// where no coordination backend exists.
    AssumeLeadershipWithoutStore,
}

/// Phases of the elector's state machine. `Acquiring` covers the window of
/// an attempt while not holding the lease; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Standby,
    Acquiring,
    Leading,
    Stopped,
}

/// Process-wide leadership indicator.
///
/// Clones share one atomic cell. Written only at the elector's transition
/// points; reads are a single atomic load and never block the election
/// loop.
#[derive(Clone, Debug, Default)]
pub struct LeadershipFlag {
    is_leader: Arc<AtomicBool>,
}

impl LeadershipFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, value: bool) {
        self.is_leader.store(value, Ordering::SeqCst);
    }
}

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("invalid election config: {0}")]
    InvalidConfig(String),

    #[error("coordination store unreachable at startup: {0}")]
    StoreUnavailable(StoreError),

    #[error("the election was already started")]
    AlreadyStarted,
}

/// Everything the election needs to know about this instance and its
/// timing. `lease_duration`, `renew_deadline` and `retry_period` mirror the
/// classic lease-election trio; `store_timeout` bounds every individual
/// store call so a hung backend cannot stall the tick loop.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Shared by all cooperating instances; part of the resource key.
    pub service_name: String,
    /// Namespace the resource key lives in, shared by all instances.
    pub namespace: String,
    /// Unique per instance.
    pub identity: String,
    /// How long a holder's claim stays valid without renewal.
    pub lease_duration: Duration,
    /// How long a leader keeps retrying failed renewals before it stops
    /// considering itself leader. Strictly less than `lease_duration`.
    pub renew_deadline: Duration,
    /// Pause between acquire/renew attempts.
    pub retry_period: Duration,
    /// Upper bound on any single store call. Strictly less than
    /// `retry_period`.
    pub store_timeout: Duration,
    /// Write an empty-holder record on graceful shutdown so standbys can
    /// take over without waiting for expiry.
    pub release_on_shutdown: bool,
    pub startup_policy: StartupPolicy,
}

impl ElectionConfig {
    /// Builds a config with a generated UUID identity and defaults for the
    /// remaining knobs.
    pub fn new(
        service_name: impl Into<String>,
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_period: Duration,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            namespace: "default".to_string(),
            identity: Uuid::new_v4().to_string(),
            lease_duration,
            renew_deadline,
            retry_period,
            store_timeout: retry_period / 2,
            release_on_shutdown: true,
            startup_policy: StartupPolicy::RequireStore,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn with_release_on_shutdown(mut self, release_on_shutdown: bool) -> Self {
        self.release_on_shutdown = release_on_shutdown;
        self
    }

    pub fn with_startup_policy(mut self, startup_policy: StartupPolicy) -> Self {
        self.startup_policy = startup_policy;
        self
    }

    /// The name of the record all instances compete over.
    pub fn lock_key(&self) -> String {
        format!("{}/{}-lock", self.namespace, self.service_name)
    }

    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.service_name.is_empty() {
            return Err(ElectionError::InvalidConfig(
                "service name must not be empty".to_string(),
            ));
        }
        if self.identity.is_empty() {
            return Err(ElectionError::InvalidConfig(
                "identity must not be empty".to_string(),
            ));
        }
        if self.lease_duration.is_zero()
            || self.renew_deadline.is_zero()
            || self.retry_period.is_zero()
            || self.store_timeout.is_zero()
        {
            return Err(ElectionError::InvalidConfig(
                "all durations must be positive".to_string(),
            ));
        }
        if self.renew_deadline >= self.lease_duration {
            return Err(ElectionError::InvalidConfig(
                "renew deadline must be shorter than the lease duration".to_string(),
            ));
        }
        if self.store_timeout >= self.retry_period {
            return Err(ElectionError::InvalidConfig(
                "store timeout must be shorter than the retry period".to_string(),
            ));
        }
        Ok(())
    }
}
