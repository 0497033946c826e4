use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dispatcher::CallbackDispatcher;
use super::{ElectionConfig, LeaderState, LeadershipFlag};
use crate::interface::handler::ElectionHandler;
use crate::store::{LeadershipRecord, RecordStore, StoreError, VersionedRecord};
use crate::util::runnable::PeriodicRunnable;

/// Standby retries are stretched by up to this factor so contending
/// instances don't hammer the store in lockstep.
const RETRY_JITTER_FACTOR: f64 = 1.2;

/// The acquire/renew/release state machine.
///
/// One tick per `retry_period`: read the record, then create, renew or take
/// it over with a version-checked write. All coordination between instances
/// happens through those conditional writes; the elector itself carries no
/// ordering logic. Runs as a [`PeriodicRunnable`] under a spawned task.
pub(crate) struct LeaderElector {
    config: ElectionConfig,
    store: Arc<dyn RecordStore>,
    flag: LeadershipFlag,
    state: Mutex<ElectorState>,

    should_shutdown: AtomicBool,
    shutdown: Notify,
    shutdown_signal: Notify,
}

struct ElectorState {
    phase: LeaderState,
    /// Last record (and version) this instance read or wrote.
    observed: Option<VersionedRecord>,
    /// Holder identity last handed to `elected_leader`; the exactly-once
    /// guard for observation reporting.
    reported_leader: Option<String>,
    /// Instant of the last successful acquire or renew write.
    last_renewal: Option<Instant>,
    dispatcher: CallbackDispatcher,
}

impl LeaderElector {
    pub(crate) fn new(
        config: ElectionConfig,
        store: Arc<dyn RecordStore>,
        handler: Arc<dyn ElectionHandler>,
    ) -> Self {
        let flag = LeadershipFlag::new();
        Self {
            state: Mutex::new(ElectorState {
                phase: LeaderState::Standby,
                observed: None,
                reported_leader: None,
                last_renewal: None,
                dispatcher: CallbackDispatcher::new(handler, flag.clone()),
            }),
            config,
            store,
            flag,
            should_shutdown: AtomicBool::new(false),
            shutdown: Notify::new(),
            shutdown_signal: Notify::new(),
        }
    }

    pub(crate) fn leadership(&self) -> LeadershipFlag {
        self.flag.clone()
    }

    pub(crate) async fn phase(&self) -> LeaderState {
        self.state.lock().await.phase
    }

    /// Requests the loop to stop and waits for it to finish its teardown
    /// (release and `stop_leading` if currently leading).
    pub(crate) async fn shutdown(&self) {
        self.should_shutdown.store(true, Ordering::SeqCst);
        self.shutdown_signal.notify_waiters();
        self.shutdown.notified().await;
    }

    /// Startup-policy fallback: leadership without a store, no loop.
    pub(crate) async fn assume_leadership(&self) {
        let mut state = self.state.lock().await;
        info!(identity = %self.config.identity, "assuming leadership without a coordination store");
        state.phase = LeaderState::Leading;
        state.last_renewal = Some(Instant::now());
        state.dispatcher.start_leading();
        state.reported_leader = Some(self.config.identity.clone());
        state
            .dispatcher
            .elected_leader(self.config.identity.clone())
            .await;
    }

    /// Teardown counterpart of `assume_leadership` for runners that never
    /// spawned the loop.
    pub(crate) async fn halt_standalone(&self) {
        let mut state = self.state.lock().await;
        if state.phase == LeaderState::Leading {
            state.dispatcher.stop_leading().await;
        }
        state.phase = LeaderState::Stopped;
    }

    async fn tick(&self) {
        let mut state = self.state.lock().await;
        if state.phase == LeaderState::Stopped {
            return;
        }
        let was_leading = state.phase == LeaderState::Leading;
        if !was_leading {
            state.phase = LeaderState::Acquiring;
        }

        let renewed = self.try_acquire_or_renew(&mut state).await;

        if renewed {
            state.last_renewal = Some(Instant::now());
            if !was_leading {
                info!(
                    identity = %self.config.identity,
                    key = %self.config.lock_key(),
                    "became leader"
                );
                state.phase = LeaderState::Leading;
                state.dispatcher.start_leading();
            }
        } else if was_leading {
            // A single failed renewal is not loss of leadership; the renew
            // deadline bounds how long we keep believing without a
            // successful write.
            let deadline_passed = state
                .last_renewal
                .map(|at| at.elapsed() >= self.config.renew_deadline)
                .unwrap_or(true);
            if deadline_passed {
                warn!(
                    identity = %self.config.identity,
                    "failed to renew the lease within the renew deadline; stepping down"
                );
                state.phase = LeaderState::Standby;
                state.dispatcher.stop_leading().await;
            }
        } else {
            state.phase = LeaderState::Standby;
        }

        self.report_holder_changes(&mut state).await;
    }

    /// One acquire-or-renew round. Returns whether this instance holds the
    /// lease as of a successful write this round.
    async fn try_acquire_or_renew(&self, state: &mut ElectorState) -> bool {
        let key = self.config.lock_key();
        let now = Utc::now();

        let current = match self.bounded(self.store.get(&key)).await {
            Ok(found) => found,
            Err(StoreError::NotFound(_)) => {
                // Nobody has ever written the record; race to create it.
                let record = self.claim_record(now, 0);
                return match self.bounded(self.store.create(&key, record.clone())).await {
                    Ok(version) => {
                        state.observed = Some(VersionedRecord { record, version });
                        true
                    }
                    Err(StoreError::Conflict(_)) => {
                        debug!(key = %key, "another instance created the record first");
                        false
                    }
                    Err(err) => {
                        warn!(key = %key, error = %err, "failed to create leadership record");
                        false
                    }
                };
            }
            Err(err) => {
                warn!(key = %key, error = %err, "failed to read leadership record");
                return false;
            }
        };

        state.observed = Some(current.clone());

        let renewal = current.record.is_held_by(&self.config.identity);
        if !renewal && current.record.is_held() && !current.record.is_expired(now) {
            // Someone else is validly leading; nothing to contest.
            return false;
        }

        // A renewal keeps the acquisition timestamp and the transition
        // counter; a takeover (of an expired or released record) stamps a
        // fresh acquisition and counts a transition.
        let record = if renewal {
            LeadershipRecord {
                acquire_time: current.record.acquire_time,
                ..self.claim_record(now, current.record.leader_transitions)
            }
        } else {
            self.claim_record(now, current.record.leader_transitions + 1)
        };

        match self
            .bounded(self.store.update(&key, record.clone(), current.version))
            .await
        {
            Ok(version) => {
                state.observed = Some(VersionedRecord { record, version });
                true
            }
            Err(StoreError::Conflict(_)) => {
                debug!(key = %key, "lost the write race for the record");
                false
            }
            Err(err) => {
                warn!(key = %key, error = %err, "failed to write leadership record");
                false
            }
        }
    }

    /// Fires `elected_leader` exactly once per observed holder change.
    async fn report_holder_changes(&self, state: &mut ElectorState) {
        let holder = match state.observed.as_ref() {
            Some(observed) if observed.record.is_held() => observed.record.holder_identity.clone(),
            _ => return,
        };
        if state.reported_leader.as_ref() == Some(&holder) {
            return;
        }
        info!(leader = %holder, "observed new leader");
        state.reported_leader = Some(holder.clone());
        state.dispatcher.elected_leader(holder).await;
    }

    /// Best-effort graceful release: empty holder, fresh renew time, same
    /// transition count. Failures just leave the lease to expire naturally.
    async fn release(&self, state: &mut ElectorState) {
        let current = match state.observed.clone() {
            Some(observed) if observed.record.is_held_by(&self.config.identity) => observed,
            _ => return,
        };
        let key = self.config.lock_key();
        let released = LeadershipRecord {
            holder_identity: String::new(),
            renew_time: Utc::now(),
            ..current.record
        };
        match self.bounded(self.store.update(&key, released, current.version)).await {
            Ok(_) => info!(key = %key, "released the leadership record"),
            Err(err) => debug!(key = %key, error = %err, "best-effort release failed"),
        }
    }

    fn claim_record(&self, now: DateTime<Utc>, leader_transitions: u64) -> LeadershipRecord {
        LeadershipRecord {
            holder_identity: self.config.identity.clone(),
            lease_duration_seconds: self.config.lease_duration.as_secs(),
            acquire_time: now,
            renew_time: now,
            leader_transitions,
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.store_timeout)),
        }
    }
}

#[async_trait]
impl PeriodicRunnable for LeaderElector {
    fn should_shutdown(&self) -> bool {
        self.should_shutdown.load(Ordering::SeqCst)
    }

    async fn await_shutdown_signal(&self) {
        self.shutdown_signal.notified().await;
    }

    async fn before_shutdown_complete(&self) {
        let mut state = self.state.lock().await;
        if state.phase == LeaderState::Leading {
            if self.config.release_on_shutdown {
                self.release(&mut state).await;
            }
            state.dispatcher.stop_leading().await;
        }
        state.phase = LeaderState::Stopped;
    }

    fn notify_shutdown_complete(&self) {
        self.shutdown.notify_one();
    }

    async fn run_once(&self) {
        self.tick().await;
    }

    fn get_delay(&self) -> Duration {
        if self.flag.is_leader() {
            self.config.retry_period
        } else {
            self.config
                .retry_period
                .mul_f64(1.0 + rand::thread_rng().gen::<f64>() * RETRY_JITTER_FACTOR)
        }
    }
}
