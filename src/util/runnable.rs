use std::time::Duration;

use async_trait::async_trait;

/// A task driven on a tick-sleep cadence until told to shut down.
///
/// The loop consults `get_delay` on every iteration, so implementors can
/// vary their pacing (e.g. jitter while contending, steady while holding).
/// Both the tick and the sleep race the shutdown signal, which means an
/// in-flight tick is abandoned rather than awaited when shutdown arrives.
#[async_trait]
pub(crate) trait PeriodicRunnable: Send + Sync {
    fn should_shutdown(&self) -> bool;
    async fn await_shutdown_signal(&self);
    async fn before_shutdown_complete(&self) {}
    fn notify_shutdown_complete(&self);

    /// Executes the logic that will occur on each tick
    async fn run_once(&self);

    fn get_delay(&self) -> Duration;

    async fn run(&self) {
        while !self.should_shutdown() {
            tokio::select! {
                _ = self.await_shutdown_signal() => break,
                _ = self.run_once() => {}
            }

            tokio::select! {
                _ = self.await_shutdown_signal() => break,
                _ = tokio::time::sleep(self.get_delay()) => {}
            }
        }

        self.before_shutdown_complete().await;
        self.notify_shutdown_complete();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::Notify;

    use super::*;

    struct Counter {
        ticks: AtomicUsize,
        should_shutdown: AtomicBool,
        shutdown: Notify,
        shutdown_signal: Notify,
    }

    #[async_trait]
    impl PeriodicRunnable for Counter {
        fn should_shutdown(&self) -> bool {
            self.should_shutdown.load(Ordering::SeqCst)
        }

        async fn await_shutdown_signal(&self) {
            self.shutdown_signal.notified().await;
        }

        fn notify_shutdown_complete(&self) {
            self.shutdown.notify_one();
        }

        async fn run_once(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn get_delay(&self) -> Duration {
            Duration::from_millis(5)
        }
    }

    #[tokio::test]
    async fn loop_ticks_until_shutdown() {
        let counter = Arc::new(Counter {
            ticks: AtomicUsize::new(0),
            should_shutdown: AtomicBool::new(false),
            shutdown: Notify::new(),
            shutdown_signal: Notify::new(),
        });

        let task = counter.clone();
        tokio::spawn(async move { task.run().await });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(counter.ticks.load(Ordering::SeqCst) >= 2);

        counter.should_shutdown.store(true, Ordering::SeqCst);
        counter.shutdown_signal.notify_waiters();
        counter.shutdown.notified().await;

        let ticks_at_shutdown = counter.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), ticks_at_shutdown);
    }
}
