//! Coalescing delayed-dispatch scheduler
//!
//! Every `touch` records the current time for a key. A background sweep
//! fires the key's most recent callback once the key has been quiet for
//! longer than the configured delay. A burst of touches therefore collapses
//! into a single firing; there is no ceiling on how long a key that keeps
//! being touched can be postponed.
//!
//! Per-key states: absent → pending → (refreshed) → running → absent. A key
//! may become pending again while its previous callback is still running,
//! but it is not fired again until that callback has completed.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deferred work registered by `touch`
pub type Callback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;

/// Scheduler timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Quiet period a key must exceed before it fires
    pub delay: Duration,
    /// Time between sweeps of the pending table
    pub interval: Duration,
}

impl ExecutorConfig {
    pub fn new(delay: Duration, interval: Duration) -> Self {
        Self { delay, interval }
    }
}

impl From<&mls_common::config::SchedulerConfig> for ExecutorConfig {
    fn from(config: &mls_common::config::SchedulerConfig) -> Self {
        Self::new(config.delay(), config.interval())
    }
}

struct PendingEntry {
    last_touch: Instant,
    callback: Callback,
}

struct Table<K> {
    pending: HashMap<K, PendingEntry>,
    running: HashSet<K>,
}

/// Coalescing scheduler keyed by `K`
///
/// All table access goes through one mutex that is never held across an
/// await point or a callback.
pub struct DelayedExecutor<K> {
    config: ExecutorConfig,
    table: Arc<Mutex<Table<K>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    fired: AtomicU64,
}

impl<K> DelayedExecutor<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            table: Arc::new(Mutex::new(Table {
                pending: HashMap::new(),
                running: HashSet::new(),
            })),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            fired: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> ExecutorConfig {
        self.config
    }

    /// Spawn the background sweep task
    ///
    /// Only the first call starts a sweep; later calls log a warning and
    /// return `None`.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("DelayedExecutor already started, ignoring second start");
            return None;
        }

        info!(
            "Starting DelayedExecutor (delay: {:.1}s, interval: {:.1}s)",
            self.config.delay.as_secs_f64(),
            self.config.interval.as_secs_f64()
        );

        let executor = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut timer = interval(executor.config.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = executor.shutdown.cancelled() => break,
                    _ = timer.tick() => {
                        executor.sweep();
                    }
                }
            }

            let abandoned = executor.drain_pending();
            if abandoned.is_empty() {
                info!("DelayedExecutor stopped");
            } else {
                let keys: Vec<String> = abandoned.iter().map(ToString::to_string).collect();
                warn!(
                    count = keys.len(),
                    "DelayedExecutor stopped with unfired keys: {}",
                    keys.join(", ")
                );
            }
        }))
    }

    /// Record or refresh `key` with the current time and `callback`
    ///
    /// Replaces any callback still pending for `key`. Never waits on
    /// downstream work.
    pub fn touch<F, Fut>(&self, key: K, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: Callback = Box::new(move || callback().boxed());
        let entry = PendingEntry {
            last_touch: Instant::now(),
            callback,
        };

        let refreshed = self.lock_table().pending.insert(key.clone(), entry).is_some();
        debug!(key = %key, refreshed, "Touched pending key");
    }

    /// Scan the table once and fire every key quiet for longer than the delay
    ///
    /// Due entries are removed under the lock; their callbacks are spawned
    /// after it is released. Returns the number of callbacks fired.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();

        let due: Vec<(K, Callback)> = {
            let mut table = self.lock_table();
            let Table { pending, running } = &mut *table;

            let due_keys: Vec<K> = pending
                .iter()
                .filter(|(key, entry)| {
                    let idle = now.saturating_duration_since(entry.last_touch);
                    debug!(
                        key = %key,
                        "{} has not been observed in {:.1} seconds",
                        key,
                        idle.as_secs_f64()
                    );
                    if idle <= self.config.delay {
                        return false;
                    }
                    if running.contains(*key) {
                        debug!(key = %key, "Previous run still in progress, deferring");
                        return false;
                    }
                    true
                })
                .map(|(key, _)| key.clone())
                .collect();

            due_keys
                .into_iter()
                .filter_map(|key| {
                    let entry = pending.remove(&key)?;
                    running.insert(key.clone());
                    Some((key, entry.callback))
                })
                .collect()
        };

        let count = due.len();
        for (key, callback) in due {
            info!(key = %key, "Quiet period elapsed, dispatching");
            self.fired.fetch_add(1, Ordering::Relaxed);

            let guard = RunningGuard {
                table: Arc::clone(&self.table),
                key,
            };
            tokio::spawn(async move {
                let _guard = guard;
                callback().await;
            });
        }

        count
    }

    /// Stop the sweep task; keys still pending are dropped unfired
    ///
    /// Callbacks already running are not interrupted.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Pending keys with their current idle time
    pub fn pending_keys(&self) -> Vec<(K, Duration)> {
        let now = Instant::now();
        self.lock_table()
            .pending
            .iter()
            .map(|(key, entry)| (key.clone(), now.saturating_duration_since(entry.last_touch)))
            .collect()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.lock_table().pending.contains_key(key)
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.lock_table().running.contains(key)
    }

    pub fn pending_len(&self) -> usize {
        self.lock_table().pending.len()
    }

    /// Total callbacks dispatched since creation
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    fn drain_pending(&self) -> Vec<K> {
        self.lock_table().pending.drain().map(|(key, _)| key).collect()
    }

    fn lock_table(&self) -> MutexGuard<'_, Table<K>> {
        lock(&self.table)
    }
}

fn lock<K>(table: &Mutex<Table<K>>) -> MutexGuard<'_, Table<K>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the running marker when a fired callback finishes or panics
struct RunningGuard<K: Eq + Hash> {
    table: Arc<Mutex<Table<K>>>,
    key: K,
}

impl<K: Eq + Hash> Drop for RunningGuard<K> {
    fn drop(&mut self) {
        lock(&self.table).running.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn executor(delay_ms: u64, interval_ms: u64) -> Arc<DelayedExecutor<String>> {
        Arc::new(DelayedExecutor::new(ExecutorConfig::new(
            Duration::from_millis(delay_ms),
            Duration::from_millis(interval_ms),
        )))
    }

    fn counting(
        counter: &Arc<AtomicUsize>,
    ) -> impl (FnOnce() -> futures::future::Ready<()>) + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_touches_fires_once_with_latest_callback() {
        let executor = executor(2000, 500);
        executor.start();

        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = Arc::clone(&log);
            executor.touch("A".to_string(), move || async move {
                log.lock().unwrap().push(i);
            });
            sleep(Duration::from_millis(300)).await;
        }

        sleep(Duration::from_secs(5)).await;

        assert_eq!(*log.lock().unwrap(), vec![4]);
        assert_eq!(executor.fired_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_key_fires_once_and_leaves_table() {
        let executor = executor(1000, 250);
        executor.start();
        let counter = Arc::new(AtomicUsize::new(0));

        executor.touch("k".to_string(), counting(&counter));
        assert!(executor.is_pending(&"k".to_string()));

        sleep(Duration::from_millis(1600)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!executor.is_pending(&"k".to_string()));
        assert_eq!(executor.pending_len(), 0);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_postpones_firing_by_full_delay() {
        // delay 2s, interval 0.5s; touches at t=0 and t=1
        let executor = executor(2000, 500);
        executor.start();
        let counter = Arc::new(AtomicUsize::new(0));

        executor.touch("A".to_string(), counting(&counter));
        sleep(Duration::from_millis(1000)).await;
        executor.touch("A".to_string(), counting(&counter));

        sleep(Duration::from_millis(1900)).await; // t = 2.9
        assert_eq!(counter.load(Ordering::SeqCst), 0, "fired before t=3");

        sleep(Duration::from_millis(700)).await; // t = 3.6
        assert_eq!(counter.load(Ordering::SeqCst), 1, "not fired by t=3.5");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_callback_does_not_block_other_keys() {
        let executor = executor(500, 100);
        executor.start();
        let fast = Arc::new(AtomicUsize::new(0));

        executor.touch("slow".to_string(), || async {
            sleep(Duration::from_secs(60)).await;
        });
        sleep(Duration::from_millis(300)).await;
        executor.touch("fast".to_string(), counting(&fast));

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(fast.load(Ordering::SeqCst), 1);
        assert!(executor.is_running(&"slow".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_waits_for_running_callback() {
        let executor = executor(500, 100);
        executor.start();
        let runs = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&runs);
        executor.touch("A".to_string(), move || async move {
            first.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_secs(3)).await;
        });
        sleep(Duration::from_millis(800)).await;
        assert!(executor.is_running(&"A".to_string()));

        executor.touch("A".to_string(), counting(&runs));
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1, "second run overlapped the first");
        assert!(executor.is_pending(&"A".to_string()));

        sleep(Duration::from_secs(3)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!executor.is_pending(&"A".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_releases_running_marker() {
        let executor = executor(200, 100);
        executor.start();

        executor.touch("A".to_string(), || async {
            panic!("callback failure");
        });
        sleep(Duration::from_millis(500)).await;

        assert!(!executor.is_running(&"A".to_string()));
        let counter = Arc::new(AtomicUsize::new(0));
        executor.touch("A".to_string(), counting(&counter));
        sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_sweep_respects_delay() {
        let executor = executor(1000, 1000);
        let counter = Arc::new(AtomicUsize::new(0));

        executor.touch("A".to_string(), counting(&counter));
        assert_eq!(executor.sweep(), 0);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(executor.sweep(), 1);
        assert_eq!(executor.sweep(), 0);

        sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_ignored() {
        let executor = executor(1000, 100);
        assert!(executor.start().is_some());
        assert!(executor.start().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_pending_without_firing() {
        let executor = executor(1000, 100);
        let handle = executor.start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        executor.touch("A".to_string(), counting(&counter));
        executor.shutdown();
        handle.await.unwrap();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(executor.pending_len(), 0);
    }

    #[tokio::test]
    async fn concurrent_touches_from_many_tasks() {
        let executor = executor(50, 10);
        executor.start();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..32 {
            let executor = Arc::clone(&executor);
            let counter = Arc::clone(&counter);
            tasks.spawn(async move {
                executor.touch(format!("key-{}", i % 4), counting(&counter));
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
