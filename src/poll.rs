//! Periodic execution of sync cycles.
//!
//! The [`Scheduler`] runs each registered [`Task`] on its own tokio task,
//! re-running it every [`Schedule::interval`].  Registrations are unique by
//! name: asking for a name that is already pending or running keeps the
//! existing instance and ignores the request.
//!
//! ## For contributors
//!
//! The loop is intentionally simple: wait for connectivity, run the task,
//! back off and re-run on [`TaskResult::Retry`], then sleep until the next
//! period.  Cycles of one task never overlap.  Backoff lives here and nowhere
//! else; tasks themselves never sleep or retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Shortest allowed period between two cycles.
pub const MIN_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Shortest allowed window in which a deferred cycle may still run.
pub const MIN_FLEX: Duration = Duration::from_secs(5 * 60);

/// Delay before the first retry; doubles with every further attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(30);

/// Upper bound for the retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60 * 60);

/// How often connectivity is re-checked while waiting for the network.
pub const RECHECK_DELAY: Duration = Duration::from_secs(30);

/// What a task reports back after one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    Success,
    /// Transient failure; run again after a backoff delay.
    Retry,
    /// Not worth retrying before the next period.
    Failure,
}

/// Unit of periodic work.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    async fn run(&self) -> TaskResult;
}

/// Network constraint checked before every run.
#[async_trait]
pub trait Connectivity: Send + Sync + 'static {
    async fn is_online(&self) -> bool;
}

/// Treats the network as always available.
#[derive(Debug, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl Connectivity for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

/// Considers the network available when a TCP connection to `addr` succeeds.
#[derive(Debug)]
pub struct TcpReachability {
    addr: String,
    timeout: Duration,
}

impl TcpReachability {
    /// `addr` is a `host:port` pair, e.g. the source's host on port 443.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl Connectivity for TcpReachability {
    async fn is_online(&self) -> bool {
        matches!(
            timeout(self.timeout, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }
}

/// When a periodic task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Period between the starts of two consecutive runs.
    pub interval: Duration,
    /// How long a run blocked by an unmet constraint may be deferred before
    /// the period is skipped.
    pub flex: Duration,
}

impl Schedule {
    /// Exact schedule, no clamping.
    #[cfg(test)]
    pub fn new(interval: Duration, flex: Duration) -> Self {
        Self { interval, flex }
    }

    /// User-facing schedule: at least [`MIN_INTERVAL`] with a [`MIN_FLEX`]
    /// window.
    pub fn from_minutes(minutes: u64) -> Self {
        let interval = Duration::from_secs(minutes.saturating_mul(60)).max(MIN_INTERVAL);
        Self {
            interval,
            flex: MIN_FLEX.min(interval),
        }
    }
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    INITIAL_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Result of asking the scheduler to register a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// A live task already held the name; the request was ignored.
    KeptExisting,
}

/// Registry of named periodic tasks.
#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under `name` unless a live task already holds it.
    pub fn enqueue_unique_periodic(
        &self,
        name: &str,
        schedule: Schedule,
        task: Arc<dyn Task>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Registration {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };

        if tasks.get(name).is_some_and(|h| !h.is_finished()) {
            debug!(name, "periodic task already registered, keeping it");
            return Registration::KeptExisting;
        }

        info!(name, interval = ?schedule.interval, "registering periodic task");
        let handle = tokio::spawn(run_periodic(name.to_string(), schedule, task, connectivity));
        tasks.insert(name.to_string(), handle);
        Registration::Registered
    }

    /// Stop the task registered under `name`.  Returns whether one was live.
    pub fn cancel(&self, name: &str) -> bool {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        match tasks.remove(name) {
            Some(handle) => {
                let live = !handle.is_finished();
                handle.abort();
                live
            }
            None => false,
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        match self.tasks.lock() {
            Ok(tasks) => tasks.get(name).is_some_and(|h| !h.is_finished()),
            Err(poisoned) => poisoned.into_inner().get(name).is_some_and(|h| !h.is_finished()),
        }
    }
}

async fn run_periodic(
    name: String,
    schedule: Schedule,
    task: Arc<dyn Task>,
    connectivity: Arc<dyn Connectivity>,
) {
    loop {
        let period_start = Instant::now();

        if wait_for_network(connectivity.as_ref(), schedule.flex).await {
            run_until_settled(&name, task.as_ref()).await;
        } else {
            warn!(name = %name, "network unavailable for the whole flex window, skipping period");
        }

        // Next period is measured from this one's start; a long retry
        // sequence simply delays it.
        let next = period_start + schedule.interval;
        tokio::time::sleep_until(next.max(Instant::now())).await;
    }
}

/// Wait until `connectivity` reports online, for at most `flex`.
async fn wait_for_network(connectivity: &dyn Connectivity, flex: Duration) -> bool {
    let deadline = Instant::now() + flex;
    loop {
        if connectivity.is_online().await {
            return true;
        }
        if Instant::now() + RECHECK_DELAY > deadline {
            return false;
        }
        debug!("waiting for network");
        sleep(RECHECK_DELAY).await;
    }
}

/// Run `task` until it reports something other than [`TaskResult::Retry`].
async fn run_until_settled(name: &str, task: &dyn Task) {
    let mut attempt = 0u32;
    loop {
        match task.run().await {
            TaskResult::Retry => {
                attempt = attempt.saturating_add(1);
                let delay = backoff_delay(attempt);
                info!(name, attempt, delay = ?delay, "task asked for retry");
                sleep(delay).await;
            }
            TaskResult::Success => {
                debug!(name, "task succeeded");
                return;
            }
            TaskResult::Failure => {
                warn!(name, "task failed, waiting for next period");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Replays scripted results, then keeps returning `Success`.
    struct Scripted {
        results: Mutex<VecDeque<TaskResult>>,
        runs: AtomicUsize,
    }

    impl Scripted {
        fn new(results: impl IntoIterator<Item = TaskResult>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into_iter().collect()),
                runs: AtomicUsize::new(0),
            })
        }

        fn succeeding() -> Arc<Self> {
            Self::new(Vec::<TaskResult>::new())
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Task for Scripted {
        async fn run(&self) -> TaskResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TaskResult::Success)
        }
    }

    struct Switch(AtomicBool);

    #[async_trait]
    impl Connectivity for Switch {
        async fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn online() -> Arc<dyn Connectivity> {
        Arc::new(AlwaysOnline)
    }

    fn hourly() -> Schedule {
        Schedule::new(HOUR, MIN_FLEX)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(30));
        assert_eq!(backoff_delay(2), Duration::from_secs(60));
        assert_eq!(backoff_delay(3), Duration::from_secs(120));
        assert_eq!(backoff_delay(20), MAX_BACKOFF);
        assert_eq!(backoff_delay(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn schedule_from_minutes_clamps() {
        assert_eq!(Schedule::from_minutes(1).interval, MIN_INTERVAL);
        assert_eq!(Schedule::from_minutes(15).interval, MIN_INTERVAL);
        assert_eq!(Schedule::from_minutes(60).interval, HOUR);
        assert_eq!(Schedule::from_minutes(60).flex, MIN_FLEX);
    }

    #[tokio::test(start_paused = true)]
    async fn second_registration_keeps_existing() {
        let scheduler = Scheduler::new();
        let first = Scripted::succeeding();
        let second = Scripted::succeeding();

        let a = scheduler.enqueue_unique_periodic("sync", hourly(), first.clone(), online());
        let b = scheduler.enqueue_unique_periodic("sync", hourly(), second.clone(), online());
        sleep(Duration::from_secs(1)).await;

        assert_eq!(a, Registration::Registered);
        assert_eq!(b, Registration::KeptExisting);
        assert_eq!(first.runs(), 1);
        assert_eq!(second.runs(), 0);
        scheduler.cancel("sync");
    }

    #[tokio::test(start_paused = true)]
    async fn runs_once_per_interval() {
        let scheduler = Scheduler::new();
        let task = Scripted::succeeding();
        scheduler.enqueue_unique_periodic("sync", hourly(), task.clone(), online());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(task.runs(), 1);

        sleep(HOUR).await;
        assert_eq!(task.runs(), 2);

        sleep(HOUR).await;
        assert_eq!(task.runs(), 3);
        scheduler.cancel("sync");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_reruns_after_backoff() {
        let scheduler = Scheduler::new();
        let task = Scripted::new([TaskResult::Retry, TaskResult::Retry]);
        scheduler.enqueue_unique_periodic("sync", hourly(), task.clone(), online());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(task.runs(), 1);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(task.runs(), 2);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(task.runs(), 3);

        // Settled; nothing more until the next period.
        sleep(Duration::from_secs(600)).await;
        assert_eq!(task.runs(), 3);
        scheduler.cancel("sync");
    }

    #[tokio::test(start_paused = true)]
    async fn failure_waits_for_next_period() {
        let scheduler = Scheduler::new();
        let task = Scripted::new([TaskResult::Failure]);
        scheduler.enqueue_unique_periodic("sync", hourly(), task.clone(), online());

        sleep(Duration::from_secs(600)).await;
        assert_eq!(task.runs(), 1);

        sleep(HOUR).await;
        assert_eq!(task.runs(), 2);
        scheduler.cancel("sync");
    }

    #[tokio::test(start_paused = true)]
    async fn offline_defers_then_skips_period() {
        let scheduler = Scheduler::new();
        let task = Scripted::succeeding();
        let net = Arc::new(Switch(AtomicBool::new(false)));
        scheduler.enqueue_unique_periodic("sync", hourly(), task.clone(), net.clone());

        sleep(MIN_FLEX + Duration::from_secs(60)).await;
        assert_eq!(task.runs(), 0);

        net.0.store(true, Ordering::SeqCst);
        sleep(HOUR).await;
        assert_eq!(task.runs(), 1);
        scheduler.cancel("sync");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_frees_the_name() {
        let scheduler = Scheduler::new();
        let task = Scripted::succeeding();
        scheduler.enqueue_unique_periodic("sync", hourly(), task.clone(), online());
        sleep(Duration::from_secs(1)).await;

        assert!(scheduler.is_active("sync"));
        assert!(scheduler.cancel("sync"));
        tokio::task::yield_now().await;
        assert!(!scheduler.is_active("sync"));
        assert!(!scheduler.cancel("sync"));

        let again = scheduler.enqueue_unique_periodic("sync", hourly(), task, online());
        assert_eq!(again, Registration::Registered);
        scheduler.cancel("sync");
    }
}
