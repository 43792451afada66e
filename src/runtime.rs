//! ==============================================================================
//! runtime.rs - cooperative single-threaded scheduler with task supervision
//! ==============================================================================
//!
//! purpose:
//!     runs every long-lived task of the node (sensor polling, display
//!     rendering, http listener) on ONE thread. tasks only yield at await
//!     points: timers, socket i/o, or waiting on the blocking pool.
//!
//! relationships:
//!     - used by: main.rs (run), node.rs (register)
//!     - drives: sensor::SensorTask, display::DisplayRenderer,
//!       httpd::HttpResponder
//!
//! scheduling hazard:
//!     there is no preemption. a task that makes a long synchronous call
//!     (a slow driver read done inline) stalls every other task for that
//!     long. drivers that block must say so (SensorDriver::blocking) so the
//!     sensor task moves the call onto tokio's blocking pool.
//!
//! supervision:
//!     a task that returns an error is logged with its name and full error
//!     chain, then restarted after an exponential backoff, at most
//!     `max_restarts` times in a row. a run that lasts at least
//!     `max_backoff` before failing resets the count and the backoff, so
//!     rare transient failures never use up the budget. a task that
//!     returns Ok(()) is considered done.
//!
//! ==============================================================================

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::LocalSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// A long-lived unit of work driven by the [`Scheduler`].
///
/// `run` is called again after a failure, so implementations keep whatever
/// state should survive a restart in `self` and reopen anything that should
/// not.
#[allow(async_fn_in_trait)]
pub trait Task {
    fn name(&self) -> &str;

    async fn run(&mut self) -> anyhow::Result<()>;
}

/// How the supervisor reacts when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// `None` restarts forever.
    pub max_restarts: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RestartPolicy {
    pub const NEVER: Self = Self {
        max_restarts: Some(0),
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    };

    pub fn bounded(max_restarts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_restarts: Some(max_restarts),
            initial_backoff,
            max_backoff,
        }
    }

    /// whether restart number `attempt` (0-based) is still allowed
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_restarts.map_or(true, |max| attempt < max)
    }

    /// delay before restart number `attempt` (0-based): doubles each time,
    /// capped at `max_backoff`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::bounded(5, Duration::from_secs(1), Duration::from_secs(60))
    }
}

type LocalTask = Pin<Box<dyn Future<Output = ()>>>;

/// Collects tasks before start, then drives them all on the current thread.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<(String, LocalTask)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task + 'static>(&mut self, task: T, policy: RestartPolicy) {
        let name = task.name().to_string();
        self.tasks.push((name, Box::pin(supervise(task, policy))));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|(name, _)| name.as_str())
    }

    /// Runs every registered task until Ctrl-C.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await?;
        info!("shutdown signal received");
        Ok(())
    }

    /// Runs every registered task until `shutdown` resolves, then drops
    /// them all. Tasks that finish early simply leave the set.
    pub async fn run_until<F: Future>(self, shutdown: F) -> F::Output {
        let local = LocalSet::new();
        for (name, task) in self.tasks {
            info!(task = %name, "starting task");
            local.spawn_local(task);
        }
        local.run_until(shutdown).await
    }
}

async fn supervise<T: Task>(mut task: T, policy: RestartPolicy) {
    let mut attempt = 0;
    loop {
        let started = Instant::now();
        let outcome = task.run().await;
        // a run that outlived the longest backoff counts as healthy again
        if attempt > 0 && started.elapsed() >= policy.max_backoff {
            info!(task = task.name(), restarts = attempt, "task recovered, restart budget reset");
            attempt = 0;
        }
        match outcome {
            Ok(()) => {
                info!(task = task.name(), "task finished");
                return;
            }
            Err(e) => {
                error!(task = task.name(), error = %format!("{e:#}"), "task failed");
                if !policy.allows(attempt) {
                    error!(task = task.name(), restarts = attempt, "giving up on task");
                    return;
                }
                let delay = policy.backoff_for(attempt);
                attempt += 1;
                warn!(task = task.name(), attempt, ?delay, "restarting task");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct Flaky {
        runs: Rc<Cell<u32>>,
        started_at: Rc<RefCell<Vec<Instant>>>,
        fail_times: u32,
    }

    impl Task for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run(&mut self) -> anyhow::Result<()> {
            self.runs.set(self.runs.get() + 1);
            self.started_at.borrow_mut().push(Instant::now());
            if self.runs.get() <= self.fail_times {
                anyhow::bail!("boom #{}", self.runs.get());
            }
            Ok(())
        }
    }

    fn flaky(fail_times: u32) -> (Flaky, Rc<Cell<u32>>, Rc<RefCell<Vec<Instant>>>) {
        let runs = Rc::new(Cell::new(0));
        let started_at = Rc::new(RefCell::new(Vec::new()));
        let task = Flaky {
            runs: runs.clone(),
            started_at: started_at.clone(),
            fail_times,
        };
        (task, runs, started_at)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RestartPolicy::bounded(10, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(500));
    }

    #[test]
    fn never_policy_allows_no_restart() {
        assert!(!RestartPolicy::NEVER.allows(0));
        let forever = RestartPolicy {
            max_restarts: None,
            ..RestartPolicy::default()
        };
        assert!(forever.allows(u32::MAX - 1));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_is_restarted_after_backoff() {
        let (task, runs, started_at) = flaky(2);
        let mut scheduler = Scheduler::new();
        scheduler.register(
            task,
            RestartPolicy::bounded(5, Duration::from_millis(100), Duration::from_secs(1)),
        );

        scheduler
            .run_until(tokio::time::sleep(Duration::from_secs(5)))
            .await;

        assert_eq!(runs.get(), 3);
        let starts = started_at.borrow();
        assert_eq!(starts[1] - starts[0], Duration::from_millis(100));
        assert_eq!(starts[2] - starts[1], Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_gives_up_after_max_restarts() {
        let (task, runs, _) = flaky(u32::MAX);
        let mut scheduler = Scheduler::new();
        scheduler.register(
            task,
            RestartPolicy::bounded(2, Duration::from_millis(10), Duration::from_millis(10)),
        );

        scheduler
            .run_until(tokio::time::sleep(Duration::from_secs(60)))
            .await;

        // first run plus two restarts
        assert_eq!(runs.get(), 3);
    }

    /// Works for `healthy_for`, then fails. Every run.
    struct Wearing {
        runs: Rc<Cell<u32>>,
        healthy_for: Duration,
    }

    impl Task for Wearing {
        fn name(&self) -> &str {
            "wearing"
        }

        async fn run(&mut self) -> anyhow::Result<()> {
            self.runs.set(self.runs.get() + 1);
            tokio::time::sleep(self.healthy_for).await;
            anyhow::bail!("transient fault")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn long_healthy_runs_reset_the_restart_budget() {
        // Arrange
        let runs = Rc::new(Cell::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.register(
            Wearing {
                runs: runs.clone(),
                healthy_for: Duration::from_secs(120),
            },
            RestartPolicy::default(),
        );

        // Act: far more failures than max_restarts over two hours
        scheduler
            .run_until(tokio::time::sleep(Duration::from_secs(2 * 3600)))
            .await;

        // Assert: each cycle is 120s of work plus the first 1s backoff
        assert!(runs.get() > 50, "only {} runs", runs.get());
    }

    #[tokio::test(start_paused = true)]
    async fn short_runs_still_exhaust_the_budget() {
        let runs = Rc::new(Cell::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.register(
            Wearing {
                runs: runs.clone(),
                healthy_for: Duration::from_millis(500),
            },
            RestartPolicy::bounded(3, Duration::from_secs(1), Duration::from_secs(60)),
        );

        scheduler
            .run_until(tokio::time::sleep(Duration::from_secs(3600)))
            .await;

        assert_eq!(runs.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn a_failing_task_does_not_stop_the_others() {
        let (bad, _, _) = flaky(u32::MAX);
        let (good, good_runs, _) = flaky(0);
        let mut scheduler = Scheduler::new();
        scheduler.register(bad, RestartPolicy::NEVER);
        scheduler.register(good, RestartPolicy::NEVER);
        assert_eq!(scheduler.task_names().collect::<Vec<_>>(), ["flaky", "flaky"]);

        scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(10)))
            .await;

        assert_eq!(good_runs.get(), 1);
    }
}
