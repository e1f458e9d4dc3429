//! Admission scheduler: bounded concurrency, fixed-window start rate, priority order.
//!
//! Every upstream call goes through [`AdmissionScheduler::submit`]. At most
//! `concurrency` tasks execute at once, at most `max_starts` start per window,
//! and among queued tasks the highest priority starts first (FIFO on ties).
//!
//! The queue has no depth limit. Submissions are always accepted until
//! [`AdmissionScheduler::drain`] is called; after that they fail with
//! [`Error::Cancelled`].
//!
//! Dropping the future returned by `submit` cancels the task: a queued task is
//! skipped, a running task sees its cancellation token fire.

use crate::resilience::rate_limiter::{StartWindow, StartWindowConfig, StartWindowSnapshot};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument, Span};

/// What a caller receives when its task deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutBehavior {
    /// `Err(Error::Timeout)`.
    #[default]
    Reject,
    /// `Ok(None)`.
    NotFound,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub window: StartWindowConfig,
    /// Applied to submissions that carry no explicit deadline.
    pub task_timeout: Option<Duration>,
    pub timeout_behavior: TimeoutBehavior,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            window: StartWindowConfig::unlimited(),
            task_timeout: None,
            timeout_behavior: TimeoutBehavior::Reject,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_rate_limit(mut self, max_starts: u32, window: Duration) -> Self {
        self.window = StartWindowConfig::new()
            .with_max_starts(max_starts)
            .with_window(window);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn with_timeout_behavior(mut self, behavior: TimeoutBehavior) -> Self {
        self.timeout_behavior = behavior;
        self
    }

    /// Deadline `task_timeout` imposes on a task submitted at `now`.
    pub fn task_deadline(&self, now: Instant) -> Option<Instant> {
        self.task_timeout.map(|t| now + t)
    }

    /// The earlier of `deadline` and the task timeout counted from `now`.
    pub fn effective_deadline(&self, now: Instant, deadline: Option<Instant>) -> Option<Instant> {
        match (deadline, self.task_deadline(now)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSnapshot {
    pub queued: usize,
    pub running: usize,
    pub concurrency: usize,
    pub draining: bool,
    pub started_total: u64,
    pub completed_total: u64,
    pub window: StartWindowSnapshot,
}

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce() -> JobFuture + Send>;

struct QueuedTask {
    priority: i32,
    seq: u64,
    enqueued_at: Instant,
    token: CancellationToken,
    job: Job,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Max-heap: higher priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State {
    queue: BinaryHeap<QueuedTask>,
    running: usize,
    draining: bool,
    window: StartWindow,
    wake_scheduled: bool,
    next_seq: u64,
    started_total: u64,
    completed_total: u64,
}

struct Inner {
    cfg: SchedulerConfig,
    state: Mutex<State>,
    idle: Notify,
    root: CancellationToken,
}

#[derive(Clone)]
pub struct AdmissionScheduler {
    inner: Arc<Inner>,
}

impl AdmissionScheduler {
    pub fn new(cfg: SchedulerConfig) -> Self {
        let window = StartWindow::new(cfg.window.clone());
        Self {
            inner: Arc::new(Inner {
                cfg,
                state: Mutex::new(State {
                    queue: BinaryHeap::new(),
                    running: 0,
                    draining: false,
                    window,
                    wake_scheduled: false,
                    next_seq: 0,
                    started_total: 0,
                    completed_total: 0,
                }),
                idle: Notify::new(),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Queue `op` and wait for its result.
    ///
    /// `op` receives a token that fires when the task is aborted (deadline,
    /// caller gone, or [`AdmissionScheduler::abort_running`]). `Ok(None)` is only
    /// produced by a deadline under [`TimeoutBehavior::NotFound`].
    ///
    /// The task deadline is the earlier of `deadline` and the configured task
    /// timeout.
    pub async fn submit<T, F, Fut>(
        &self,
        priority: i32,
        deadline: Option<Instant>,
        op: F,
    ) -> Result<Option<T>>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let deadline = self.inner.cfg.effective_deadline(Instant::now(), deadline);
        let behavior = self.inner.cfg.timeout_behavior;
        let token = self.inner.root.child_token();
        let (tx, rx) = oneshot::channel::<Result<Option<T>>>();

        // Run under the submitter's span so upstream logs keep its fields.
        let span = Span::current();
        let job_token = token.clone();
        let job: Job = Box::new(move || -> JobFuture {
            let run = async move {
                if tx.is_closed() || job_token.is_cancelled() {
                    return;
                }
                let fut = op(job_token.clone());
                let result = tokio::select! {
                    r = fut => r.map(Some),
                    _ = job_token.cancelled() => Err(Error::cancelled("task aborted")),
                    _ = sleep_until_opt(deadline) => {
                        job_token.cancel();
                        timeout_result(behavior)
                    }
                };
                let _ = tx.send(result);
            };
            Box::pin(run.instrument(span))
        });

        // Dropping the caller future cancels the task.
        let _guard = token.clone().drop_guard();
        self.enqueue(priority, token, job)?;

        let received = match deadline {
            Some(d) => match tokio::time::timeout_at(d, rx).await {
                Ok(r) => r,
                Err(_) => return timeout_result(behavior),
            },
            None => rx.await,
        };
        received.unwrap_or_else(|_| Err(Error::cancelled("task discarded before it started")))
    }

    fn enqueue(&self, priority: i32, token: CancellationToken, job: Job) -> Result<()> {
        {
            let mut st = self.inner.state.lock();
            if st.draining {
                return Err(Error::cancelled("scheduler is draining"));
            }
            let seq = st.next_seq;
            st.next_seq += 1;
            st.queue.push(QueuedTask {
                priority,
                seq,
                enqueued_at: Instant::now(),
                token,
                job,
            });
        }
        pump(&self.inner);
        Ok(())
    }

    /// Stop accepting work and discard everything still queued. Callers of the
    /// discarded tasks receive [`Error::Cancelled`]. Running tasks continue.
    ///
    /// Returns the number of discarded tasks.
    pub fn drain(&self) -> usize {
        let discarded = {
            let mut st = self.inner.state.lock();
            st.draining = true;
            std::mem::take(&mut st.queue)
        };
        let count = discarded.len();
        // Dropping the jobs drops their result senders outside the lock.
        drop(discarded);
        info!(discarded = count, "scheduler drained");
        count
    }

    /// Fire the cancellation token of every running and queued task.
    pub fn abort_running(&self) {
        self.inner.root.cancel();
    }

    /// Wait until no task is running, at most `grace`. Returns false on timeout.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let inner = &self.inner;
        tokio::time::timeout(grace, async {
            loop {
                let notified = inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if inner.state.lock().running == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.cfg
    }

    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let mut st = self.inner.state.lock();
        let window = st.window.snapshot(std::time::Instant::now());
        SchedulerSnapshot {
            queued: st.queue.len(),
            running: st.running,
            concurrency: self.inner.cfg.concurrency,
            draining: st.draining,
            started_total: st.started_total,
            completed_total: st.completed_total,
            window,
        }
    }
}

fn timeout_result<T>(behavior: TimeoutBehavior) -> Result<Option<T>> {
    match behavior {
        TimeoutBehavior::Reject => Err(Error::timeout("task deadline exceeded")),
        TimeoutBehavior::NotFound => Ok(None),
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

/// Decrements the running count when a started task ends, including by panic.
struct RunningGuard {
    inner: Arc<Inner>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let now_idle = {
            let mut st = self.inner.state.lock();
            st.running = st.running.saturating_sub(1);
            st.completed_total += 1;
            st.running == 0
        };
        if now_idle {
            self.inner.idle.notify_waiters();
        }
        pump(&self.inner);
    }
}

/// Start as many queued tasks as the concurrency bound and window allow.
///
/// Outside a runtime nothing is started; queued tasks wait for the next pump.
fn pump(inner: &Arc<Inner>) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    let mut to_start = Vec::new();
    let mut wake_after = None;
    {
        let mut st = inner.state.lock();
        while st.running < inner.cfg.concurrency.max(1) {
            let Some(task) = st.queue.pop() else { break };
            if task.token.is_cancelled() {
                continue;
            }
            if let Err(wait) = st.window.try_start(std::time::Instant::now()) {
                st.queue.push(task);
                if !st.wake_scheduled {
                    st.wake_scheduled = true;
                    wake_after = Some(wait);
                }
                break;
            }
            st.running += 1;
            st.started_total += 1;
            debug!(
                priority = task.priority,
                queued_ms = task.enqueued_at.elapsed().as_millis() as u64,
                "starting task"
            );
            to_start.push(task.job);
        }
    }

    for job in to_start {
        let guard = RunningGuard {
            inner: inner.clone(),
        };
        handle.spawn(async move {
            let _guard = guard;
            job().await;
        });
    }

    if let Some(wait) = wake_after {
        let inner = inner.clone();
        handle.spawn(async move {
            tokio::time::sleep(wait).await;
            inner.state.lock().wake_scheduled = false;
            pump(&inner);
        });
    }
}
