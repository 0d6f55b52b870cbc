//! Bounded job queue dispatched by an elastic worker pool.
//!
//! Jobs are caller-owned reusable handles; scheduling appends the job to a
//! bounded FIFO and releases one submission token. Workers are cooperating
//! peers: there is no dispatcher thread. Each worker waits for a token,
//! dequeues one job, runs its callback, and loops. The pool grows by one
//! worker whenever a submission finds the queue deeper than the number of
//! live workers (up to `max_threads`) and shrinks back to `min_threads`
//! after an idle grace period.
//!
//! FIFO order holds per submitter: a job scheduled before another by the
//! same caller is handed to a worker no later than the other. Completion
//! order depends on workload.
//!
//! This is the one component that needs a threading runtime; it is only
//! compiled with the `std` feature.
//!
//! # Usage
//!
//! ```
//! use ember_foundation::jobqueue::{Job, JobQueue};
//! use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
//!
//! let pool = JobQueue::new(8);
//! let hits = Arc::new(AtomicU32::new(0));
//! let job = {
//!     let hits = hits.clone();
//!     Job::new(move || { hits.fetch_add(1, Ordering::SeqCst); })
//! };
//! pool.schedule(&job).unwrap();
//! pool.destroy();
//! ```

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
    time::Duration,
};

/// Default worker stack size in bytes. Hosted threads need far more than an
/// MCU task would; deeply embedded ports tune this down via
/// [`JobQueueAttr`].
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Default lower bound on pool size.
pub const DEFAULT_MIN_THREADS: usize = 1;

/// Default upper bound on pool size.
pub const DEFAULT_MAX_THREADS: usize = 1;

/// How long an extra worker (above `min_threads`) lingers idle before it
/// exits.
const IDLE_GRACE: Duration = Duration::from_millis(100);

/// Failures surfaced by the job queue API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "job errors must be handled"]
pub enum JobError {
    /// Bad handle or a job in a state the operation does not accept.
    InvalidParam,
    /// The queue already holds `capacity` pending jobs.
    Full,
    /// Resource failure: no worker is alive and none could be spawned, the
    /// pool is shut down, or the attributes were set too late.
    Error,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam => write!(f, "invalid job or pool parameter"),
            Self::Full => write!(f, "job queue full"),
            Self::Error => write!(f, "job queue resource failure"),
        }
    }
}

/// Worker pool attributes; may only be set between pool creation and the
/// first schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobQueueAttr {
    /// Stack size for workers spawned after this attribute takes effect.
    pub stack_size: usize,
    /// Workers kept alive even when idle.
    pub min_threads: usize,
    /// Hard ceiling on concurrently live workers.
    pub max_threads: usize,
    /// Scheduling priority for workers. Advisory: hosted targets ignore it.
    pub priority: i8,
}

impl Default for JobQueueAttr {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            min_threads: DEFAULT_MIN_THREADS,
            max_threads: DEFAULT_MAX_THREADS,
            priority: 0,
        }
    }
}

/// Observable job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    /// Not queued and not running; the handle may be (re)scheduled.
    Free = 0,
    /// Waiting in the queue.
    Queued = 1,
    /// A worker is executing the callback.
    Running = 2,
}

struct JobInner {
    state: AtomicU8,
    work: Mutex<Box<dyn FnMut() + Send>>,
}

/// A reusable unit of deferred work: callback plus captured context.
///
/// Handles are reference-counted; clones refer to the same job. A job whose
/// state is [`JobState::Free`] may be scheduled again.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub fn new(callback: impl FnMut() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(JobInner {
                state: AtomicU8::new(JobState::Free as u8),
                work: Mutex::new(Box::new(callback)),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        match self.inner.state.load(Ordering::Acquire) {
            1 => JobState::Queued,
            2 => JobState::Running,
            _ => JobState::Free,
        }
    }

    fn set_state(&self, state: JobState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    fn same_as(&self, other: &Job) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct PoolState {
    queue: VecDeque<Job>,
    attr: JobQueueAttr,
    /// Live workers, including ones busy running a callback.
    workers: usize,
    /// Workers currently inside a job callback.
    busy: usize,
    started: bool,
    shutdown: bool,
    handles: Vec<thread::JoinHandle<()>>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    /// Submission tokens: one notify per scheduled job, broadcast on
    /// shutdown.
    token: Condvar,
    capacity: usize,
}

/// Bounded FIFO of [`Job`]s plus the worker set draining it.
pub struct JobQueue {
    inner: Arc<PoolInner>,
}

impl JobQueue {
    /// Create a pool accepting up to `capacity` pending jobs and start the
    /// default `min_threads` workers eagerly.
    pub fn new(capacity: usize) -> Self {
        let pool = Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    attr: JobQueueAttr::default(),
                    workers: 0,
                    busy: 0,
                    started: false,
                    shutdown: false,
                    handles: Vec::new(),
                }),
                token: Condvar::new(),
                capacity,
            }),
        };
        {
            let mut state = pool.inner.state.lock().unwrap();
            let min = state.attr.min_threads;
            for _ in 0..min {
                let _ = Self::spawn_worker(&pool.inner, &mut state);
            }
        }
        pool
    }

    /// Reconfigure the pool. Only legal before the first schedule.
    ///
    /// Raising `min_threads` spawns the missing workers immediately.
    pub fn set_attr(&self, attr: JobQueueAttr) -> Result<(), JobError> {
        if attr.max_threads == 0 || attr.min_threads > attr.max_threads {
            return Err(JobError::InvalidParam);
        }

        let mut state = self.inner.state.lock().unwrap();
        if state.started {
            return Err(JobError::Error);
        }
        state.attr = attr;
        while state.workers < state.attr.min_threads {
            if Self::spawn_worker(&self.inner, &mut state).is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Append `job` to the queue and release one submission token.
    pub fn schedule(&self, job: &Job) -> Result<(), JobError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.shutdown {
            return Err(JobError::Error);
        }
        if state.queue.len() >= self.inner.capacity {
            return Err(JobError::Full);
        }
        if job.state() != JobState::Free {
            return Err(JobError::InvalidParam);
        }

        job.set_state(JobState::Queued);
        state.queue.push_back(job.clone());
        state.started = true;

        // Elastic growth: more pending work than idle workers to take it.
        let idle = state.workers - state.busy;
        if state.queue.len() > idle && state.workers < state.attr.max_threads {
            // A spawn failure is not fatal as long as someone is draining.
            let _ = Self::spawn_worker(&self.inner, &mut state);
        }

        if state.workers == 0 {
            // Nobody will ever run this; undo and let the caller retry.
            state.queue.pop_back();
            job.set_state(JobState::Free);
            return Err(JobError::Error);
        }

        self.inner.token.notify_one();
        Ok(())
    }

    /// Remove a not-yet-running job from the queue.
    ///
    /// Idempotent: succeeds whether or not the job was queued. A job already
    /// handed to a worker keeps running.
    pub fn deschedule(&self, job: &Job) -> Result<(), JobError> {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(at) = state.queue.iter().position(|queued| queued.same_as(job)) {
            state.queue.remove(at);
            job.set_state(JobState::Free);
        }
        Ok(())
    }

    /// Number of pending (queued, not yet running) jobs.
    pub fn count(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    /// Shut the pool down: signal every worker to exit, join them, and mark
    /// pending jobs free without executing them.
    pub fn destroy(self) {
        Self::shutdown(&self.inner);
    }

    fn shutdown(inner: &Arc<PoolInner>) {
        let handles = {
            let mut state = inner.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            for job in state.queue.drain(..) {
                job.set_state(JobState::Free);
            }
            core::mem::take(&mut state.handles)
        };
        inner.token.notify_all();
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn spawn_worker(
        inner: &Arc<PoolInner>,
        state: &mut PoolState,
    ) -> Result<(), std::io::Error> {
        let pool = Arc::clone(inner);
        let builder = thread::Builder::new()
            .name("jobqueue-worker".into())
            .stack_size(state.attr.stack_size);

        state.workers += 1;
        match builder.spawn(move || Self::worker_loop(pool)) {
            Ok(handle) => {
                state.handles.push(handle);
                log::debug!("jobqueue: worker spawned, {} live", state.workers);
                Ok(())
            }
            Err(err) => {
                state.workers -= 1;
                log::warn!("jobqueue: worker spawn failed: {}", err);
                Err(err)
            }
        }
    }

    fn worker_loop(pool: Arc<PoolInner>) {
        loop {
            let job = {
                let mut state = pool.state.lock().unwrap();
                loop {
                    if state.shutdown {
                        state.workers -= 1;
                        return;
                    }
                    if let Some(job) = state.queue.pop_front() {
                        state.busy += 1;
                        break job;
                    }
                    if state.workers > state.attr.min_threads {
                        // Extra worker: linger for the grace period, then
                        // shrink the pool if still idle.
                        let (next, timeout) =
                            pool.token.wait_timeout(state, IDLE_GRACE).unwrap();
                        state = next;
                        if timeout.timed_out()
                            && state.queue.is_empty()
                            && !state.shutdown
                            && state.workers > state.attr.min_threads
                        {
                            state.workers -= 1;
                            log::debug!("jobqueue: idle worker exiting, {} live", state.workers);
                            return;
                        }
                    } else {
                        state = pool.token.wait(state).unwrap();
                    }
                }
            };

            job.set_state(JobState::Running);
            {
                let mut work = job.inner.work.lock().unwrap();
                (&mut **work)();
            }
            job.set_state(JobState::Free);
            pool.state.lock().unwrap().busy -= 1;
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        Self::shutdown(&self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc,
    };
    use std::time::Instant;

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(deadline_ms) {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    #[test]
    fn jobs_run_exactly_once() {
        let pool = JobQueue::new(10);
        pool.set_attr(JobQueueAttr {
            min_threads: 1,
            max_threads: 3,
            ..Default::default()
        })
        .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..10)
            .map(|_| {
                let hits = hits.clone();
                Job::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for job in &jobs {
            pool.schedule(job).unwrap();
        }

        assert!(wait_until(2000, || hits.load(Ordering::SeqCst) == 10));
        assert!(wait_until(2000, || pool.count() == 0));
        pool.destroy();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn queue_capacity_is_enforced() {
        let pool = JobQueue::new(2);
        pool.set_attr(JobQueueAttr {
            min_threads: 1,
            max_threads: 1,
            ..Default::default()
        })
        .unwrap();

        // Occupy the single worker so queued jobs stay queued.
        let (release, gate) = mpsc::channel::<()>();
        let blocker = Job::new(move || {
            let _ = gate.recv();
        });
        pool.schedule(&blocker).unwrap();
        assert!(wait_until(1000, || blocker.state() == JobState::Running));

        let idle = || Job::new(|| {});
        let a = idle();
        let b = idle();
        let c = idle();
        pool.schedule(&a).unwrap();
        pool.schedule(&b).unwrap();
        assert_eq!(pool.schedule(&c), Err(JobError::Full));
        assert_eq!(pool.count(), 2);

        release.send(()).unwrap();
        pool.destroy();
    }

    #[test]
    fn deschedule_removes_pending_job() {
        let pool = JobQueue::new(4);

        let (release, gate) = mpsc::channel::<()>();
        let blocker = Job::new(move || {
            let _ = gate.recv();
        });
        pool.schedule(&blocker).unwrap();
        assert!(wait_until(1000, || blocker.state() == JobState::Running));

        let ran = Arc::new(AtomicUsize::new(0));
        let victim = {
            let ran = ran.clone();
            Job::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
        };
        pool.schedule(&victim).unwrap();
        assert_eq!(victim.state(), JobState::Queued);

        pool.deschedule(&victim).unwrap();
        assert_eq!(victim.state(), JobState::Free);
        // Descheduling again (or a never-queued job) still succeeds.
        pool.deschedule(&victim).unwrap();

        release.send(()).unwrap();
        pool.destroy();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scheduling_same_job_twice_rejected() {
        let pool = JobQueue::new(4);

        let (release, gate) = mpsc::channel::<()>();
        let blocker = Job::new(move || {
            let _ = gate.recv();
        });
        pool.schedule(&blocker).unwrap();
        assert!(wait_until(1000, || blocker.state() == JobState::Running));

        let job = Job::new(|| {});
        pool.schedule(&job).unwrap();
        assert_eq!(pool.schedule(&job), Err(JobError::InvalidParam));

        release.send(()).unwrap();
        pool.destroy();
    }

    #[test]
    fn pool_grows_to_max_threads() {
        let pool = JobQueue::new(8);
        pool.set_attr(JobQueueAttr {
            min_threads: 1,
            max_threads: 3,
            ..Default::default()
        })
        .unwrap();

        // Three jobs that all hold their worker until released; they can
        // only be in flight simultaneously if the pool grew to three.
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        let jobs: Vec<Job> = (0..3)
            .map(|_| {
                let started = started_tx.clone();
                let release = release_rx.clone();
                Job::new(move || {
                    started.send(()).unwrap();
                    let _ = release.lock().unwrap().recv();
                })
            })
            .collect();
        for job in &jobs {
            pool.schedule(job).unwrap();
        }

        for _ in 0..3 {
            started_rx
                .recv_timeout(Duration::from_secs(2))
                .expect("pool failed to grow to three workers");
        }

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        pool.destroy();
    }

    #[test]
    fn destroy_discards_pending_jobs() {
        let pool = JobQueue::new(4);

        let (release, gate) = mpsc::channel::<()>();
        let blocker = Job::new(move || {
            let _ = gate.recv();
        });
        pool.schedule(&blocker).unwrap();
        assert!(wait_until(1000, || blocker.state() == JobState::Running));

        let ran = Arc::new(AtomicUsize::new(0));
        let pending = {
            let ran = ran.clone();
            Job::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
        };
        pool.schedule(&pending).unwrap();

        // Destroy from a helper thread (it blocks joining the busy worker),
        // then let the blocker finish.
        let destroyer = thread::spawn(move || pool.destroy());
        thread::sleep(Duration::from_millis(50));
        release.send(()).unwrap();
        destroyer.join().unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pending.state(), JobState::Free);
    }

    #[test]
    fn set_attr_rejected_after_first_schedule() {
        let pool = JobQueue::new(4);
        let job = Job::new(|| {});
        pool.schedule(&job).unwrap();

        assert_eq!(
            pool.set_attr(JobQueueAttr::default()),
            Err(JobError::Error)
        );
        pool.destroy();
    }

    #[test]
    fn invalid_attr_rejected() {
        let pool = JobQueue::new(4);
        assert_eq!(
            pool.set_attr(JobQueueAttr {
                min_threads: 3,
                max_threads: 2,
                ..Default::default()
            }),
            Err(JobError::InvalidParam)
        );
        assert_eq!(
            pool.set_attr(JobQueueAttr {
                min_threads: 0,
                max_threads: 0,
                ..Default::default()
            }),
            Err(JobError::InvalidParam)
        );
        pool.destroy();
    }
}
