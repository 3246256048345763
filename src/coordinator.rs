//! Distributes single-file scan jobs over a bounded pool of worker threads.
//!
//! The coordinator is one control loop on the caller's thread. It owns the
//! pending queue, the `remaining` counter and the table of live workers, and
//! reacts only to completion messages. Workers share nothing mutable with it
//! or with each other.
//!
//! Scheduling rules:
//! - at most `concurrency` threads exist, counting abandoned ones that are
//!   still running, so at most that many jobs are in flight;
//! - a worker gets its next job only after its previous completion was handled;
//! - a finished worker is reused while work remains and retired otherwise;
//! - a per-file failure never aborts the run; only failing to start any
//!   worker at all does ([`Error::Scheduling`]).

use crate::errors::{Error, Result};
use crate::matcher::{EsImportMatcher, ImportMatcher};
use crate::outcome::{FileScanFailure, ScanOutcome};
use crate::rules::ReplacementRule;
use crate::worker::{self, Completion, JobOutcome, ScanContext, ScanJob, Worker, WorkerBody};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often live workers are checked for silent exits.
const LIVENESS_POLL: Duration = Duration::from_millis(50);

/// Tuning for a coordinator run.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum number of jobs in flight. Must be at least 1.
    pub concurrency: usize,
    /// Upper bound on a single job. `None` waits as long as the worker lives.
    /// A timed-out thread keeps its share of `concurrency` until it exits.
    pub job_timeout: Option<Duration>,
    /// Keep each matched file's text in its result, for the fix stage.
    pub retain_contents: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            job_timeout: None,
            retain_contents: false,
        }
    }
}

/// Cooperative cancellation for a running scan.
///
/// Once cancelled, no further job is assigned. Jobs already in flight finish
/// and are recorded; queued paths end up in [`ScanOutcome::unscanned`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a job ended, as reported to progress listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Matched,
    Clean,
    Failed,
}

/// Advisory progress notifications.
#[derive(Debug, Clone, Copy)]
pub enum ProgressEvent<'a> {
    /// A path was handed to a worker.
    Started { path: &'a Path, worker: usize },
    /// A path's outcome was recorded.
    Finished { path: &'a Path, status: JobStatus },
}

/// Runs scans over a pool of worker threads.
pub struct ScanCoordinator {
    config: CoordinatorConfig,
    matcher: Option<Arc<dyn ImportMatcher>>,
    cancel: CancelToken,
    body: WorkerBody,
}

impl ScanCoordinator {
    /// Creates a coordinator using the default import matcher.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            matcher: None,
            cancel: CancelToken::new(),
            body: worker::default_body(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_worker_body(mut self, body: WorkerBody) -> Self {
        self.body = body;
        self
    }

    /// Replaces the matching primitive used by the workers.
    pub fn with_matcher(mut self, matcher: Arc<dyn ImportMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Ties the coordinator to an external cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels scans run by this coordinator.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Scans every path against `rules` and returns once each path is accounted for.
    ///
    /// `on_progress` is called on the caller's thread; it cannot influence
    /// scheduling. Empty input returns an empty outcome without starting any
    /// worker.
    pub fn scan<F>(
        &self,
        paths: Vec<PathBuf>,
        rules: Arc<[ReplacementRule]>,
        on_progress: F,
    ) -> Result<ScanOutcome>
    where
        F: FnMut(ProgressEvent<'_>),
    {
        if self.config.concurrency == 0 {
            return Err("Concurrency must be at least 1".into());
        }
        if self.config.job_timeout == Some(Duration::ZERO) {
            return Err("Job timeout must be greater than zero".into());
        }
        if paths.is_empty() {
            return Ok(ScanOutcome::default());
        }

        let matcher = match &self.matcher {
            Some(matcher) => matcher.clone(),
            None => Arc::new(EsImportMatcher::for_rules(&rules)?),
        };
        let ctx = ScanContext {
            rules,
            matcher,
            retain_contents: self.config.retain_contents,
        };

        let (done_tx, done_rx) = unbounded();
        let run = Run {
            config: &self.config,
            cancel: &self.cancel,
            ctx,
            body: self.body.clone(),
            done_tx,
            done_rx,
            capacity: self.config.concurrency.min(paths.len()),
            remaining: paths.len(),
            queue: paths.into(),
            workers: HashMap::new(),
            abandoned: Vec::new(),
            spawn_error: None,
            next_worker: 0,
            next_job: 0,
            outcome: ScanOutcome::default(),
            on_progress,
        };
        run.execute()
    }
}

/// Scans `paths` with the default matcher and no timeout.
pub fn scan<F>(
    paths: Vec<PathBuf>,
    rules: Arc<[ReplacementRule]>,
    concurrency: usize,
    on_progress: F,
) -> Result<ScanOutcome>
where
    F: FnMut(ProgressEvent<'_>),
{
    ScanCoordinator::new(CoordinatorConfig {
        concurrency,
        ..CoordinatorConfig::default()
    })
    .scan(paths, rules, on_progress)
}

/// A job the coordinator is waiting on.
struct InFlight {
    id: u64,
    path: PathBuf,
    deadline: Option<Instant>,
}

struct Slot {
    worker: Worker,
    job: Option<InFlight>,
}

/// State of one `scan` call. Touched only by the coordinator thread.
struct Run<'a, F> {
    config: &'a CoordinatorConfig,
    cancel: &'a CancelToken,
    ctx: ScanContext,
    body: WorkerBody,
    done_tx: Sender<Completion>,
    done_rx: Receiver<Completion>,
    /// Most threads allowed at once. Shrinks when a spawn fails.
    capacity: usize,
    queue: VecDeque<PathBuf>,
    remaining: usize,
    workers: HashMap<usize, Slot>,
    /// Retired threads that still own a job nobody waits for.
    abandoned: Vec<JoinHandle<()>>,
    spawn_error: Option<io::Error>,
    next_worker: usize,
    next_job: u64,
    outcome: ScanOutcome,
    on_progress: F,
}

impl<F> Run<'_, F>
where
    F: FnMut(ProgressEvent<'_>),
{
    fn execute(mut self) -> Result<ScanOutcome> {
        let requested = self.capacity;
        self.top_up();
        if self.next_worker == 0 {
            return Err(Error::Scheduling {
                requested,
                reason: self
                    .spawn_error
                    .take()
                    .map_or_else(|| "unknown".to_string(), |e| e.to_string()),
            });
        }
        if self.capacity < requested {
            warn!(started = self.capacity, requested, "running with fewer scan workers");
        }

        while self.remaining > 0 {
            if self.cancel.is_cancelled() && !self.queue.is_empty() {
                self.drain_unscanned();
                if self.remaining == 0 {
                    break;
                }
            }

            match self.done_rx.recv_timeout(self.next_wait()) {
                Ok(completion) => self.complete(completion),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Scheduling {
                        requested,
                        reason: "completion channel closed".to_string(),
                    });
                }
            }
            self.reap_stalled();
            self.top_up();
        }

        for (_, slot) in self.workers.drain() {
            slot.worker.retire();
        }
        self.abandoned.retain(|handle| !handle.is_finished());
        if !self.abandoned.is_empty() {
            debug!(threads = self.abandoned.len(), "leaving abandoned scan threads running");
        }
        self.outcome.cancelled = self.cancel.is_cancelled();
        debug!(
            results = self.outcome.results.len(),
            failures = self.outcome.failures.len(),
            clean = self.outcome.clean,
            unscanned = self.outcome.unscanned.len(),
            "scan finished"
        );
        Ok(self.outcome)
    }

    fn spawn_worker(&mut self) -> io::Result<usize> {
        let id = self.next_worker;
        let worker = Worker::spawn(id, self.ctx.clone(), self.done_tx.clone(), &self.body)?;
        self.next_worker += 1;
        self.workers.insert(id, Slot { worker, job: None });
        Ok(id)
    }

    /// Gives an idle worker its next job, or retires it when there is none.
    fn dispatch(&mut self, id: usize) {
        let next = if self.cancel.is_cancelled() {
            None
        } else {
            self.queue.pop_front()
        };
        let Some(path) = next else {
            if let Some(slot) = self.workers.remove(&id) {
                debug!(worker = id, "retiring scan worker");
                slot.worker.retire();
            }
            return;
        };
        let Some(slot) = self.workers.get_mut(&id) else {
            self.queue.push_front(path);
            return;
        };

        self.next_job += 1;
        let job = ScanJob {
            id: self.next_job,
            path: path.clone(),
        };
        if let Err(job) = slot.worker.assign(job) {
            // The thread stopped taking work. Requeue; `top_up` replaces it.
            warn!(worker = id, "scan worker exited while idle");
            self.queue.push_front(job.path);
            if let Some(slot) = self.workers.remove(&id) {
                self.abandon(slot.worker);
            }
            return;
        }

        debug!(worker = id, path = %path.display(), "assigned scan job");
        (self.on_progress)(ProgressEvent::Started {
            path: &path,
            worker: id,
        });
        slot.job = Some(InFlight {
            id: self.next_job,
            deadline: self.config.job_timeout.map(|t| Instant::now() + t),
            path,
        });
    }

    /// Starts workers for queued paths while the thread budget allows.
    ///
    /// A failed spawn lowers the budget to what is running now. Once nothing
    /// can run, the queued paths become failures.
    fn top_up(&mut self) {
        while !self.queue.is_empty()
            && !self.cancel.is_cancelled()
            && self.occupied() < self.capacity
        {
            match self.spawn_worker() {
                Ok(id) => self.dispatch(id),
                Err(e) => {
                    warn!(error = %e, "failed to start scan worker");
                    self.capacity = self.occupied();
                    if self.capacity == 0 && self.next_worker > 0 {
                        self.fail_queued(&format!("no scan worker available: {e}"));
                    }
                    self.spawn_error = Some(e);
                    return;
                }
            }
        }
    }

    /// Threads counted against the budget: live workers plus abandoned
    /// threads that have not exited yet.
    fn occupied(&mut self) -> usize {
        self.abandoned.retain(|handle| !handle.is_finished());
        self.workers.len() + self.abandoned.len()
    }

    fn abandon(&mut self, worker: Worker) {
        let handle = worker.retire();
        if !handle.is_finished() {
            self.abandoned.push(handle);
        }
    }

    fn complete(&mut self, completion: Completion) {
        let Some(slot) = self.workers.get_mut(&completion.worker) else {
            debug!(worker = completion.worker, "ignoring completion from abandoned worker");
            return;
        };
        if slot.job.as_ref().map(|j| j.id) != Some(completion.job) {
            debug!(worker = completion.worker, job = completion.job, "ignoring stale completion");
            return;
        }
        slot.job = None;
        self.record(completion.path, completion.outcome);
        self.dispatch(completion.worker);
    }

    fn record(&mut self, path: PathBuf, outcome: JobOutcome) {
        self.remaining -= 1;
        let status = match outcome {
            JobOutcome::Success(Some(result)) => {
                self.outcome.results.push(result);
                JobStatus::Matched
            }
            JobOutcome::Success(None) => {
                self.outcome.clean += 1;
                JobStatus::Clean
            }
            JobOutcome::Failure(failure) => {
                warn!(path = %failure.path.display(), reason = %failure.reason, "file scan failed");
                self.outcome.failures.push(failure);
                JobStatus::Failed
            }
        };
        (self.on_progress)(ProgressEvent::Finished {
            path: &path,
            status,
        });
    }

    /// Turns timed-out jobs and silently exited workers into failures.
    fn reap_stalled(&mut self) {
        let now = Instant::now();
        let stalled: Vec<(usize, String)> = self
            .workers
            .iter()
            .filter_map(|(&id, slot)| {
                let job = slot.job.as_ref()?;
                if slot.worker.is_finished() {
                    Some((id, "scan worker exited without reporting a result".to_string()))
                } else if job.deadline.is_some_and(|d| d <= now) {
                    let limit = self.config.job_timeout.unwrap_or_default();
                    Some((id, format!("scan timed out after {:.1}s", limit.as_secs_f64())))
                } else {
                    None
                }
            })
            .collect();

        for (id, reason) in stalled {
            let Some(slot) = self.workers.remove(&id) else {
                continue;
            };
            let Slot { worker, job } = slot;
            self.abandon(worker);
            if let Some(job) = job {
                let failure = FileScanFailure {
                    path: job.path.clone(),
                    reason,
                };
                self.record(job.path, JobOutcome::Failure(failure));
            }
        }
    }

    fn drain_unscanned(&mut self) {
        debug!(queued = self.queue.len(), "scan cancelled, dropping queued paths");
        self.remaining -= self.queue.len();
        self.outcome.unscanned.extend(self.queue.drain(..));
    }

    fn fail_queued(&mut self, reason: &str) {
        while let Some(path) = self.queue.pop_front() {
            let failure = FileScanFailure {
                path: path.clone(),
                reason: reason.to_string(),
            };
            self.record(path, JobOutcome::Failure(failure));
        }
    }

    /// How long to block for the next completion.
    fn next_wait(&self) -> Duration {
        let now = Instant::now();
        self.workers
            .values()
            .filter_map(|slot| slot.job.as_ref()?.deadline)
            .map(|deadline| deadline.saturating_duration_since(now))
            .fold(LIVENESS_POLL, Duration::min)
    }
}
