//! Scan worker threads.
//!
//! Each worker owns one thread and one job channel. It takes a single job at a
//! time and answers every job with exactly one [`Completion`], even when the
//! matcher panics.

use crate::matcher::ImportMatcher;
use crate::outcome::{FileScanFailure, FileScanResult};
use crate::rules::ReplacementRule;
use crate::scanner;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A single file to scan. Owned by exactly one worker once sent.
#[derive(Debug)]
pub(crate) struct ScanJob {
    pub id: u64,
    pub path: PathBuf,
}

/// Terminal answer for one job.
#[derive(Debug)]
pub(crate) enum JobOutcome {
    /// The file was scanned. `None` means it had no matches.
    Success(Option<FileScanResult>),
    Failure(FileScanFailure),
}

/// Message sent from a worker back to the coordinator.
#[derive(Debug)]
pub(crate) struct Completion {
    pub worker: usize,
    pub job: u64,
    pub path: PathBuf,
    pub outcome: JobOutcome,
}

/// Read-only state every worker shares.
#[derive(Clone)]
pub(crate) struct ScanContext {
    pub rules: Arc<[ReplacementRule]>,
    pub matcher: Arc<dyn ImportMatcher>,
    pub retain_contents: bool,
}

/// What a worker thread runs: take jobs from the receiver, answer on the sender.
pub(crate) type WorkerBody =
    Arc<dyn Fn(usize, ScanContext, Receiver<ScanJob>, Sender<Completion>) + Send + Sync>;

/// The body used outside of tests.
pub(crate) fn default_body() -> WorkerBody {
    Arc::new(run)
}

/// Coordinator-side handle to a worker thread.
pub(crate) struct Worker {
    job_tx: Sender<ScanJob>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Starts a worker thread that reports completions on `done_tx`.
    pub fn spawn(
        id: usize,
        ctx: ScanContext,
        done_tx: Sender<Completion>,
        body: &WorkerBody,
    ) -> io::Result<Self> {
        let (job_tx, job_rx) = unbounded();
        let body = Arc::clone(body);
        let handle = thread::Builder::new()
            .name(format!("modswap-scan-{id}"))
            .spawn(move || body(id, ctx, job_rx, done_tx))?;
        Ok(Self { job_tx, handle })
    }

    /// Hands a job to the worker. Gives the job back if the thread is gone.
    pub fn assign(&self, job: ScanJob) -> Result<(), ScanJob> {
        self.job_tx.send(job).map_err(|e| e.into_inner())
    }

    /// `true` once the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Closes the job channel and hands back the thread. The thread exits
    /// after its current job, if any.
    pub fn retire(self) -> JoinHandle<()> {
        drop(self.job_tx);
        self.handle
    }
}

pub(crate) fn run(
    id: usize,
    ctx: ScanContext,
    job_rx: Receiver<ScanJob>,
    done_tx: Sender<Completion>,
) {
    while let Ok(job) = job_rx.recv() {
        if done_tx.send(process(id, &ctx, job)).is_err() {
            break; // Coordinator gone
        }
    }
}

/// Scans one job's file. Panics in the matcher become failures.
pub(crate) fn process(id: usize, ctx: &ScanContext, job: ScanJob) -> Completion {
    let scanned = panic::catch_unwind(AssertUnwindSafe(|| {
        scanner::scan_file(&job.path, &ctx.rules, ctx.matcher.as_ref(), ctx.retain_contents)
    }));

    let outcome = match scanned {
        Ok(Ok(result)) => JobOutcome::Success(result),
        Ok(Err(e)) => JobOutcome::Failure(FileScanFailure {
            path: job.path.clone(),
            reason: e.to_string(),
        }),
        Err(payload) => JobOutcome::Failure(FileScanFailure {
            path: job.path.clone(),
            reason: format!("scan worker panicked: {}", panic_message(payload.as_ref())),
        }),
    };

    Completion {
        worker: id,
        job: job.id,
        path: job.path,
        outcome,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
