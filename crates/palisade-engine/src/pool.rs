//! Bounded worker pool for synthesis attempts.
//!
//! Attempts are queued on a shared channel and picked up by a fixed number of
//! threads. Each thread hands its attempt to an [`AttemptRunner`]; the default
//! runner supervises a `palisade worker` child process so that a crashing or
//! runaway solver only takes its own attempt down. Results come back on a
//! completion channel in completion order.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use palisade_sos::SdpSolver;

use crate::params::{InputError, SynthesisJob};
use crate::result::{FailureKind, SynthesisOutcome};
use crate::synthesis::{panic_message, synthesize_cancellable, synthesize_with, SynthesisOptions};

/// Shared cancellation flag of one attempt.
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

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Why an attempt produced no result record.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("{message}")]
    Input { kind: FailureKind, message: String },
    #[error("Worker I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Worker exited with {status} without a result{}", stderr_suffix(.stderr))]
    WorkerExit { status: String, stderr: String },
    #[error("Unreadable worker output: {0}")]
    Protocol(String),
    #[error("Attempt panicked: {0}")]
    Panicked(String),
    #[error("Attempt cancelled")]
    Cancelled,
}

fn stderr_suffix(stderr: &str) -> String {
    match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(line) => format!(": {}", line.trim()),
        None => String::new(),
    }
}

impl AttemptError {
    /// Failure kind recorded in sweep reports.
    pub fn kind(&self) -> FailureKind {
        match self {
            AttemptError::Input { kind, .. } => *kind,
            _ => FailureKind::SolverInvocationFailure,
        }
    }
}

impl From<InputError> for AttemptError {
    fn from(e: InputError) -> Self {
        AttemptError::Input {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Could not start worker thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("Could not locate the worker executable: {0}")]
    WorkerExe(#[source] io::Error),
    #[error("Worker pool is closed")]
    Closed,
}

/// Runs one synthesis attempt to completion.
pub trait AttemptRunner: Send + Sync {
    /// Run `job`. Implementations should give up early once `cancel` is
    /// set, but are not required to.
    fn run(&self, job: &SynthesisJob, cancel: &CancelToken)
        -> Result<SynthesisOutcome, AttemptError>;

    /// Stop whatever cancelled attempts still hold outside this process,
    /// without waiting for them. Called when a pool is dropped.
    fn release_cancelled(&self) {}
}

/// Runs attempts on the calling thread with the backend named in the job.
#[derive(Debug, Clone, Default)]
pub struct InProcessRunner {
    options: SynthesisOptions,
}

impl InProcessRunner {
    pub fn new(options: SynthesisOptions) -> Self {
        Self { options }
    }
}

impl AttemptRunner for InProcessRunner {
    fn run(
        &self,
        job: &SynthesisJob,
        cancel: &CancelToken,
    ) -> Result<SynthesisOutcome, AttemptError> {
        let outcome = synthesize_cancellable(job, &self.options, cancel)?;
        if cancel.is_cancelled() && !outcome.is_success() {
            return Err(AttemptError::Cancelled);
        }
        Ok(outcome)
    }
}

/// Runs attempts in process with a solver built per attempt.
pub struct SolverFactoryRunner<F> {
    factory: F,
    options: SynthesisOptions,
}

impl<F> SolverFactoryRunner<F> {
    pub fn new(factory: F, options: SynthesisOptions) -> Self {
        Self { factory, options }
    }
}

impl<F, S> AttemptRunner for SolverFactoryRunner<F>
where
    F: Fn(&SynthesisJob) -> S + Send + Sync,
    S: SdpSolver,
{
    fn run(
        &self,
        job: &SynthesisJob,
        _cancel: &CancelToken,
    ) -> Result<SynthesisOutcome, AttemptError> {
        let mut solver = (self.factory)(job);
        Ok(synthesize_with(job, &mut solver, &self.options)?)
    }
}

/// Message sent to a worker process on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub job: SynthesisJob,
    #[serde(default)]
    pub options: SynthesisOptions,
}

/// Message a worker process prints on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum WorkerReply {
    Outcome { outcome: SynthesisOutcome },
    InputError { kind: FailureKind, message: String },
}

/// Worker side of the process protocol: read one request line, synthesize,
/// write one reply line.
///
/// The rest of `input` is watched while the attempt runs. End of input means
/// the supervisor hung up, and a running backend process is killed.
pub fn serve_worker<R, W>(input: R, mut output: W) -> Result<(), AttemptError>
where
    R: Read + Send + 'static,
    W: Write,
{
    let mut input = BufReader::new(input);
    let mut line = String::new();
    input.read_line(&mut line)?;
    let request: WorkerRequest =
        serde_json::from_str(&line).map_err(|e| AttemptError::Protocol(e.to_string()))?;

    let hangup = CancelToken::new();
    watch_hangup(input, hangup.clone());
    let reply = match synthesize_cancellable(&request.job, &request.options, &hangup) {
        Ok(outcome) => WorkerReply::Outcome { outcome },
        Err(e) => WorkerReply::InputError {
            kind: e.kind(),
            message: e.to_string(),
        },
    };
    serde_json::to_writer(&mut output, &reply).map_err(|e| AttemptError::Protocol(e.to_string()))?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn watch_hangup<R: BufRead + Send + 'static>(mut input: R, hangup: CancelToken) {
    thread::spawn(move || {
        let mut sink = [0u8; 256];
        loop {
            match input.read(&mut sink) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
        hangup.cancel();
    });
}

/// Stdin pipes of running workers, keyed by attempt.
type LiveWorkers = HashMap<u64, (ChildStdin, CancelToken)>;

/// Runs each attempt in a `<exe> worker` child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    exe: PathBuf,
    options: SynthesisOptions,
    poll_interval: Duration,
    grace: Duration,
    live: Arc<Mutex<LiveWorkers>>,
    next_id: Arc<AtomicU64>,
}

impl ProcessRunner {
    pub fn new(exe: impl Into<PathBuf>, options: SynthesisOptions) -> Self {
        Self {
            exe: exe.into(),
            options,
            poll_interval: Duration::from_millis(20),
            grace: Duration::from_secs(2),
            live: Arc::default(),
            next_id: Arc::default(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Time a hung-up worker gets to stop its solver before it is killed.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn live(&self) -> MutexGuard<'_, LiveWorkers> {
        match self.live.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start `<exe> worker` and send it the request. The stdin pipe stays
    /// open, registered under `id`, until the attempt ends.
    fn spawn(&self, id: u64, payload: &[u8], cancel: &CancelToken) -> Result<Child, AttemptError> {
        let mut live = self.live();
        // checked under the lock so a pool drop never misses a new worker
        if cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }
        let mut child = Command::new(&self.exe)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(payload).and_then(|_| stdin.flush()) {
                Ok(()) => {
                    live.insert(id, (stdin, cancel.clone()));
                }
                // the worker may have died already; its exit status says why
                Err(e) => warn!(error = %e, "could not send job to worker"),
            }
        }
        Ok(child)
    }

    /// Close the worker's stdin. The worker stops its solver and exits.
    fn hang_up(&self, id: u64) {
        self.live().remove(&id);
    }

    fn wait(&self, id: u64, child: &mut Child, cancel: &CancelToken) -> Result<ExitStatus, AttemptError> {
        loop {
            if cancel.is_cancelled() {
                self.hang_up(id);
                self.stop(child);
                return Err(AttemptError::Cancelled);
            }
            if let Some(status) = child.try_wait()? {
                self.hang_up(id);
                return Ok(status);
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn stop(&self, child: &mut Child) {
        let deadline = Instant::now() + self.grace;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => thread::sleep(self.poll_interval),
                _ => break,
            }
        }
        debug!(pid = child.id(), "worker ignored hang-up; killing it");
        if let Err(e) = child.kill() {
            debug!(error = %e, "worker already gone");
        }
        let _ = child.wait();
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

impl AttemptRunner for ProcessRunner {
    fn run(
        &self,
        job: &SynthesisJob,
        cancel: &CancelToken,
    ) -> Result<SynthesisOutcome, AttemptError> {
        let request = WorkerRequest {
            job: job.clone(),
            options: self.options.clone(),
        };
        let mut payload =
            serde_json::to_vec(&request).map_err(|e| AttemptError::Protocol(e.to_string()))?;
        payload.push(b'\n');

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut child = self.spawn(id, &payload, cancel)?;
        debug!(pid = child.id(), degree = job.degree, "spawned worker");
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait(id, &mut child, cancel)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!(degree = job.degree, "worker: {line}");
        }

        match serde_json::from_str::<WorkerReply>(stdout.trim()) {
            Ok(WorkerReply::Outcome { outcome }) => Ok(outcome),
            Ok(WorkerReply::InputError { kind, message }) => {
                Err(AttemptError::Input { kind, message })
            }
            Err(_) if !status.success() => Err(AttemptError::WorkerExit {
                status: status.to_string(),
                stderr,
            }),
            Err(e) => Err(AttemptError::Protocol(e.to_string())),
        }
    }

    fn release_cancelled(&self) {
        self.live().retain(|_, (_, cancel)| !cancel.is_cancelled());
    }
}

/// Result of one pool task.
#[derive(Debug)]
pub struct Completion {
    pub id: usize,
    pub degree: u32,
    pub result: Result<SynthesisOutcome, AttemptError>,
}

/// Caller-side handle of a submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: usize,
    degree: u32,
    cancel: CancelToken,
}

impl TaskHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn degree(&self) -> u32 {
        self.degree
    }

    /// Skip the task if still queued, or ask its runner to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

struct Task {
    id: usize,
    job: SynthesisJob,
    cancel: CancelToken,
}

/// Fixed-size thread pool executing attempts through one runner.
///
/// Dropping the pool closes the queue and lets the runner release every
/// cancelled attempt, without waiting for the threads.
pub struct WorkerPool {
    queue: Option<mpsc::Sender<Task>>,
    runner: Arc<dyn AttemptRunner>,
    completions: mpsc::Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
    next_id: usize,
}

impl WorkerPool {
    pub fn new(size: usize, runner: Arc<dyn AttemptRunner>) -> Result<Self, PoolError> {
        let (queue, tasks) = mpsc::channel::<Task>();
        let (done, completions) = mpsc::channel::<Completion>();
        let tasks = Arc::new(Mutex::new(tasks));
        let mut workers = Vec::with_capacity(size.max(1));
        for i in 0..size.max(1) {
            let tasks = Arc::clone(&tasks);
            let done = done.clone();
            let runner = Arc::clone(&runner);
            let handle = thread::Builder::new()
                .name(format!("palisade-worker-{i}"))
                .spawn(move || worker_loop(&tasks, &done, runner.as_ref()))
                .map_err(PoolError::Spawn)?;
            workers.push(handle);
        }
        Ok(Self {
            queue: Some(queue),
            runner,
            completions,
            workers,
            next_id: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn submit(&mut self, job: SynthesisJob) -> Result<TaskHandle, PoolError> {
        let queue = self.queue.as_ref().ok_or(PoolError::Closed)?;
        let handle = TaskHandle {
            id: self.next_id,
            degree: job.degree,
            cancel: CancelToken::new(),
        };
        self.next_id += 1;
        queue
            .send(Task {
                id: handle.id,
                job,
                cancel: handle.cancel.clone(),
            })
            .map_err(|_| PoolError::Closed)?;
        Ok(handle)
    }

    /// Block until the next task completes. `None` once every worker is gone.
    pub fn recv(&self) -> Option<Completion> {
        self.completions.recv().ok()
    }

    /// Close the queue and wait for every worker to finish.
    pub fn join(mut self) {
        self.queue = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.queue = None;
        self.runner.release_cancelled();
    }
}

fn worker_loop(
    tasks: &Mutex<mpsc::Receiver<Task>>,
    done: &mpsc::Sender<Completion>,
    runner: &dyn AttemptRunner,
) {
    loop {
        let next = {
            let guard = match tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.recv()
        };
        let Ok(task) = next else {
            break;
        };
        let result = if task.cancel.is_cancelled() {
            Err(AttemptError::Cancelled)
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| runner.run(&task.job, &task.cancel))) {
                Ok(result) => result,
                Err(payload) => Err(AttemptError::Panicked(panic_message(payload.as_ref()))),
            }
        };
        let completion = Completion {
            id: task.id,
            degree: task.job.degree,
            result,
        };
        if done.send(completion).is_err() {
            break;
        }
    }
}
