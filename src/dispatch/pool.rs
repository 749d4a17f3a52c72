//! Worker-process pool behind the [`WorkerPool`] seam.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use image::DynamicImage;

use super::wire::{self, Reply, Request, WireError};
use crate::config::OcrSettings;
use crate::types::{PageOutcome, WorkerMode};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("Failed to start worker process: {0}")]
    Spawn(#[source] io::Error),

    #[error("Worker handshake failed: {0}")]
    Handshake(String),

    #[error("Worker process exited unexpectedly")]
    WorkerExited,

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Worker transport error: {0}")]
    Wire(#[from] WireError),
}

/// One image to recognize, addressed by its position in the batch.
#[derive(Clone, Debug)]
pub struct Job {
    pub index: usize,
    pub mode: WorkerMode,
    pub image: DynamicImage,
}

#[derive(Debug)]
pub enum Completion {
    Done { index: usize, outcome: PageOutcome },
    /// The worker ran but recognition itself failed.
    Failed { index: usize, message: String },
}

pub trait WorkerPool {
    fn submit(&mut self, job: Job) -> Result<(), PoolError>;

    /// Next finished job in completion order, `Ok(None)` if nothing finished within `timeout`.
    fn next_completion(&mut self, timeout: Duration) -> Result<Option<Completion>, PoolError>;

    /// Stops all workers, abandoning unfinished jobs.
    fn shutdown(&mut self);
}

pub trait PoolLauncher: Send + Sync {
    fn launch(&self, workers: usize, settings: &OcrSettings) -> Result<Box<dyn WorkerPool>, PoolError>;
}

/// Starts workers as child processes running the hidden `worker` subcommand.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-executes the running binary as `<exe> worker`.
    pub fn current_exe() -> Result<Self, PoolError> {
        let program = std::env::current_exe().map_err(PoolError::Spawn)?;
        Ok(Self::new(program, ["worker"]))
    }
}

impl PoolLauncher for ProcessLauncher {
    fn launch(&self, workers: usize, settings: &OcrSettings) -> Result<Box<dyn WorkerPool>, PoolError> {
        let pool = ProcessPool::spawn(&self.program, &self.args, workers.max(1), settings)?;
        Ok(Box::new(pool))
    }
}

enum WorkerEvent {
    Reply(usize, Reply),
    Broken(usize, String),
    Closed(usize),
}

struct WorkerHandle {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
}

pub struct ProcessPool {
    workers: Vec<WorkerHandle>,
    idle: VecDeque<usize>,
    pending: VecDeque<Job>,
    in_flight: HashMap<usize, usize>,
    events: Receiver<WorkerEvent>,
}

impl ProcessPool {
    fn spawn(
        program: &Path,
        args: &[OsString],
        count: usize,
        settings: &OcrSettings,
    ) -> Result<Self, PoolError> {
        let (sender, events) = mpsc::channel();
        let mut pool = ProcessPool {
            workers: Vec::with_capacity(count),
            idle: VecDeque::with_capacity(count),
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            events,
        };

        for id in 0..count {
            let handle = spawn_worker(id, program, args, sender.clone())?;
            pool.workers.push(handle);
        }
        drop(sender);

        let init = Request::Init {
            settings: settings.clone(),
        };
        for handle in pool.workers.iter_mut() {
            if let Some(stdin) = handle.stdin.as_mut() {
                wire::write_frame(stdin, &init, &[])?;
            }
        }

        pool.await_ready(count)?;
        tracing::debug!("started {} OCR worker processes", count);
        Ok(pool)
    }

    fn await_ready(&mut self, count: usize) -> Result<(), PoolError> {
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        while self.idle.len() < count {
            let wait = deadline.saturating_duration_since(Instant::now());
            let event = match self.events.recv_timeout(wait) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(PoolError::Handshake("timed out waiting for workers".to_string()));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(PoolError::WorkerExited),
            };
            match event {
                WorkerEvent::Reply(id, Reply::Ready { recognizer_available: true }) => {
                    self.idle.push_back(id);
                }
                WorkerEvent::Reply(id, Reply::Ready { recognizer_available: false }) => {
                    return Err(PoolError::Handshake(format!(
                        "worker {} cannot reach the OCR engine",
                        id
                    )));
                }
                WorkerEvent::Reply(id, other) => {
                    return Err(PoolError::Handshake(format!(
                        "worker {} answered {:?} before ready",
                        id, other
                    )));
                }
                WorkerEvent::Broken(id, message) => {
                    return Err(PoolError::Handshake(format!("worker {}: {}", id, message)));
                }
                WorkerEvent::Closed(id) => {
                    return Err(PoolError::Handshake(format!("worker {} exited before ready", id)));
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, worker: usize, job: Job) -> Result<(), PoolError> {
        let body = wire::encode_image(&job.image)?;
        let request = Request::Job {
            index: job.index,
            mode: job.mode,
        };
        let stdin = self
            .workers
            .get_mut(worker)
            .and_then(|handle| handle.stdin.as_mut())
            .ok_or(PoolError::WorkerExited)?;
        wire::write_frame(stdin, &request, &body)?;
        self.in_flight.insert(worker, job.index);
        Ok(())
    }

    fn release(&mut self, worker: usize, index: usize) -> Result<(), PoolError> {
        if self.in_flight.remove(&worker) != Some(index) {
            return Err(PoolError::Protocol(format!(
                "worker {} answered for job {} it was not given",
                worker, index
            )));
        }
        match self.pending.pop_front() {
            Some(job) => self.dispatch(worker, job),
            None => {
                self.idle.push_back(worker);
                Ok(())
            }
        }
    }
}

fn spawn_worker(
    id: usize,
    program: &Path,
    args: &[OsString],
    events: Sender<WorkerEvent>,
) -> Result<WorkerHandle, PoolError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(PoolError::Spawn)?;

    let stdin = child.stdin.take().map(BufWriter::new);
    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill();
        return Err(PoolError::Spawn(io::Error::other("worker stdout not captured")));
    };

    std::thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            let event = match wire::read_frame::<_, Reply>(&mut reader) {
                Ok(Some((reply, _))) => WorkerEvent::Reply(id, reply),
                Ok(None) => WorkerEvent::Closed(id),
                Err(err) => WorkerEvent::Broken(id, err.to_string()),
            };
            let last = !matches!(event, WorkerEvent::Reply(..));
            if events.send(event).is_err() || last {
                break;
            }
        }
    });

    Ok(WorkerHandle { child, stdin })
}

impl WorkerPool for ProcessPool {
    fn submit(&mut self, job: Job) -> Result<(), PoolError> {
        match self.idle.pop_front() {
            Some(worker) => self.dispatch(worker, job),
            None => {
                self.pending.push_back(job);
                Ok(())
            }
        }
    }

    fn next_completion(&mut self, timeout: Duration) -> Result<Option<Completion>, PoolError> {
        let event = match self.events.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => return Err(PoolError::WorkerExited),
        };

        match event {
            WorkerEvent::Reply(worker, Reply::Done { index, record }) => {
                self.release(worker, index)?;
                Ok(Some(Completion::Done {
                    index,
                    outcome: record.into(),
                }))
            }
            WorkerEvent::Reply(worker, Reply::Failed { index, message }) => {
                self.release(worker, index)?;
                Ok(Some(Completion::Failed { index, message }))
            }
            WorkerEvent::Reply(worker, Reply::Ready { .. }) => {
                Err(PoolError::Protocol(format!("worker {} sent a second ready", worker)))
            }
            WorkerEvent::Broken(worker, message) => Err(PoolError::Protocol(format!("worker {}: {}", worker, message))),
            WorkerEvent::Closed(worker) => {
                tracing::warn!("worker {} exited with {} jobs in flight", worker, self.in_flight.len());
                Err(PoolError::WorkerExited)
            }
        }
    }

    fn shutdown(&mut self) {
        for handle in self.workers.iter_mut() {
            handle.stdin.take();
        }
        for mut handle in self.workers.drain(..) {
            let _ = handle.child.kill();
            let _ = handle.child.wait();
        }
        self.idle.clear();
        self.pending.clear();
        self.in_flight.clear();
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
