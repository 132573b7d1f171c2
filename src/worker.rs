//! The capture worker: the single execution context for camera and file I/O.
//!
//! All hardware calls and all file writes of an acquisition run here, in the
//! order they were posted. Shutdown stops intake first, then drains whatever
//! is queued and joins the thread, so no session can be abandoned mid-flight.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::{anyhow, Context, Result};

use crate::error::CaptureError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Strictly FIFO executor with an explicit start/stop contract.
///
/// The threaded backend is what the daemon runs. The inline backend executes
/// each job on the posting thread before `post` returns, which lets tests drive
/// the state machine synchronously.
pub struct CaptureWorker {
    backend: WorkerBackend,
}

enum WorkerBackend {
    Thread(ThreadWorker),
    Inline(InlineWorker),
}

impl CaptureWorker {
    /// Spawn the dedicated worker thread.
    pub fn start(name: &str) -> Result<Self> {
        Ok(Self {
            backend: WorkerBackend::Thread(ThreadWorker::spawn(name)?),
        })
    }

    /// A worker that runs jobs on the caller's thread.
    pub fn inline() -> Self {
        Self {
            backend: WorkerBackend::Inline(InlineWorker {
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Enqueue a job. Fails once shutdown has begun.
    pub fn post<F>(&self, job: F) -> Result<(), CaptureError>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.backend {
            WorkerBackend::Thread(worker) => worker.post(Box::new(job)),
            WorkerBackend::Inline(worker) => worker.run(Box::new(job)),
        }
    }

    /// Enqueue a job and get a receiver for its result.
    pub fn submit<F, T>(&self, job: F) -> Result<Receiver<T>, CaptureError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.post(move || {
            // The caller may have stopped waiting; the result is dropped then.
            let _ = tx.send(job());
        })?;
        Ok(rx)
    }

    /// True when called from the context that executes jobs.
    pub fn is_current(&self) -> bool {
        match &self.backend {
            WorkerBackend::Thread(worker) => worker.thread_id == Some(thread::current().id()),
            WorkerBackend::Inline(_) => true,
        }
    }

    pub fn is_accepting(&self) -> bool {
        match &self.backend {
            WorkerBackend::Thread(worker) => worker.queue_lock().is_some(),
            WorkerBackend::Inline(worker) => worker.accepting.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work, run everything already queued, then join.
    /// Calling it again is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        match &self.backend {
            WorkerBackend::Thread(worker) => worker.shutdown(),
            WorkerBackend::Inline(worker) => {
                worker.accepting.store(false, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("capture worker shutdown failed: {}", err);
        }
    }
}

// ----------------------------------------------------------------------------
// Dedicated thread
// ----------------------------------------------------------------------------

struct ThreadWorker {
    name: String,
    queue: Mutex<Option<Sender<Job>>>,
    join: Mutex<Option<JoinHandle<()>>>,
    thread_id: Option<ThreadId>,
}

impl ThreadWorker {
    fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread_name = name.to_string();
        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_jobs(&thread_name, rx))
            .with_context(|| format!("spawn capture worker '{}'", name))?;
        let thread_id = Some(join.thread().id());
        log::info!("capture worker '{}' started", name);
        Ok(Self {
            name: name.to_string(),
            queue: Mutex::new(Some(tx)),
            join: Mutex::new(Some(join)),
            thread_id,
        })
    }

    fn post(&self, job: Job) -> Result<(), CaptureError> {
        let queue = self.queue_lock();
        let sender = queue.as_ref().ok_or(CaptureError::WorkerStopped)?;
        sender.send(job).map_err(|_| CaptureError::WorkerStopped)
    }

    fn shutdown(&self) -> Result<()> {
        // Dropping the sender closes intake; the thread drains and exits.
        let sender = self.queue_lock().take();
        if sender.is_none() {
            return Ok(());
        }
        drop(sender);
        if self.thread_id == Some(thread::current().id()) {
            // Joining from inside would deadlock; the loop ends after this job.
            return Ok(());
        }
        let join = self
            .join
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(join) = join {
            join.join()
                .map_err(|_| anyhow!("capture worker '{}' panicked", self.name))?;
        }
        log::info!("capture worker '{}' stopped", self.name);
        Ok(())
    }

    fn queue_lock(&self) -> std::sync::MutexGuard<'_, Option<Sender<Job>>> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn run_jobs(name: &str, rx: Receiver<Job>) {
    for job in rx {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!("capture worker '{}': job panicked", name);
        }
    }
}

// ----------------------------------------------------------------------------
// Caller-thread execution for deterministic tests
// ----------------------------------------------------------------------------

struct InlineWorker {
    accepting: AtomicBool,
}

impl InlineWorker {
    fn run(&self, job: Job) -> Result<(), CaptureError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(CaptureError::WorkerStopped);
        }
        job();
        Ok(())
    }
}
