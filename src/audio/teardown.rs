use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::{
    panic::{self, AssertUnwindSafe},
    thread::{self, JoinHandle},
};
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single worker thread dedicated to closing voice connections.
///
/// Disconnecting may block on the voice transport, so it never runs on the
/// gateway dispatch path. Jobs run in submission order. Failures are the
/// job's business to log; a panicking job is logged here and the worker
/// keeps going. Nothing is retried.
pub struct TeardownExecutor {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TeardownExecutor {
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Job>();

        let worker = thread::Builder::new().name(name.clone()).spawn(move || {
            // Ends once the sender is dropped and every queued job has run.
            for job in receiver {
                run_job(job);
            }
            debug!("Teardown worker drained");
        })?;

        info!("🧵 Teardown executor '{}' started", name);

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues `job` on the worker, or runs it inline once shut down.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);

        let rejected = {
            let sender = self.sender.lock();
            match sender.as_ref() {
                Some(tx) => tx.send(job).err().map(|e| e.into_inner()),
                None => Some(job),
            }
        };

        if let Some(job) = rejected {
            warn!("Teardown executor '{}' is shut down, running job inline", self.name);
            run_job(job);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stops accepting work, runs whatever is still queued and joins the
    /// worker. Only the first call does anything.
    pub fn shutdown(&self) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        drop(sender);

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Teardown worker '{}' terminated abnormally", self.name);
            }
        }

        info!("🧵 Teardown executor '{}' shut down", self.name);
    }
}

impl Drop for TeardownExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Teardown job panicked");
    }
}
