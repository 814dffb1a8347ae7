//! Worker threads for filesystem calls.
//!
//! fuser delivers every request on its single session thread. Each request is
//! a blocking remote call, so [`RpcFs`](crate::RpcFs) packages the work plus
//! its reply into a job and hands it to a [`WorkerPool`]; up to N calls then
//! run at once, one per pooled connection.

use crossbeam_channel::{Sender, bounded};
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queued jobs per worker before `execute` blocks the submitting thread.
const QUEUE_DEPTH_PER_WORKER: usize = 64;

/// A fixed set of named OS threads draining a shared job queue.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one).
    pub fn new(threads: usize) -> io::Result<Self> {
        let threads = threads.max(1);
        let (tx, rx) = bounded::<Job>(threads * QUEUE_DEPTH_PER_WORKER);

        let mut workers = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("rpcfs-worker-{worker_id}"))
                .spawn(move || {
                    debug!(worker_id, "Worker started");
                    for job in rx {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!(worker_id, "Filesystem job panicked");
                        }
                    }
                    debug!(worker_id, "Worker stopped");
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(tx),
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queues `job`, blocking while the queue is full. Runs the job on the
    /// calling thread if the workers are gone.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        let job = match &self.sender {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(rejected) => rejected.into_inner(),
            },
            None => job,
        };
        job();
    }
}

impl Drop for WorkerPool {
    /// Lets queued jobs finish, then joins every worker.
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
    }
}
