use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error};

use super::ThreadPool;
use crate::{Result, TupleError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A thread pool implemented with a shared job queue.
///
/// This implementation uses the MPMC [`channel`] provided by the crossbeam crate as a single
/// producer, multiple consumer queue: the pool itself sends jobs, its threads receive them.
///
/// If a job panics, the thread that ran it is replaced by a new one, so the pool keeps its
/// size.
///
/// [`channel`]: https://docs.rs/crossbeam/0.8.1/crossbeam/channel/index.html
#[derive(Debug)]
pub struct SharedQueueThreadPool {
    tx: Sender<Job>,
}

impl ThreadPool for SharedQueueThreadPool {
    /// create a new pool with the given number of `threads`, each holding a handle to the
    /// receiving end of the queue
    fn new(threads: u32) -> Result<Self> {
        if threads == 0 {
            return Err(TupleError::StringErr(
                "a shared queue pool needs at least one thread".into(),
            ));
        }
        let (tx, rx) = channel::unbounded::<Job>();
        for _ in 0..threads {
            let task_rx = TaskReceiver(rx.clone());
            thread::Builder::new().spawn(move || run_tasks(task_rx))?;
        }
        debug!("created shared queue pool with {} threads", threads);
        Ok(SharedQueueThreadPool { tx })
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            error!("there are no threads left in the pool, dropping job");
        }
    }
}

/// Receives jobs from the queue and runs them. Dropping it while the thread is panicking
/// starts a replacement thread.
#[derive(Clone, Debug)]
struct TaskReceiver(Receiver<Job>);

impl Drop for TaskReceiver {
    fn drop(&mut self) {
        if thread::panicking() {
            debug!("worker panicked, starting a new thread");
            let task_rx = self.clone();
            if let Err(e) = thread::Builder::new().spawn(move || run_tasks(task_rx)) {
                error!("Failed to spawn a thread: {}", e);
            }
        }
    }
}

fn run_tasks(rx: TaskReceiver) {
    while let Ok(job) = rx.0.recv() {
        job();
    }
    debug!("thread exiting because the pool was dropped");
}
