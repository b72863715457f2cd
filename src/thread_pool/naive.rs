use std::thread;

use tracing::error;

use super::ThreadPool;
use crate::Result;

/// a "pool" that is not actually a pool: it starts a new, detached thread for every job,
/// so the server runs one worker thread per accepted connection
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveThreadPool;

impl ThreadPool for NaiveThreadPool {
    fn new(_threads: u32) -> Result<Self> {
        Ok(NaiveThreadPool)
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = thread::Builder::new().name("tuple-worker".into()).spawn(job) {
            error!("failed to spawn a worker thread: {}", e);
        }
    }
}
