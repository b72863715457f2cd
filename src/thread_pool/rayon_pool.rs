use tracing::{debug, error};

use super::ThreadPool;
use crate::{Result, TupleError};

/// A thread pool that uses a work stealing strategy as implemented by the [`Rayon`] library.
///
/// [`Rayon`]: https://docs.rs/rayon/latest/rayon/index.html
#[derive(Debug)]
pub struct RayonThreadPool {
    pool: rayon::ThreadPool,
}

impl ThreadPool for RayonThreadPool {
    fn new(threads: u32) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads as usize)
            .thread_name(|i| format!("tuple-rayon-{}", i))
            // without a handler a panicking job aborts the process
            .panic_handler(|_| error!("a job panicked in the rayon pool"))
            .build()
            .map_err(|e| TupleError::StringErr(format!("could not build thread pool: {:?}", e)))?;
        debug!("created rayon thread pool with {} threads", threads);

        Ok(Self { pool })
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // spawn, not install: the accept loop must not block on the job
        self.pool.spawn(job);
    }
}
