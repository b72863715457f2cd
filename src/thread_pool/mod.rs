//! Thread pools that run the server's per-connection workers.
//!
//! [`NaiveThreadPool`] starts a fresh thread for every job, which gives the server one worker
//! thread per accepted connection. [`SharedQueueThreadPool`] and [`RayonThreadPool`] reuse a
//! fixed set of threads instead.
use crate::Result;

mod naive;
mod rayon_pool;
mod shared_queue;

pub use self::naive::NaiveThreadPool;
pub use self::rayon_pool::RayonThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;

/// The interface the server uses to hand connections to worker threads.
pub trait ThreadPool: Send + 'static {
    /// Creates a new thread pool, immediately spawning the specified number of threads.
    ///
    /// # Errors
    /// Returns an error if any thread fails to spawn. All previously-spawned threads are
    /// terminated.
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// Spawns a function into the thread pool.
    ///
    /// Spawning always succeeds, but if the function panics the thread pool continues to
    /// operate with the same number of threads.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}
