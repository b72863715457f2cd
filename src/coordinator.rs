//! Coordination of storage operations between the accept loop and the worker threads.
//!
//! In [`Coordination::SingleFlight`] mode a pending-request flag, guarded by a mutex and a
//! condition variable, hands control back and forth: the accept loop spawns a worker and then
//! blocks until that worker has finished its storage operation and raised the flag. The
//! accept loop clears the flag and accepts the next connection. Storage operations therefore
//! never overlap and run in the order connections were accepted, while sending a response
//! still overlaps with accepting the next connection.
//!
//! In [`Coordination::PerKey`] mode the accept loop never waits. Each storage operation holds
//! a lock for its key instead, and INIT holds a gate that excludes every other operation.
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::trace;

use crate::config::Coordination;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// the pending-request flag and its condition variable
#[derive(Debug, Default)]
struct Handoff {
    processed: Mutex<bool>,
    cond: Condvar,
}

impl Handoff {
    fn signal(&self) {
        let mut processed = lock(&self.processed);
        *processed = true;
        self.cond.notify_one();
    }

    fn wait(&self) {
        let mut processed = lock(&self.processed);
        while !*processed {
            processed = self
                .cond
                .wait(processed)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *processed = false;
    }
}

/// per-key mutexes plus a gate that INIT takes exclusively
#[derive(Debug, Default)]
struct KeyLocks {
    gate: RwLock<()>,
    keys: DashMap<i32, Arc<Mutex<()>>>,
}

impl KeyLocks {
    fn run<T, F: FnOnce() -> T>(&self, key: Option<i32>, op: F) -> T {
        let key = match key {
            Some(key) => key,
            None => {
                let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
                return op();
            }
        };

        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        // the map's shard lock is released at the end of this statement
        let key_lock = Arc::clone(self.keys.entry(key).or_default().value());
        let result = {
            let _guard = lock(&key_lock);
            op()
        };
        drop(key_lock);
        // nobody else holds a handle to the lock: forget it
        self.keys.remove_if(&key, |_, l| Arc::strong_count(l) == 1);
        result
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    SingleFlight(Arc<Handoff>),
    PerKey(Arc<KeyLocks>),
}

/// Shared by the accept loop and all workers of one server.
#[derive(Debug, Clone)]
pub struct Coordinator {
    strategy: Strategy,
}

impl Coordinator {
    /// creates a coordinator for the given mode
    pub fn new(mode: Coordination) -> Self {
        let strategy = match mode {
            Coordination::SingleFlight => Strategy::SingleFlight(Arc::default()),
            Coordination::PerKey => Strategy::PerKey(Arc::default()),
        };
        Coordinator { strategy }
    }

    /// the mode this coordinator implements
    pub fn mode(&self) -> Coordination {
        match self.strategy {
            Strategy::SingleFlight(_) => Coordination::SingleFlight,
            Strategy::PerKey(_) => Coordination::PerKey,
        }
    }

    /// issues the ticket for a freshly accepted connection; the worker serving the
    /// connection runs its storage operation through it
    pub fn ticket(&self) -> Ticket {
        Ticket {
            strategy: self.strategy.clone(),
            released: false,
        }
    }

    /// called by the accept loop after handing a connection to a worker. In single-flight
    /// mode this blocks until the worker's ticket has been released, then clears the flag.
    pub fn await_handoff(&self) {
        if let Strategy::SingleFlight(handoff) = &self.strategy {
            trace!("waiting for the worker's storage operation");
            handoff.wait();
        }
    }
}

/// A worker's permission to run one storage operation.
///
/// In single-flight mode the ticket is released right after the storage operation returns,
/// or when it is dropped, whichever comes first; a worker that never reaches the storage
/// operation (a failed read, a malformed request, a panic) therefore still lets the accept
/// loop move on.
#[derive(Debug)]
pub struct Ticket {
    strategy: Strategy,
    released: bool,
}

impl Ticket {
    /// runs the storage operation `op` for `key` (`None` for operations touching every key)
    pub fn run<T, F: FnOnce() -> T>(&mut self, key: Option<i32>, op: F) -> T {
        if let Strategy::PerKey(locks) = &self.strategy {
            return locks.run(key, op);
        }
        let result = op();
        self.release();
        result
    }

    /// releases the ticket without running a storage operation
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Strategy::SingleFlight(handoff) = &self.strategy {
            handoff.signal();
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use crossbeam::channel::{bounded, Receiver, Sender};

    use super::*;

    #[test]
    fn accept_loop_waits_for_the_storage_operation() {
        let coordinator = Coordinator::new(Coordination::SingleFlight);
        let done = Arc::new(AtomicUsize::new(0));

        let mut ticket = coordinator.ticket();
        let worker_done = Arc::clone(&done);
        let worker = thread::spawn(move || {
            ticket.run(Some(1), || {
                thread::sleep(Duration::from_millis(50));
                worker_done.store(1, Ordering::SeqCst);
            });
            // the response is sent after the flag was raised
            thread::sleep(Duration::from_millis(50));
        });

        coordinator.await_handoff();
        assert_eq!(done.load(Ordering::SeqCst), 1);
        worker.join().unwrap();
    }

    #[test]
    fn dropped_tickets_release_the_accept_loop() {
        let coordinator = Coordinator::new(Coordination::SingleFlight);
        let ticket = coordinator.ticket();
        thread::spawn(move || drop(ticket)).join().unwrap();
        coordinator.await_handoff();

        // the flag was cleared, a second release is needed for the next wait
        let mut ticket = coordinator.ticket();
        ticket.release();
        ticket.release();
        drop(ticket);
        coordinator.await_handoff();
    }

    #[test]
    fn per_key_mode_serializes_a_key() {
        let coordinator = Coordinator::new(Coordination::PerKey);
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let mut ticket = coordinator.ticket();
                let running = Arc::clone(&running);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    ticket.run(Some(7), || {
                        if running.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(5));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        // never blocks in per-key mode
        coordinator.await_handoff();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        match &coordinator.strategy {
            Strategy::PerKey(locks) => assert!(locks.keys.is_empty()),
            Strategy::SingleFlight(_) => unreachable!(),
        }
    }

    /// runs `op` through a fresh ticket on another thread; `entered` fires once `op` starts
    /// and `op` then blocks until `leave` fires
    fn hold(
        coordinator: &Coordinator,
        key: Option<i32>,
    ) -> (Receiver<()>, Sender<()>, thread::JoinHandle<()>) {
        let (entered_tx, entered) = bounded(1);
        let (leave, leave_rx) = bounded::<()>(1);
        let mut ticket = coordinator.ticket();
        let handle = thread::spawn(move || {
            ticket.run(key, || {
                entered_tx.send(()).unwrap();
                leave_rx.recv().unwrap();
            })
        });
        (entered, leave, handle)
    }

    const SETTLE: Duration = Duration::from_millis(100);

    #[test]
    fn per_key_init_waits_for_keyed_operations() {
        let coordinator = Coordinator::new(Coordination::PerKey);
        let (keyed_entered, keyed_leave, keyed) = hold(&coordinator, Some(3));
        keyed_entered.recv().unwrap();

        let (init_entered, init_leave, init) = hold(&coordinator, None);
        assert!(init_entered.recv_timeout(SETTLE).is_err());

        keyed_leave.send(()).unwrap();
        keyed.join().unwrap();
        init_entered.recv_timeout(Duration::from_secs(5)).unwrap();
        init_leave.send(()).unwrap();
        init.join().unwrap();
    }

    #[test]
    fn per_key_init_blocks_new_keyed_operations() {
        let coordinator = Coordinator::new(Coordination::PerKey);
        let (init_entered, init_leave, init) = hold(&coordinator, None);
        init_entered.recv().unwrap();

        let (first_entered, first_leave, first) = hold(&coordinator, Some(1));
        let (second_entered, second_leave, second) = hold(&coordinator, Some(2));
        assert!(first_entered.recv_timeout(SETTLE).is_err());
        assert!(second_entered.try_recv().is_err());

        init_leave.send(()).unwrap();
        init.join().unwrap();
        // different keys run side by side once the gate is open
        first_entered.recv_timeout(Duration::from_secs(5)).unwrap();
        second_entered.recv_timeout(Duration::from_secs(5)).unwrap();
        first_leave.send(()).unwrap();
        second_leave.send(()).unwrap();
        first.join().unwrap();
        second.join().unwrap();
    }

    #[test]
    fn mode_round_trips() {
        assert_eq!(
            Coordinator::new(Coordination::PerKey).mode(),
            Coordination::PerKey
        );
        assert_eq!(
            Coordinator::new(Coordination::SingleFlight).mode(),
            Coordination::SingleFlight
        );
    }
}
