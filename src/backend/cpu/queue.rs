//! In-order command queue for the CPU backend
//!
//! One worker thread per session drains launches in FIFO order, which gives
//! CPU launches the same ordering contract as a GPU stream. Each launch runs
//! inside the session's rayon pool so kernels can fan out with
//! [`parallel_for`](super::parallel_for).

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::{AotForgeError, ForgeResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default)]
struct QueueState {
    pending: usize,
    first_failure: Option<String>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    drained: Condvar,
}

/// FIFO launch queue backed by a single worker thread
#[derive(Debug)]
pub struct CommandQueue {
    sender: Mutex<Option<Sender<Job>>>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    num_threads: usize,
}

impl CommandQueue {
    /// Spawn the worker and its kernel thread pool (`None` = one thread per core)
    pub fn new(max_threads: Option<usize>) -> ForgeResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_threads.unwrap_or(0))
            .thread_name(|i| format!("aotforge-cpu-{}", i))
            .build()
            .map_err(|e| AotForgeError::DeviceError(format!("failed to build CPU thread pool: {}", e)))?;
        let num_threads = pool.current_num_threads();

        let (sender, receiver) = mpsc::channel::<Job>();
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);

        let worker = std::thread::Builder::new()
            .name("aotforge-cpu-queue".to_string())
            .spawn(move || {
                for job in receiver {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| pool.install(job)));
                    let mut state = match worker_shared.state.lock() {
                        Ok(state) => state,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if let Err(payload) = outcome {
                        let message = panic_message(payload.as_ref());
                        tracing::error!("CPU kernel panicked: {}", message);
                        state.first_failure.get_or_insert(message);
                    }
                    state.pending -= 1;
                    if state.pending == 0 {
                        worker_shared.drained.notify_all();
                    }
                }
            })
            .map_err(|e| AotForgeError::DeviceError(format!("failed to spawn CPU queue: {}", e)))?;

        tracing::debug!("CommandQueue::new: worker started with {} kernel threads", num_threads);
        Ok(CommandQueue {
            sender: Mutex::new(Some(sender)),
            shared,
            worker: Mutex::new(Some(worker)),
            num_threads,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Append a job; returns as soon as it is queued
    pub fn enqueue<F>(&self, job: F) -> ForgeResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock()?;
        let sender = sender
            .as_ref()
            .ok_or_else(|| AotForgeError::DeviceError("CPU queue is shut down".to_string()))?;

        self.shared.state.lock()?.pending += 1;
        if sender.send(Box::new(job)).is_err() {
            let mut state = self.shared.state.lock()?;
            state.pending -= 1;
            if state.pending == 0 {
                self.shared.drained.notify_all();
            }
            return Err(AotForgeError::DeviceError(
                "CPU queue worker has exited".to_string(),
            ));
        }
        Ok(())
    }

    /// Block until the queue is empty.
    ///
    /// The first kernel panic since the previous call is reported (once) as
    /// `KernelLaunchFailed`; later launches still ran.
    pub fn synchronize(&self) -> ForgeResult<()> {
        let mut state = self.shared.state.lock()?;
        while state.pending > 0 {
            state = self.shared.drained.wait(state)?;
        }
        match state.first_failure.take() {
            Some(message) => Err(AotForgeError::KernelLaunchFailed(message)),
            None => Ok(()),
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().map(|s| s.pending).unwrap_or(0)
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish queued jobs and exit.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                if handle.join().is_err() {
                    tracing::warn!("CPU queue worker terminated abnormally");
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "kernel panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jobs_run_in_fifo_order() {
        let queue = CommandQueue::new(Some(2)).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..32 {
            let log = Arc::clone(&log);
            queue
                .enqueue(move || {
                    log.lock().unwrap().push(i);
                })
                .unwrap();
        }
        queue.synchronize().unwrap();
        assert_eq!(*log.lock().unwrap(), (0..32).collect::<Vec<_>>());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_synchronize_on_idle_queue() {
        let queue = CommandQueue::new(Some(1)).unwrap();
        queue.synchronize().unwrap();
        queue.synchronize().unwrap();
        assert_eq!(queue.num_threads(), 1);
    }

    #[test]
    fn test_panic_is_reported_once_and_queue_survives() {
        let queue = CommandQueue::new(Some(1)).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        queue.enqueue(|| panic!("bad kernel")).unwrap();
        let counter = Arc::clone(&ran);
        queue
            .enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let err = queue.synchronize().unwrap_err();
        assert!(matches!(err, AotForgeError::KernelLaunchFailed(ref m) if m.contains("bad kernel")));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        queue.synchronize().unwrap();
    }

    #[test]
    fn test_drop_drains_queue() {
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let queue = CommandQueue::new(Some(1)).unwrap();
            for _ in 0..8 {
                let counter = Arc::clone(&ran);
                queue
                    .enqueue(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            }
        }
        assert_eq!(ran.load(Ordering::SeqCst), 8);
    }
}
