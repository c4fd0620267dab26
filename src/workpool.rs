//! WorkPool (C8): a process-wide cooperative task queue (spec §5).
//!
//! Each task is `FnMut() -> bool`; returning `true` re-enqueues it for another round,
//! `false` drops it. This is how connections get serviced without spawning one OS thread
//! per peer: a fixed pool of worker threads repeatedly pulls one task, runs one round of
//! it, and puts it back if there's more work to do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnMut() -> bool + Send>;

struct Shared {
    queue: Mutex<std::collections::VecDeque<Task>>,
    cond: Condvar,
    done: AtomicBool,
}

/// Set once by `WorkPool::shutdown`; workers and long-running tasks alike should check
/// this instead of looping forever.
static APP_DONE: AtomicBool = AtomicBool::new(false);

pub fn app_done() -> bool {
    APP_DONE.load(Ordering::Relaxed)
}

pub struct WorkPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl WorkPool {
    /// Spawn a pool sized to the machine's available parallelism (falls back to 1).
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_threads(threads)
    }

    pub fn with_threads(threads: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(std::collections::VecDeque::new()),
            cond: Condvar::new(),
            done: AtomicBool::new(false),
        });
        let workers = (0..threads.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("temstream-worker-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("spawn worker thread")
            })
            .collect();
        WorkPool { shared, workers: Mutex::new(workers) }
    }

    /// Enqueue a task. Never blocks.
    pub fn submit<F>(&self, task: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let mut q = self.shared.queue.lock();
        q.push_back(Box::new(task));
        self.shared.cond.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Signal every worker thread and this process's long-running tasks to stop, then
    /// join the workers. Takes `&self` (rather than consuming the pool) so it can be
    /// called through a shared `Arc<WorkPool>` held by still-running tasks.
    pub fn shutdown(&self) {
        APP_DONE.store(true, Ordering::Relaxed);
        self.shared.done.store(true, Ordering::Relaxed);
        self.shared.cond.notify_all();
        for w in self.workers.lock().drain(..) {
            let _ = w.join();
        }
    }
}

impl Default for WorkPool {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let mut task = {
            let mut q = shared.queue.lock();
            loop {
                if let Some(task) = q.pop_front() {
                    break task;
                }
                if shared.done.load(Ordering::Relaxed) {
                    return;
                }
                let timeout = shared
                    .cond
                    .wait_for(&mut q, std::time::Duration::from_millis(200));
                if timeout.timed_out() && shared.done.load(Ordering::Relaxed) {
                    return;
                }
            }
        };
        if shared.done.load(Ordering::Relaxed) {
            return;
        }
        if task() {
            let mut q = shared.queue.lock();
            q.push_back(task);
            shared.cond.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn task_reruns_until_it_returns_false() {
        let pool = WorkPool::with_threads(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.submit(move || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            n < 5
        });
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        pool.shutdown();
    }

    #[test]
    fn submit_does_not_block() {
        let pool = WorkPool::with_threads(1);
        for _ in 0..100 {
            pool.submit(|| false);
        }
        pool.shutdown();
    }
}
