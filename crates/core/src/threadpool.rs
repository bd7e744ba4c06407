use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    /// Identifies the pool (if any) whose worker loop is currently
    /// running on this OS thread, so `enqueue` can detect re-entrant
    /// submission and avoid deadlocking against itself.
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    producer_cv: Condvar,
    worker_cv: Condvar,
    high_water_mark: usize,
    shutting_down: Mutex<bool>,
}

/// Bounded worker pool used for remote-backend writes, recompression,
/// and statistics aggregation. A task enqueued from one of the pool's
/// own worker threads while the queue is full runs inline instead of
/// blocking, since blocking there could deadlock a pool against itself.
/// Task panics/failures are caught and logged, never propagated into the
/// worker loop.
pub struct ThreadPool {
    shared: Arc<Shared>,
    identity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(num_threads: usize, high_water_mark: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            producer_cv: Condvar::new(),
            worker_cv: Condvar::new(),
            high_water_mark,
            shutting_down: Mutex::new(false),
        });
        // Any non-zero, pool-unique value works as the re-entrancy
        // marker; the Arc's pointer address is convenient and stable for
        // the pool's lifetime.
        let identity = Arc::as_ptr(&shared) as usize;

        let mut workers = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let worker_shared = Arc::clone(&shared);
            workers.push(std::thread::spawn(move || {
                CURRENT_POOL.with(|cell| cell.set(identity));
                Self::worker_main(worker_shared);
            }));
        }

        ThreadPool {
            shared,
            identity,
            workers,
        }
    }

    fn worker_main(shared: Arc<Shared>) {
        loop {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if *shared.shutting_down.lock().unwrap() && queue.is_empty() {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    shared.producer_cv.notify_one();
                    drop(queue);
                    Self::run_task(task);
                    break;
                }
                queue = shared.worker_cv.wait(queue).unwrap();
            }
        }
    }

    fn run_task(task: Task) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
        if let Err(panic) = result {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("worker pool task failed: {message}");
        }
    }

    /// Runs `task` on the pool. Blocks if the queue is at capacity,
    /// unless called from one of this pool's own worker threads, in
    /// which case a full queue causes `task` to run inline.
    pub fn enqueue<F: FnOnce() + Send + 'static>(&self, task: F) {
        let on_own_worker = CURRENT_POOL.with(|cell| cell.get() == self.identity);
        let task: Task = Box::new(task);

        let mut queue = self.shared.queue.lock().unwrap();
        if queue.len() >= self.shared.high_water_mark {
            if on_own_worker {
                drop(queue);
                Self::run_task(task);
                return;
            }
            while queue.len() >= self.shared.high_water_mark {
                queue = self.shared.producer_cv.wait(queue).unwrap();
            }
        }
        queue.push_back(task);
        self.shared.worker_cv.notify_one();
    }

    pub fn shut_down(&mut self) {
        *self.shared.shutting_down.lock().unwrap() = true;
        self.shared.worker_cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shut_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tasks_run_and_complete() {
        let pool = ThreadPool::new(2, 8);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn panicking_task_does_not_poison_the_pool() {
        let pool = ThreadPool::new(1, 4);
        pool.enqueue(|| panic!("boom"));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        pool.enqueue(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_enqueue_on_full_queue_runs_inline() {
        let pool = Arc::new(ThreadPool::new(1, 1));
        let inner = Arc::clone(&pool);
        let ran_inline = Arc::new(AtomicUsize::new(0));
        let ran_inline2 = Arc::clone(&ran_inline);

        pool.enqueue(move || {
            // Saturate the queue from inside a worker, then try to
            // enqueue again: without inline execution this would
            // deadlock the single worker against itself.
            inner.enqueue(move || {
                ran_inline2.fetch_add(1, Ordering::SeqCst);
            });
        });

        std::thread::sleep(std::time::Duration::from_millis(200));
        assert_eq!(ran_inline.load(Ordering::SeqCst), 1);
    }
}
