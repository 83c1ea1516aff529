//! Background worker pool
//!
//! A fixed set of threads draining one FIFO of closures. `schedule` is the
//! pool's only form of backpressure: it blocks once the number of enqueued
//! plus executing jobs reaches the flow limit, and resumes when completions
//! bring it back under. `wait_for_completion` bridges state transitions and
//! codec reconfiguration over in-flight jobs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

/// Blocking threshold for `schedule`.
pub const MAX_ACTIVE_JOBS: usize = 70;

type Job = Box<dyn FnOnce() + Send>;

struct PoolState {
    jobs: VecDeque<Job>,
    /// Enqueued plus executing jobs.
    active: usize,
    stopping: bool,
}

struct Inner {
    state: Mutex<PoolState>,
    cv: Condvar,
}

pub struct WorkerPool {
    inner: Arc<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(PoolState {
                jobs: VecDeque::new(),
                active: 0,
                stopping: false,
            }),
            cv: Condvar::new(),
        });

        let handles = (0..threads.max(1))
            .map(|id| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("sona-worker-{id}"))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            inner,
            handles: Mutex::new(handles),
        }
    }

    /// Append a job, blocking while the pool is at its flow limit.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        while state.active >= MAX_ACTIVE_JOBS && !state.stopping {
            tracing::warn!(active = state.active, "worker pool full, waiting for space");
            self.inner.cv.wait(&mut state);
        }
        if state.stopping {
            return;
        }
        state.active += 1;
        state.jobs.push_back(Box::new(job));
        self.inner.cv.notify_all();
    }

    /// Block until the queue is empty and every job has finished.
    pub fn wait_for_completion(&self) {
        let mut state = self.inner.state.lock();
        while (!state.jobs.is_empty() || state.active > 0) && !state.stopping {
            self.inner.cv.wait(&mut state);
        }
    }

    /// Enqueued plus executing jobs.
    pub fn active_jobs(&self) -> usize {
        self.inner.state.lock().active
    }
}

fn worker_loop(inner: &Inner) {
    loop {
        let job = {
            let mut state = inner.state.lock();
            loop {
                if state.stopping {
                    return;
                }
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                inner.cv.wait(&mut state);
            }
        };

        job();

        let mut state = inner.state.lock();
        state.active -= 1;
        drop(state);
        inner.cv.notify_all();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.stopping = true;
        }
        self.inner.cv.notify_all();
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}
