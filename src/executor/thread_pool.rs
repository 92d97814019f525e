// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::{Executor, Scheduler, SchedulingInfo, StartMode, WaitToken, Work};
use crate::coro::RunnableHandle;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// A fixed-size pool of worker threads serving both roles: plain executor
/// and coroutine scheduler.
///
/// Workers drain runnable coroutines first, then queued work; both queues
/// are FIFO. A thread parked in [`wait_for`][Executor::wait_for] joins the
/// draining on its own thread, so waiting never starves the queues.
/// Coroutines may resume on any worker, so `init_switch_thread` is false.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    queues: Mutex<Queues>,
    cv: Condvar,
}

struct Queues {
    runnable: VecDeque<RunnableHandle>,
    work: VecDeque<Work>,
    finished_waits: HashSet<WaitToken>,
    closed: bool,
}

enum Job {
    Resume(RunnableHandle),
    Run(Work),
}

// === impl Shared ===

impl Shared {
    /// Pops the next job, runnable coroutines first.
    fn next_job(queues: &mut Queues) -> Option<Job> {
        if let Some(handle) = queues.runnable.pop_front() {
            return Some(Job::Resume(handle));
        }
        queues.work.pop_front().map(Job::Run)
    }

    fn run(job: Job) {
        match job {
            Job::Resume(handle) => handle.resume(),
            Job::Run(work) => work(),
        }
    }

    fn worker_loop(&self) {
        let mut queues = self.queues.lock().unwrap();
        loop {
            if let Some(job) = Self::next_job(&mut queues) {
                drop(queues);
                Self::run(job);
                queues = self.queues.lock().unwrap();
            } else if queues.closed {
                return;
            } else {
                queues = self.cv.wait(queues).unwrap();
            }
        }
    }
}

// === impl ThreadPool ===

impl ThreadPool {
    /// Starts a pool with `threads` workers.
    pub fn new(threads: usize) -> Self {
        assert!(threads >= 1, "a pool needs at least one worker");
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues {
                runnable: VecDeque::new(),
                work: VecDeque::new(),
                finished_waits: HashSet::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("pool-worker-{i}"))
                    .spawn(move || shared.worker_loop())
                    .expect("failed to spawn pool worker")
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Flags the pool as closed. Workers drain whatever is still queued
    /// and then exit; `Drop` joins them.
    pub fn close(&self) {
        let mut queues = self.shared.queues.lock().unwrap();
        queues.closed = true;
        self.shared.cv.notify_all();
    }

    /// Scheduling info for starting a coroutine on the calling thread.
    pub fn same_thread_start(self: &Arc<Self>) -> SchedulingInfo {
        SchedulingInfo::new(self.clone(), StartMode::SameThread)
    }

    /// Scheduling info for starting a coroutine on a pool worker.
    pub fn parallel_start(self: &Arc<Self>) -> SchedulingInfo {
        SchedulingInfo::new(self.clone(), StartMode::Parallel)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.close();
        for worker in self.workers.lock().unwrap().drain(..) {
            let _ = worker.join();
        }
    }
}

impl Executor for ThreadPool {
    fn enqueue(&self, work: Work) {
        let mut queues = self.shared.queues.lock().unwrap();
        queues.work.push_back(work);
        self.shared.cv.notify_one();
    }

    fn mark_completed(&self, token: WaitToken) {
        let mut queues = self.shared.queues.lock().unwrap();
        queues.finished_waits.insert(token);
        self.shared.cv.notify_all();
    }

    fn wait_for(&self, token: WaitToken) {
        let mut queues = self.shared.queues.lock().unwrap();
        loop {
            if queues.finished_waits.remove(&token) {
                return;
            }
            if let Some(job) = Shared::next_job(&mut queues) {
                drop(queues);
                Shared::run(job);
                queues = self.shared.queues.lock().unwrap();
            } else {
                queues = self.shared.cv.wait(queues).unwrap();
            }
        }
    }
}

impl Scheduler for ThreadPool {
    fn init_switch_thread(&self) -> bool {
        false
    }

    fn mark_runnable(&self, handle: RunnableHandle, expect_end_soon: bool) {
        tracing::trace!(
            scheduler = self.address(),
            expect_end_soon,
            "coroutine marked runnable"
        );
        let mut queues = self.shared.queues.lock().unwrap();
        queues.runnable.push_back(handle);
        self.shared.cv.notify_one();
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn executes_queued_work() {
        let pool = ThreadPool::new(2);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let count = count.clone();
            pool.enqueue(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 32 {
            assert!(std::time::Instant::now() < deadline, "work never drained");
            std::thread::yield_now();
        }
    }

    #[test]
    fn drop_drains_remaining_work() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(1);
            for _ in 0..8 {
                let count = count.clone();
                pool.enqueue(Box::new(move || {
                    std::thread::sleep(Duration::from_millis(1));
                    count.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn wait_for_runs_work_on_the_calling_thread() {
        let pool = Arc::new(ThreadPool::new(1));
        let token = WaitToken::next();
        let waiter_pool = pool.clone();
        let ran_here = Arc::new(AtomicUsize::new(0));

        let marker = {
            let ran_here = ran_here.clone();
            let caller = std::thread::current().id();
            let pool = pool.clone();
            Box::new(move || {
                if std::thread::current().id() == caller {
                    ran_here.fetch_add(1, Ordering::SeqCst);
                }
                pool.mark_completed(token);
            })
        };

        // Occupy the single worker so the queued marker can only run inside
        // wait_for on this thread.
        let started = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(AtomicUsize::new(0));
        let blocker_started = started.clone();
        let blocker_release = release.clone();
        pool.enqueue(Box::new(move || {
            blocker_started.store(1, Ordering::SeqCst);
            while blocker_release.load(Ordering::SeqCst) == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }));
        while started.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }
        pool.enqueue(marker);
        waiter_pool.wait_for(token);
        release.store(1, Ordering::SeqCst);
        assert_eq!(ran_here.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn never_hops_at_start() {
        let pool = ThreadPool::new(1);
        assert!(!pool.init_switch_thread());
    }
}
