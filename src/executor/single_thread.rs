// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::{Executor, Scheduler, SchedulingInfo, StartMode, WaitToken, Work};
use crate::coro::RunnableHandle;
use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::thread::ThreadId;

/// A scheduler bound to one OS thread.
///
/// Work and coroutine resumptions may be queued from anywhere, but they are
/// only ever dispatched on the bound thread, from inside
/// [`wait_for`][Executor::wait_for] or
/// [`run_all_pending`][SingleThreadScheduler::run_all_pending]. A coroutine
/// bound here
/// therefore observes the same thread at every resumption, which is the
/// point: it may touch thread-affine state without further locking.
///
/// `init_switch_thread` reports whether the caller is off the bound thread,
/// which makes a freshly bound coroutine hop exactly when it has to.
pub struct SingleThreadScheduler {
    thread_id: ThreadId,
    queues: Mutex<Queues>,
    cv: Condvar,
}

struct Queues {
    runnable: VecDeque<RunnableHandle>,
    work: VecDeque<Work>,
    finished_waits: HashSet<WaitToken>,
}

enum Job {
    Resume(RunnableHandle),
    Run(Work),
}

// === impl SingleThreadScheduler ===

impl SingleThreadScheduler {
    /// Binds a scheduler to the calling thread.
    pub fn new() -> std::sync::Arc<Self> {
        Self::for_thread(std::thread::current().id())
    }

    /// Binds a scheduler to the given thread, which is expected to drive it
    /// through `wait_for` or `run_all_pending`.
    pub fn for_thread(thread_id: ThreadId) -> std::sync::Arc<Self> {
        tracing::debug!(?thread_id, "binding single-thread scheduler");
        std::sync::Arc::new(Self {
            thread_id,
            queues: Mutex::new(Queues {
                runnable: VecDeque::new(),
                work: VecDeque::new(),
                finished_waits: HashSet::new(),
            }),
            cv: Condvar::new(),
        })
    }

    /// The thread every resumption is pinned to.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    fn on_bound_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    fn next_job(queues: &mut Queues) -> Option<Job> {
        if let Some(handle) = queues.runnable.pop_front() {
            return Some(Job::Resume(handle));
        }
        queues.work.pop_front().map(Job::Run)
    }

    /// Drains both queues on the bound thread without blocking.
    ///
    /// Called off the bound thread this does nothing; the queues stay put
    /// for their owner.
    pub fn run_all_pending(&self) {
        if !self.on_bound_thread() {
            tracing::debug!(
                scheduler = self.address(),
                "run_all_pending called off the bound thread"
            );
            return;
        }
        let mut queues = self.queues.lock().unwrap();
        while let Some(job) = Self::next_job(&mut queues) {
            drop(queues);
            match job {
                Job::Resume(handle) => handle.resume(),
                Job::Run(work) => work(),
            }
            queues = self.queues.lock().unwrap();
        }
    }

    /// Scheduling info for starting a coroutine without a forced hop.
    pub fn same_thread_start(self: &std::sync::Arc<Self>) -> SchedulingInfo {
        SchedulingInfo::new(self.clone(), StartMode::SameThread)
    }

    /// Scheduling info that forces the coroutine onto the bound thread
    /// before it runs.
    pub fn parallel_start(self: &std::sync::Arc<Self>) -> SchedulingInfo {
        SchedulingInfo::new(self.clone(), StartMode::Parallel)
    }
}

impl Executor for SingleThreadScheduler {
    fn enqueue(&self, work: Work) {
        let mut queues = self.queues.lock().unwrap();
        queues.work.push_back(work);
        self.cv.notify_all();
    }

    fn mark_completed(&self, token: WaitToken) {
        let mut queues = self.queues.lock().unwrap();
        queues.finished_waits.insert(token);
        self.cv.notify_all();
    }

    /// On the bound thread: run pending resumptions and work until the
    /// token arrives. Anywhere else: a plain blocking wait, since the
    /// queues belong to the bound thread.
    fn wait_for(&self, token: WaitToken) {
        let cooperative = self.on_bound_thread();
        let mut queues = self.queues.lock().unwrap();
        loop {
            if queues.finished_waits.remove(&token) {
                return;
            }
            if cooperative {
                if let Some(job) = Self::next_job(&mut queues) {
                    drop(queues);
                    match job {
                        Job::Resume(handle) => handle.resume(),
                        Job::Run(work) => work(),
                    }
                    queues = self.queues.lock().unwrap();
                    continue;
                }
            }
            queues = self.cv.wait(queues).unwrap();
        }
    }
}

impl Scheduler for SingleThreadScheduler {
    fn init_switch_thread(&self) -> bool {
        !self.on_bound_thread()
    }

    fn mark_runnable(&self, handle: RunnableHandle, expect_end_soon: bool) {
        tracing::trace!(
            scheduler = self.address(),
            expect_end_soon,
            "coroutine marked runnable"
        );
        let mut queues = self.queues.lock().unwrap();
        queues.runnable.push_back(handle);
        self.cv.notify_all();
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn hop_needed_only_off_thread() {
        let here = SingleThreadScheduler::new();
        assert!(!here.init_switch_thread());

        let elsewhere = here.clone();
        std::thread::spawn(move || {
            assert!(elsewhere.init_switch_thread());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn run_all_pending_drains_on_bound_thread() {
        let sched = SingleThreadScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let count = count.clone();
            sched.enqueue(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        sched.run_all_pending();
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn run_all_pending_is_inert_off_thread() {
        let sched = SingleThreadScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        sched.enqueue(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let remote = sched.clone();
        std::thread::spawn(move || remote.run_all_pending())
            .join()
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sched.run_all_pending();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_for_runs_pending_work_cooperatively() {
        let sched = SingleThreadScheduler::new();
        let token = WaitToken::next();
        let marker = sched.clone();
        sched.enqueue(Box::new(move || marker.mark_completed(token)));
        sched.wait_for(token);
    }

    #[test]
    fn wait_for_blocks_purely_off_thread() {
        let sched = SingleThreadScheduler::new();
        let token = WaitToken::next();
        let remote = sched.clone();
        let waiter = std::thread::spawn(move || remote.wait_for(token));
        std::thread::sleep(std::time::Duration::from_millis(10));
        sched.mark_completed(token);
        waiter.join().unwrap();
    }
}
