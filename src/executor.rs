// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Where work runs: the executor and scheduler contracts.
//!
//! An [`Executor`] accepts nullary work units and supports a cooperative
//! wait protocol: a thread parked in [`wait_for`][Executor::wait_for] may
//! run other queued work until its [`WaitToken`] is marked complete. A
//! [`Scheduler`] extends that with the ability to resume suspended
//! coroutines and with a hint about whether a freshly started coroutine
//! must hop off the calling thread.
//!
//! Two schedulers are provided: a [`ThreadPool`] whose workers pick up
//! work and resumptions on any thread, and a [`SingleThreadScheduler`]
//! that pins every resumption to one OS thread. Both prefer runnable
//! coroutines over plain work when choosing what to run next.

mod single_thread;
mod thread_pool;

pub use single_thread::SingleThreadScheduler;
pub use thread_pool::ThreadPool;

use crate::coro::RunnableHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// A queued unit of work.
pub type Work = Box<dyn FnOnce() + Send>;

/// Identifies one parked waiter in the cooperative wait protocol.
///
/// Tokens are process-unique and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitToken(u64);

impl WaitToken {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Minimal capability for running work somewhere else.
pub trait Executor: Send + Sync {
    /// Queues a work unit for execution.
    fn enqueue(&self, work: Work);

    /// Marks the waiter identified by `token` as allowed to return.
    fn mark_completed(&self, token: WaitToken);

    /// Blocks until `token` is marked complete.
    ///
    /// Implementations may run queued work and coroutine resumptions on the
    /// calling thread while waiting, so the wait composes with schedulers
    /// that own the current thread.
    fn wait_for(&self, token: WaitToken);
}

/// An [`Executor`] that can also resume suspended coroutines.
pub trait Scheduler: Executor {
    /// Returns true if a coroutine starting under this scheduler must leave
    /// the calling thread before running.
    fn init_switch_thread(&self) -> bool;

    /// Queues a suspended coroutine for resumption.
    ///
    /// `expect_end_soon` hints that the coroutine is likely to finish or
    /// suspend again quickly after this resumption.
    fn mark_runnable(&self, handle: RunnableHandle, expect_end_soon: bool);

    /// A stable address identifying this scheduler in diagnostics.
    fn address(&self) -> usize;
}

/// Whether a coroutine may begin on the calling thread or must start on a
/// scheduler thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    SameThread,
    Parallel,
}

/// A scheduler together with a start mode; the value a coroutine is bound
/// to, and the value awaited to rebind it.
#[derive(Clone)]
pub struct SchedulingInfo {
    scheduler: Arc<dyn Scheduler>,
    start: StartMode,
}

// === impl SchedulingInfo ===

impl SchedulingInfo {
    pub fn new(scheduler: Arc<dyn Scheduler>, start: StartMode) -> Self {
        Self { scheduler, start }
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn start_mode(&self) -> StartMode {
        self.start
    }

    /// The same scheduler with a same-thread start.
    pub fn same_thread(&self) -> Self {
        Self::new(self.scheduler.clone(), StartMode::SameThread)
    }

    /// The same scheduler with a parallel start.
    pub fn parallel(&self) -> Self {
        Self::new(self.scheduler.clone(), StartMode::Parallel)
    }

    /// Returns true if a coroutine adopting this info must leave the
    /// calling thread: either a parallel start was requested or the
    /// scheduler does not accept the current thread.
    pub fn must_hop(&self) -> bool {
        self.start == StartMode::Parallel || self.scheduler.init_switch_thread()
    }
}

impl core::fmt::Debug for SchedulingInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SchedulingInfo")
            .field("scheduler", &self.scheduler.address())
            .field("start", &self.start)
            .finish()
    }
}

/// The process-wide default pool, lazily sized to `available_parallelism()
/// + 1`.
///
/// The same pool backs [`default_executor`] and [`default_scheduler`]; its
/// workers live for the rest of the process. Code that needs deterministic
/// teardown (tests, embedders) should construct its own [`ThreadPool`] and
/// pass it explicitly.
fn default_pool() -> &'static Arc<ThreadPool> {
    static DEFAULT: OnceLock<Arc<ThreadPool>> = OnceLock::new();
    DEFAULT.get_or_init(|| {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            + 1;
        tracing::debug!(threads, "starting default pool");
        Arc::new(ThreadPool::new(threads))
    })
}

/// The default executor for combinators that are not given one.
pub fn default_executor() -> Arc<ThreadPool> {
    default_pool().clone()
}

/// The default scheduler for coroutines that are not bound explicitly.
pub fn default_scheduler() -> Arc<ThreadPool> {
    default_pool().clone()
}

/// Scheduling info for starting a coroutine on the calling thread under the
/// default scheduler.
pub fn default_same_thread_start() -> SchedulingInfo {
    SchedulingInfo::new(default_scheduler(), StartMode::SameThread)
}

/// Scheduling info for starting a coroutine on a default-scheduler worker.
pub fn default_parallel_start() -> SchedulingInfo {
    SchedulingInfo::new(default_scheduler(), StartMode::Parallel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_tokens_are_unique() {
        let a = WaitToken::next();
        let b = WaitToken::next();
        assert_ne!(a, b);
    }

    #[test]
    fn default_pool_is_shared() {
        let a = default_executor();
        let b = default_scheduler();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn start_mode_conversions() {
        let info = default_parallel_start();
        assert_eq!(info.start_mode(), StartMode::Parallel);
        assert_eq!(info.same_thread().start_mode(), StartMode::SameThread);
        assert_eq!(info.same_thread().parallel().start_mode(), StartMode::Parallel);
    }
}
