// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::executor::Scheduler;
use crate::failure::Failure;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

/// Not queued anywhere; a wake must queue it.
const IDLE: u8 = 0;
/// Sitting in a scheduler's runnable queue.
const QUEUED: u8 = 1;
/// Being polled right now.
const RUNNING: u8 = 2;
/// Woken while being polled; the driver re-queues after the poll returns.
const NOTIFIED: u8 = 3;
/// The coroutine ran to completion (or aborted); the frame is gone.
const COMPLETE: u8 = 4;

/// The scheduler a coroutine is currently bound to.
///
/// Shared between the task and, for generators, the channel it feeds, so a
/// rebind is observed by both at once.
pub(crate) struct BindingSlot {
    current: Mutex<Arc<dyn Scheduler>>,
}

// === impl BindingSlot ===

impl BindingSlot {
    pub(crate) fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            current: Mutex::new(scheduler),
        }
    }

    pub(crate) fn current(&self) -> Arc<dyn Scheduler> {
        self.current.lock().unwrap().clone()
    }

    pub(crate) fn rebind(&self, scheduler: Arc<dyn Scheduler>) {
        *self.current.lock().unwrap() = scheduler;
    }
}

/// The type-erased driver of one coroutine.
///
/// Owns the coroutine frame (the boxed future), the lifecycle state, the
/// scheduler binding and the abort hook that routes an unhandled panic into
/// whatever the coroutine produces. One erased shape serves every
/// coroutine, so spawning does not monomorphize the schedulers.
struct RawTask {
    frame: Mutex<Option<Pin<Box<dyn std::future::Future<Output = ()> + Send>>>>,
    state: AtomicU8,
    binding: Arc<BindingSlot>,
    /// Resumption hint forwarded to `mark_runnable`; set by awaiters that
    /// expect the coroutine to finish or suspend again quickly.
    end_soon: AtomicBool,
    on_abort: Mutex<Option<Box<dyn FnOnce(Failure) + Send>>>,
}

/// An opaque token for a suspended coroutine that is ready to resume.
///
/// Schedulers queue these and call [`resume`][RunnableHandle::resume] on
/// a thread of their choosing.
#[derive(Clone)]
pub struct RunnableHandle {
    task: Arc<RawTask>,
}

thread_local! {
    /// Stack of coroutines being polled on this thread. A stack rather
    /// than a slot: a cooperative wait inside a poll may resume another
    /// coroutine on the same thread.
    static CURRENT: RefCell<Vec<RunnableHandle>> = const { RefCell::new(Vec::new()) };
}

/// The coroutine currently being polled on this thread, if any.
pub(crate) fn current_task() -> Option<RunnableHandle> {
    CURRENT.with(|stack| stack.borrow().last().cloned())
}

// === impl RunnableHandle ===

impl RunnableHandle {
    pub(crate) fn new(
        frame: Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
        binding: Arc<BindingSlot>,
        on_abort: Box<dyn FnOnce(Failure) + Send>,
    ) -> Self {
        Self {
            task: Arc::new(RawTask {
                frame: Mutex::new(Some(frame)),
                state: AtomicU8::new(IDLE),
                binding,
                end_soon: AtomicBool::new(false),
                on_abort: Mutex::new(Some(on_abort)),
            }),
        }
    }

    pub(crate) fn binding(&self) -> &Arc<BindingSlot> {
        &self.task.binding
    }

    pub(crate) fn set_end_soon(&self, end_soon: bool) {
        self.task.end_soon.store(end_soon, Ordering::Relaxed);
    }

    /// Queues the first resumption instead of polling inline; the eager
    /// start path for coroutines that must hop threads.
    pub(crate) fn start_queued(&self) {
        self.task.state.store(QUEUED, Ordering::Release);
        self.task
            .binding
            .current()
            .mark_runnable(self.clone(), false);
    }

    /// Polls the coroutine once on the calling thread.
    ///
    /// Ready or panicked polls retire the frame; a panic is routed through
    /// the abort hook. A wake that lands mid-poll re-queues the coroutine
    /// on its current binding once the poll returns.
    pub fn resume(&self) {
        let task = &self.task;
        debug_assert_ne!(task.state.load(Ordering::Acquire), RUNNING);
        task.state.store(RUNNING, Ordering::Release);

        let mut frame_slot = task.frame.lock().unwrap();
        let Some(frame) = frame_slot.as_mut() else {
            // A stale wake raced completion; nothing left to run.
            task.state.store(COMPLETE, Ordering::Release);
            return;
        };

        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        let waker = Waker::from(task.clone());
        let mut cx = Context::from_waker(&waker);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| frame.as_mut().poll(&mut cx)));
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });

        match polled {
            Ok(Poll::Pending) => {
                drop(frame_slot);
                // Running -> Idle unless a wake arrived mid-poll, in which
                // case hand the coroutine straight back to its scheduler.
                if task
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    task.state.store(QUEUED, Ordering::Release);
                    let end_soon = task.end_soon.load(Ordering::Relaxed);
                    task.binding.current().mark_runnable(self.clone(), end_soon);
                }
            }
            Ok(Poll::Ready(())) => {
                *frame_slot = None;
                drop(frame_slot);
                task.state.store(COMPLETE, Ordering::Release);
                tracing::trace!(task = ?Arc::as_ptr(task), "coroutine completed");
            }
            Err(payload) => {
                *frame_slot = None;
                drop(frame_slot);
                task.state.store(COMPLETE, Ordering::Release);
                let failure = Failure::from_panic(payload);
                tracing::debug!(task = ?Arc::as_ptr(task), "coroutine aborted by panic");
                if let Some(on_abort) = task.on_abort.lock().unwrap().take() {
                    on_abort(failure);
                }
            }
        }
    }
}

impl Wake for RawTask {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        loop {
            let state = self.state.load(Ordering::Acquire);
            match state {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, QUEUED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        let handle = RunnableHandle { task: self.clone() };
                        let end_soon = self.end_soon.load(Ordering::Relaxed);
                        self.binding.current().mark_runnable(handle, end_soon);
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                // Already queued, notified, or complete: the wake is
                // subsumed.
                _ => return,
            }
        }
    }
}

impl core::fmt::Debug for RunnableHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RunnableHandle")
            .field("task", &Arc::as_ptr(&self.task))
            .field("state", &self.task.state.load(Ordering::Relaxed))
            .finish()
    }
}
