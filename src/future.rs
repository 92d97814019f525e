// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Eagerly-completed futures and their producer side.
//!
//! The core object is a reference-counted completion cell holding one of
//! three states: pending, completed with a value, or failed with a
//! [`Failure`]. A [`Promise`] is the writer view, a [`Future`] the reader
//! view; both are handles onto the same cell and any number of clones may
//! coexist.
//!
//! Unlike `std`'s poll-driven futures, completion here is *pushed*: the
//! thread that resolves the cell runs the registered callback chain in
//! registration order before returning. Combinators (see [`combine`]) build
//! entire dataflow graphs out of this single primitive by registering
//! callbacks that enqueue continuations onto an [`Executor`].
//!
//! [`Executor`]: crate::executor::Executor

mod combine;
mod waiter;

pub use combine::{
    completed_future, execute_async_loop, execute_async_loop_on, failed_future, run_async,
    run_async_on, when_all, when_all_from_futures, when_all_from_futures_on, when_all_on,
    when_all_vec, when_all_vec_on, JoinFutures, JoinValues,
};
pub use waiter::FutureWaiter;

use crate::executor::{Executor, WaitToken};
use crate::failure::Failure;
use core::fmt;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

pub(crate) type Callback = Box<dyn FnOnce() + Send>;

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const FAILED: u8 = 2;

/// The shared completion cell behind a [`Promise`]/[`Future`] pair.
///
/// The value and error slots are written exactly once, before the `state`
/// store with `Release` ordering; readers only touch a slot after loading a
/// non-pending `state` with `Acquire`. The `claimed` flag makes the writer
/// unique, so slot accesses never race.
pub(crate) struct Inner<T> {
    state: AtomicU8,
    claimed: AtomicBool,
    value: UnsafeCell<Option<T>>,
    error: UnsafeCell<Option<Failure>>,
    chain: Mutex<Vec<Callback>>,
    cv: Condvar,
}

// Safety: `value`/`error` are written once by the unique claiming thread and
// only read after the `Release`/`Acquire` handshake on `state`, so moving the
// cell between threads needs `T: Send` and sharing it needs `T: Sync` for
// the `&T` handed out by `get`.
unsafe impl<T: Send> Send for Inner<T> {}
// Safety: see above.
unsafe impl<T: Send + Sync> Sync for Inner<T> {}

// === impl Inner ===

impl<T> Inner<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            claimed: AtomicBool::new(false),
            value: UnsafeCell::new(None),
            error: UnsafeCell::new(None),
            chain: Mutex::new(Vec::new()),
            cv: Condvar::new(),
        }
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Resolves the cell, returning false if it was already resolved.
    ///
    /// On success the callback chain is drained, in registration order, on
    /// the calling thread, with the cell lock released.
    pub(crate) fn try_resolve(&self, result: Result<T, Failure>) -> bool {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let state = match result {
            Ok(value) => {
                // Safety: the `claimed` swap above made this thread the
                // unique writer, and no reader looks at the slot before the
                // `Release` store below.
                unsafe { *self.value.get() = Some(value) };
                COMPLETED
            }
            Err(failure) => {
                // Safety: as above.
                unsafe { *self.error.get() = Some(failure) };
                FAILED
            }
        };

        let callbacks = {
            let mut chain = self.chain.lock().unwrap();
            self.state.store(state, Ordering::Release);
            self.cv.notify_all();
            core::mem::take(&mut *chain)
        };

        tracing::trace!(
            cell = ?(self as *const Self),
            failed = state == FAILED,
            callbacks = callbacks.len(),
            "cell resolved"
        );
        for callback in callbacks {
            callback();
        }
        true
    }

    pub(crate) fn resolve(&self, result: Result<T, Failure>) {
        assert!(self.try_resolve(result), "completion cell resolved twice");
    }

    pub(crate) fn wait(&self) {
        if self.state() != PENDING {
            return;
        }
        let mut chain = self.chain.lock().unwrap();
        while self.state() == PENDING {
            chain = self.cv.wait(chain).unwrap();
        }
    }

    /// Waits, then returns the stored value or re-raises the stored failure.
    pub(crate) fn get(&self) -> &T {
        self.wait();
        match self.state() {
            // Safety: state is `COMPLETED`, so the unique writer published
            // the slot before the `Release` store and nothing writes again.
            COMPLETED => unsafe { (*self.value.get()).as_ref().unwrap() },
            _ => self.failure().unwrap().raise(),
        }
    }

    /// Waits, then returns the stored failure, if any. Does not wait when
    /// already resolved.
    pub(crate) fn error(&self) -> Option<Failure> {
        self.wait();
        self.failure()
    }

    fn failure(&self) -> Option<Failure> {
        if self.state() == FAILED {
            // Safety: state is `FAILED`, published like the value slot.
            unsafe { (*self.error.get()).clone() }
        } else {
            None
        }
    }

    /// Registers a callback to run once the cell resolves.
    ///
    /// If the cell is already resolved the callback runs on the calling
    /// thread before this returns; otherwise it joins the chain and runs on
    /// the resolving thread. Either way it runs exactly once.
    pub(crate) fn add_callback(&self, callback: Callback) {
        {
            let mut chain = self.chain.lock().unwrap();
            if self.state() == PENDING {
                chain.push(callback);
                return;
            }
        }
        callback();
    }
}

/// Object-safe view of a cell with the value type erased.
pub(crate) trait CellBase: Send + Sync {
    fn state_flag(&self) -> u8;
    fn wait_done(&self);
    fn add_callback_erased(&self, callback: Callback);
    fn stored_failure(&self) -> Option<Failure>;
}

impl<T: Send + Sync> CellBase for Inner<T> {
    fn state_flag(&self) -> u8 {
        self.state()
    }
    fn wait_done(&self) {
        self.wait();
    }
    fn add_callback_erased(&self, callback: Callback) {
        self.add_callback(callback);
    }
    fn stored_failure(&self) -> Option<Failure> {
        self.error()
    }
}

/// The writer view of a completion cell.
///
/// Exactly one of [`set`][Promise::set] or [`fail`][Promise::fail] must be
/// called, exactly once, over all clones; a second resolution panics.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

/// The reader view of a completion cell. Cheap to clone; all clones observe
/// the same resolution.
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

/// A value-erased reader onto a completion cell.
///
/// Carries the completed-or-failed signal without the value type, which lets
/// heterogeneous futures be collected together (see [`FutureWaiter`]).
#[derive(Clone)]
pub struct Completion {
    inner: Arc<dyn CellBase>,
}

// === impl Promise ===

impl<T: Send + Sync + 'static> Promise<T> {
    /// Creates the promise side of a fresh cell.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Resolves the cell with a value. Panics if already resolved.
    pub fn set(&self, value: T) {
        self.inner.resolve(Ok(value));
    }

    /// Resolves the cell with a failure. Panics if already resolved.
    pub fn fail(&self, failure: Failure) {
        self.inner.resolve(Err(failure));
    }

    /// Resolves with a value unless already resolved. Returns whether this
    /// call performed the resolution.
    pub fn set_if_pending(&self, value: T) -> bool {
        self.inner.try_resolve(Ok(value))
    }

    /// Returns the reader side of the same cell.
    pub fn future(&self) -> Future<T> {
        Future {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("resolved", &(self.inner.state() != PENDING))
            .finish()
    }
}

// === impl Future ===

impl<T: Send + Sync + 'static> Future<T> {
    pub(crate) fn from_cell(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    /// Returns true if the cell is resolved. A false result can be outdated
    /// by the time the caller acts on it.
    pub fn is_complete(&self) -> bool {
        self.inner.state() != PENDING
    }

    /// Returns true if resolved with a value.
    pub fn is_completed_normally(&self) -> bool {
        self.inner.state() == COMPLETED
    }

    /// Returns true if resolved with a failure.
    pub fn is_failed(&self) -> bool {
        self.inner.state() == FAILED
    }

    /// Blocks the calling thread until the cell resolves.
    pub fn wait(&self) {
        self.inner.wait();
    }

    /// Waits, then returns a reference to the value, or re-raises the stored
    /// failure. Reentrant; every caller observes the same value object.
    pub fn get(&self) -> &T {
        self.inner.get()
    }

    /// Waits, then returns the stored failure, or `None` on normal
    /// completion.
    pub fn error(&self) -> Option<Failure> {
        self.inner.error()
    }

    /// Registers a callback to run when the cell resolves.
    ///
    /// Runs inline, before this returns, if the cell is already resolved;
    /// otherwise on the resolving thread. Callbacks must not block the
    /// resolving thread for long; typically they enqueue work onto an
    /// executor.
    pub fn on_complete(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.add_callback(Box::new(callback));
    }

    /// Returns the value-erased view of the same cell.
    pub fn completion(&self) -> Completion {
        Completion {
            inner: self.inner.clone(),
        }
    }

    /// Waits through a cooperative executor, then returns like
    /// [`get`][Self::get].
    ///
    /// While the cell is pending the executor is parked via its wait-token
    /// protocol, which lets a scheduler thread keep draining runnable
    /// coroutines and queued work instead of deadlocking on its own output.
    pub fn get_via<E>(&self, exec: &Arc<E>) -> &T
    where
        E: Executor + ?Sized + 'static,
    {
        if !self.is_complete() {
            let token = WaitToken::next();
            let notifier = exec.clone();
            self.on_complete(move || notifier.mark_completed(token));
            exec.wait_for(token);
        }
        self.get()
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state() {
            COMPLETED => "completed",
            FAILED => "failed",
            _ => "pending",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

// === impl Completion ===

impl Completion {
    pub fn is_complete(&self) -> bool {
        self.inner.state_flag() != PENDING
    }

    pub fn is_completed_normally(&self) -> bool {
        self.inner.state_flag() == COMPLETED
    }

    pub fn is_failed(&self) -> bool {
        self.inner.state_flag() == FAILED
    }

    pub fn wait(&self) {
        self.inner.wait_done();
    }

    /// Waits, then returns the stored failure, or `None`.
    pub fn error(&self) -> Option<Failure> {
        self.inner.stored_failure()
    }

    /// Registers a completion callback; same contract as
    /// [`Future::on_complete`].
    pub fn on_complete(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.add_callback_erased(Box::new(callback));
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl<T: Send + Sync + 'static> From<Future<T>> for Completion {
    fn from(future: Future<T>) -> Self {
        future.completion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn set_then_get() {
        let p = Promise::new();
        let f = p.future();
        p.set(10);
        assert!(f.is_complete());
        assert!(f.is_completed_normally());
        assert_eq!(*f.get(), 10);
        assert!(f.error().is_none());
    }

    #[test]
    fn get_blocks_until_set() {
        let p = Promise::new();
        let f = p.future();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            p.set(5_i32);
        });
        assert_eq!(*f.get(), 5);
        writer.join().unwrap();
    }

    #[test]
    fn all_readers_observe_same_value() {
        let p = Promise::new();
        let f = p.future();
        let g = f.clone();
        p.set(String::from("once"));
        assert!(core::ptr::eq(f.get(), g.get()));
    }

    #[test]
    fn failure_is_reported() {
        let p = Promise::<i32>::new();
        let f = p.future();
        p.fail(Failure::new(9_i32));
        assert!(f.is_failed());
        assert_eq!(f.error().unwrap().downcast::<i32>(), Some(9));
    }

    #[test]
    #[should_panic(expected = "resolved twice")]
    fn double_set_panics() {
        let p = Promise::new();
        p.set(1);
        p.set(2);
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let p = Promise::new();
        let f = p.future();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            f.on_complete(move || order.lock().unwrap().push(i));
        }
        p.set(());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn late_callback_runs_inline() {
        let p = Promise::new();
        let f = p.future();
        p.set(1);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let registering = thread::current().id();
        f.on_complete(move || {
            assert_eq!(thread::current().id(), registering);
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn each_callback_runs_exactly_once() {
        let p = Promise::new();
        let f = p.future();
        let count = Arc::new(AtomicUsize::new(0));
        const N: usize = 16;
        for _ in 0..N {
            let count = count.clone();
            f.on_complete(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        p.set(());
        assert_eq!(count.load(Ordering::SeqCst), N);
    }

    #[test]
    fn get_via_drains_the_executor_while_waiting() {
        let pool = Arc::new(crate::executor::ThreadPool::new(1));
        let p = Promise::new();
        let f = p.future();
        let setter = p.clone();
        pool.enqueue(Box::new(move || {
            thread::sleep(Duration::from_millis(5));
            setter.set(9);
        }));
        assert_eq!(*f.get_via(&pool), 9);
    }

    #[test]
    fn completion_view_tracks_cell() {
        let p = Promise::new();
        let c = p.future().completion();
        assert!(!c.is_complete());
        p.set(3);
        assert!(c.is_completed_normally());
        assert!(c.error().is_none());
    }
}
