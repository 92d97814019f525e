// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Composition operators over [`Future`].
//!
//! Each operator synthesizes a fresh completion cell and wires it to its
//! antecedents through synchronous callbacks; the user computation itself
//! always runs on an [`Executor`]. Failures traverse the operators verbatim
//! and are only consumed by the `catch_*` family.
//!
//! Operators come in pairs: the bare name runs on the process-default
//! executor, the `_on` suffix takes an explicit one.

use super::{Completion, Future, Inner};
use crate::executor::{default_executor, Executor};
use crate::failure::{catching, Failure};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// === single-antecedent continuations ===

impl<T: Send + Sync + 'static> Future<T> {
    /// Runs `f` on `exec` with this future's value once it completes
    /// normally; the returned future carries `f`'s result.
    ///
    /// If this future fails, the failure is forwarded without running `f`.
    /// A panic in `f` fails the returned future.
    pub fn then_on<E, R>(
        &self,
        exec: &Arc<E>,
        f: impl FnOnce(&T) -> R + Send + 'static,
    ) -> Future<R>
    where
        E: Executor + ?Sized + 'static,
        R: Send + Sync + 'static,
    {
        let out = Arc::new(Inner::<R>::new());
        let antecedent = self.clone();
        let cell = out.clone();
        let exec = exec.clone();
        self.on_complete(move || match antecedent.error() {
            Some(failure) => cell.resolve(Err(failure)),
            None => exec.enqueue(Box::new(move || {
                cell.resolve(catching(|| f(antecedent.get())));
            })),
        });
        Future::from_cell(out)
    }

    /// [`then_on`][Self::then_on] on the default executor.
    pub fn then<R>(&self, f: impl FnOnce(&T) -> R + Send + 'static) -> Future<R>
    where
        R: Send + Sync + 'static,
    {
        self.then_on(&default_executor(), f)
    }

    /// Runs the asynchronous `f` on `exec` once this future completes
    /// normally; the returned future completes when the future returned by
    /// `f` does, with its value or failure.
    pub fn then_async_on<E, R>(
        &self,
        exec: &Arc<E>,
        f: impl FnOnce(&T) -> Future<R> + Send + 'static,
    ) -> Future<R>
    where
        E: Executor + ?Sized + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let out = Arc::new(Inner::<R>::new());
        let antecedent = self.clone();
        let cell = out.clone();
        let exec = exec.clone();
        self.on_complete(move || {
            if let Some(failure) = antecedent.error() {
                cell.resolve(Err(failure));
                return;
            }
            let forward_exec = exec.clone();
            exec.enqueue(Box::new(move || {
                match catching(|| f(antecedent.get())) {
                    Err(failure) => cell.resolve(Err(failure)),
                    Ok(nested) => {
                        let observed = nested.clone();
                        nested.on_complete(move || match observed.error() {
                            Some(failure) => cell.resolve(Err(failure)),
                            None => forward_exec.enqueue(Box::new(move || {
                                cell.resolve(Ok(observed.get().clone()));
                            })),
                        });
                    }
                }
            }));
        });
        Future::from_cell(out)
    }

    /// [`then_async_on`][Self::then_async_on] on the default executor.
    pub fn then_async<R>(&self, f: impl FnOnce(&T) -> Future<R> + Send + 'static) -> Future<R>
    where
        R: Clone + Send + Sync + 'static,
    {
        self.then_async_on(&default_executor(), f)
    }

    /// Iterates the asynchronous `body` for as long as `cond` holds,
    /// starting from this future's value.
    ///
    /// When the current value satisfies `cond`, `body` produces the future
    /// of the next value; the first value rejected by `cond` completes the
    /// returned future. Iterations are chained through callbacks scheduled
    /// onto `exec`, so the loop consumes no stack no matter how many turns
    /// it takes. Any failure, or panic in `cond` or `body`, ends the loop
    /// with that error.
    pub fn then_async_loop_on<E>(
        &self,
        exec: &Arc<E>,
        cond: impl Fn(&T) -> bool + Send + Sync + 'static,
        body: impl Fn(&T) -> Future<T> + Send + Sync + 'static,
    ) -> Future<T>
    where
        E: Executor + ?Sized + 'static,
        T: Clone,
    {
        let out = Arc::new(Inner::<T>::new());
        loop_stage(
            exec.clone(),
            Arc::new(cond),
            Arc::new(body),
            self.clone(),
            out.clone(),
        );
        Future::from_cell(out)
    }

    /// [`then_async_loop_on`][Self::then_async_loop_on] on the default
    /// executor.
    pub fn then_async_loop(
        &self,
        cond: impl Fn(&T) -> bool + Send + Sync + 'static,
        body: impl Fn(&T) -> Future<T> + Send + Sync + 'static,
    ) -> Future<T>
    where
        T: Clone,
    {
        self.then_async_loop_on(&default_executor(), cond, body)
    }

    /// Maps a failure back into a value; normal completion is forwarded.
    ///
    /// The handler runs on the thread that resolves this future.
    pub fn catch_all(&self, f: impl FnOnce(&Failure) -> T + Send + 'static) -> Future<T>
    where
        T: Clone,
    {
        let out = Arc::new(Inner::<T>::new());
        let antecedent = self.clone();
        let cell = out.clone();
        self.on_complete(move || match antecedent.error() {
            None => cell.resolve(Ok(antecedent.get().clone())),
            Some(failure) => cell.resolve(catching(|| f(&failure))),
        });
        Future::from_cell(out)
    }

    /// Like [`catch_all`][Self::catch_all], but only handles failures whose
    /// payload is an `X`; any other failure is forwarded untouched.
    pub fn catch_typed<X>(&self, f: impl FnOnce(X) -> T + Send + 'static) -> Future<T>
    where
        T: Clone,
        X: Clone + 'static,
    {
        self.catch_all(move |failure| match failure.downcast::<X>() {
            Some(payload) => f(payload),
            None => failure.raise(),
        })
    }

    /// Maps a failure into a recovery future produced on `exec`; normal
    /// completion is forwarded. The returned future completes when the
    /// recovery future does.
    pub fn catch_all_async_on<E>(
        &self,
        exec: &Arc<E>,
        f: impl FnOnce(&Failure) -> Future<T> + Send + 'static,
    ) -> Future<T>
    where
        E: Executor + ?Sized + 'static,
        T: Clone,
    {
        let out = Arc::new(Inner::<T>::new());
        let antecedent = self.clone();
        let cell = out.clone();
        let exec = exec.clone();
        self.on_complete(move || match antecedent.error() {
            None => cell.resolve(Ok(antecedent.get().clone())),
            Some(failure) => {
                let forward_exec = exec.clone();
                exec.enqueue(Box::new(move || match catching(|| f(&failure)) {
                    Err(handler_failure) => cell.resolve(Err(handler_failure)),
                    Ok(recovery) => {
                        let observed = recovery.clone();
                        recovery.on_complete(move || match observed.error() {
                            Some(failure) => cell.resolve(Err(failure)),
                            None => forward_exec.enqueue(Box::new(move || {
                                cell.resolve(Ok(observed.get().clone()));
                            })),
                        });
                    }
                }));
            }
        });
        Future::from_cell(out)
    }

    /// [`catch_all_async_on`][Self::catch_all_async_on] on the default
    /// executor.
    pub fn catch_all_async(
        &self,
        f: impl FnOnce(&Failure) -> Future<T> + Send + 'static,
    ) -> Future<T>
    where
        T: Clone,
    {
        self.catch_all_async_on(&default_executor(), f)
    }

    /// Typed variant of [`catch_all_async_on`][Self::catch_all_async_on];
    /// non-matching failures are forwarded untouched.
    pub fn catch_typed_async_on<E, X>(
        &self,
        exec: &Arc<E>,
        f: impl FnOnce(X) -> Future<T> + Send + 'static,
    ) -> Future<T>
    where
        E: Executor + ?Sized + 'static,
        T: Clone,
        X: Clone + 'static,
    {
        self.catch_all_async_on(exec, move |failure| match failure.downcast::<X>() {
            Some(payload) => f(payload),
            None => failed_future(failure.clone()),
        })
    }

    /// [`catch_typed_async_on`][Self::catch_typed_async_on] on the default
    /// executor.
    pub fn catch_typed_async<X>(
        &self,
        f: impl FnOnce(X) -> Future<T> + Send + 'static,
    ) -> Future<T>
    where
        T: Clone,
        X: Clone + 'static,
    {
        self.catch_typed_async_on(&default_executor(), f)
    }
}

fn loop_stage<E, T>(
    exec: Arc<E>,
    cond: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    body: Arc<dyn Fn(&T) -> Future<T> + Send + Sync>,
    current: Future<T>,
    out: Arc<Inner<T>>,
) where
    E: Executor + ?Sized + 'static,
    T: Clone + Send + Sync + 'static,
{
    let observed = current.clone();
    current.on_complete(move || {
        let next_exec = exec.clone();
        exec.enqueue(Box::new(move || {
            if let Some(failure) = observed.error() {
                out.resolve(Err(failure));
                return;
            }
            match catching(|| cond(observed.get())) {
                Err(failure) => out.resolve(Err(failure)),
                Ok(false) => out.resolve(Ok(observed.get().clone())),
                Ok(true) => match catching(|| body(observed.get())) {
                    Err(failure) => out.resolve(Err(failure)),
                    Ok(next) => loop_stage(next_exec, cond, body, next, out),
                },
            }
        }));
    });
}

// === ready-made futures ===

/// Returns an already-completed future holding `value`.
pub fn completed_future<T: Send + Sync + 'static>(value: T) -> Future<T> {
    let cell = Arc::new(Inner::new());
    cell.resolve(Ok(value));
    Future::from_cell(cell)
}

/// Returns an already-failed future.
pub fn failed_future<T: Send + Sync + 'static>(failure: Failure) -> Future<T> {
    let cell = Arc::new(Inner::<T>::new());
    cell.resolve(Err(failure));
    Future::from_cell(cell)
}

/// Schedules `f` on `exec` and returns the future of its result.
///
/// A panic in `f` fails the future.
pub fn run_async_on<E, R>(exec: &Arc<E>, f: impl FnOnce() -> R + Send + 'static) -> Future<R>
where
    E: Executor + ?Sized + 'static,
    R: Send + Sync + 'static,
{
    let cell = Arc::new(Inner::<R>::new());
    let out = cell.clone();
    exec.enqueue(Box::new(move || {
        out.resolve(catching(f));
    }));
    Future::from_cell(cell)
}

/// [`run_async_on`] on the default executor.
pub fn run_async<R>(f: impl FnOnce() -> R + Send + 'static) -> Future<R>
where
    R: Send + Sync + 'static,
{
    run_async_on(&default_executor(), f)
}

/// Standalone asynchronous loop: as long as `pred(current)` holds, `body`
/// produces the future of the next value; the first rejected value is the
/// result.
///
/// `pred` is applied to `start` on the calling thread; every later
/// iteration is a callback scheduled onto `exec`.
pub fn execute_async_loop_on<E, T>(
    exec: &Arc<E>,
    pred: impl Fn(&T) -> bool + Send + Sync + 'static,
    body: impl Fn(&T) -> Future<T> + Send + Sync + 'static,
    start: T,
) -> Future<T>
where
    E: Executor + ?Sized + 'static,
    T: Clone + Send + Sync + 'static,
{
    let out = Arc::new(Inner::<T>::new());
    start_stage(
        exec.clone(),
        Arc::new(pred),
        Arc::new(body),
        start,
        out.clone(),
    );
    Future::from_cell(out)
}

/// [`execute_async_loop_on`] on the default executor.
pub fn execute_async_loop<T>(
    pred: impl Fn(&T) -> bool + Send + Sync + 'static,
    body: impl Fn(&T) -> Future<T> + Send + Sync + 'static,
    start: T,
) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
{
    execute_async_loop_on(&default_executor(), pred, body, start)
}

fn start_stage<E, T>(
    exec: Arc<E>,
    pred: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    body: Arc<dyn Fn(&T) -> Future<T> + Send + Sync>,
    current: T,
    out: Arc<Inner<T>>,
) where
    E: Executor + ?Sized + 'static,
    T: Clone + Send + Sync + 'static,
{
    match catching(|| pred(&current)) {
        Err(failure) => out.resolve(Err(failure)),
        Ok(false) => out.resolve(Ok(current)),
        Ok(true) => match catching(|| body(&current)) {
            Err(failure) => out.resolve(Err(failure)),
            Ok(next) => {
                let observed = next.clone();
                next.on_complete(move || {
                    let next_exec = exec.clone();
                    exec.enqueue(Box::new(move || match observed.error() {
                        Some(failure) => out.resolve(Err(failure)),
                        None => {
                            start_stage(next_exec, pred, body, observed.get().clone(), out);
                        }
                    }));
                });
            }
        },
    }
}

// === multi-antecedent joins ===

/// Tuples of futures accepted by [`when_all`]; the continuation receives a
/// reference to each completed value.
pub trait JoinValues<F, R> {
    fn join_values_on<EX>(self, exec: &Arc<EX>, f: F) -> Future<R>
    where
        EX: Executor + ?Sized + 'static;
}

/// Tuples of futures accepted by [`when_all_from_futures`]; the
/// continuation receives the futures themselves and may inspect failures.
pub trait JoinFutures<F, R> {
    fn join_futures_on<EX>(self, exec: &Arc<EX>, f: F) -> Future<R>
    where
        EX: Executor + ?Sized + 'static;
}

/// Wires `completions` so that `finish` is enqueued onto `exec` once every
/// one of them has resolved.
fn join_barrier<EX>(
    exec: &Arc<EX>,
    completions: Vec<Completion>,
    finish: Box<dyn FnOnce() + Send>,
) where
    EX: Executor + ?Sized + 'static,
{
    let remaining = Arc::new(AtomicUsize::new(completions.len()));
    let finish = Arc::new(Mutex::new(Some(finish)));
    for completion in completions {
        let remaining = remaining.clone();
        let finish = finish.clone();
        let exec = exec.clone();
        completion.on_complete(move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let finish = finish.lock().unwrap().take().unwrap();
                exec.enqueue(finish);
            }
        });
    }
}

macro_rules! impl_join {
    ($( ($($T:ident $idx:tt),+) )+) => {$(
        impl<R, FN, $($T,)+> JoinValues<FN, R> for ($(Future<$T>,)+)
        where
            R: Send + Sync + 'static,
            FN: FnOnce($(&$T,)+) -> R + Send + 'static,
            $($T: Send + Sync + 'static,)+
        {
            fn join_values_on<EX>(self, exec: &Arc<EX>, f: FN) -> Future<R>
            where
                EX: Executor + ?Sized + 'static,
            {
                let out = Arc::new(Inner::<R>::new());
                let cell = out.clone();
                let completions = vec![$(self.$idx.completion(),)+];
                let futures = self;
                join_barrier(exec, completions, Box::new(move || {
                    let first_failure = None$(.or_else(|| futures.$idx.error()))+;
                    match first_failure {
                        Some(failure) => cell.resolve(Err(failure)),
                        None => cell.resolve(catching(|| f($(futures.$idx.get(),)+))),
                    }
                }));
                Future::from_cell(out)
            }
        }

        impl<R, FN, $($T,)+> JoinFutures<FN, R> for ($(Future<$T>,)+)
        where
            R: Send + Sync + 'static,
            FN: FnOnce($(Future<$T>,)+) -> R + Send + 'static,
            $($T: Send + Sync + 'static,)+
        {
            fn join_futures_on<EX>(self, exec: &Arc<EX>, f: FN) -> Future<R>
            where
                EX: Executor + ?Sized + 'static,
            {
                let out = Arc::new(Inner::<R>::new());
                let cell = out.clone();
                let completions = vec![$(self.$idx.completion(),)+];
                let futures = self;
                join_barrier(exec, completions, Box::new(move || {
                    cell.resolve(catching(|| f($(futures.$idx,)+)));
                }));
                Future::from_cell(out)
            }
        }
    )+}
}

impl_join! {
    (A 0)
    (A 0, B 1)
    (A 0, B 1, C 2)
    (A 0, B 1, C 2, D 3)
    (A 0, B 1, C 2, D 3, F 4)
}

/// Completes with `f` applied to the values of every future in the tuple,
/// once all of them have completed.
///
/// If any input fails, the result fails with one of those failures. The
/// check runs only after every input has resolved, so the one reported is
/// the first in tuple order, regardless of which input failed first in
/// real time.
pub fn when_all_on<EX, L, F, R>(exec: &Arc<EX>, f: F, futures: L) -> Future<R>
where
    EX: Executor + ?Sized + 'static,
    L: JoinValues<F, R>,
{
    futures.join_values_on(exec, f)
}

/// [`when_all_on`] on the default executor.
pub fn when_all<L, F, R>(f: F, futures: L) -> Future<R>
where
    L: JoinValues<F, R>,
{
    futures.join_values_on(&default_executor(), f)
}

/// Like [`when_all_on`], but `f` receives the completed futures themselves
/// and decides how to treat failures.
pub fn when_all_from_futures_on<EX, L, F, R>(exec: &Arc<EX>, f: F, futures: L) -> Future<R>
where
    EX: Executor + ?Sized + 'static,
    L: JoinFutures<F, R>,
{
    futures.join_futures_on(exec, f)
}

/// [`when_all_from_futures_on`] on the default executor.
pub fn when_all_from_futures<L, F, R>(f: F, futures: L) -> Future<R>
where
    L: JoinFutures<F, R>,
{
    futures.join_futures_on(&default_executor(), f)
}

/// Homogeneous join: completes with `f` applied to the vector of completed
/// futures once every one of them has resolved.
pub fn when_all_vec_on<EX, T, F, R>(exec: &Arc<EX>, f: F, futures: Vec<Future<T>>) -> Future<R>
where
    EX: Executor + ?Sized + 'static,
    T: Send + Sync + 'static,
    F: FnOnce(Vec<Future<T>>) -> R + Send + 'static,
    R: Send + Sync + 'static,
{
    let out = Arc::new(Inner::<R>::new());
    let cell = out.clone();
    let completions = futures.iter().map(Future::completion).collect();
    join_barrier(exec, completions, Box::new(move || {
        cell.resolve(catching(|| f(futures)));
    }));
    Future::from_cell(out)
}

/// [`when_all_vec_on`] on the default executor.
pub fn when_all_vec<T, F, R>(f: F, futures: Vec<Future<T>>) -> Future<R>
where
    T: Send + Sync + 'static,
    F: FnOnce(Vec<Future<T>>) -> R + Send + 'static,
    R: Send + Sync + 'static,
{
    when_all_vec_on(&default_executor(), f, futures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadPool;
    use crate::future::Promise;
    use std::time::Duration;

    fn pool() -> Arc<ThreadPool> {
        Arc::new(ThreadPool::new(2))
    }

    #[test]
    fn then_chains_values() {
        let pool = pool();
        let p = Promise::new();
        let f = p
            .future()
            .then_on(&pool, |x| x + 1)
            .then_on(&pool, |x| x * 2);
        p.set(10);
        assert_eq!(*f.get(), 22);
    }

    #[test]
    fn then_identity_preserves_outcome() {
        let pool = pool();
        let p = Promise::new();
        let f = p.future().then_on(&pool, |x: &i32| *x);
        p.set(7);
        assert_eq!(*f.get(), 7);

        let p = Promise::<i32>::new();
        let f = p.future().then_on(&pool, |x: &i32| *x);
        p.fail(Failure::new(3_i32));
        assert_eq!(f.error().unwrap().downcast::<i32>(), Some(3));
    }

    #[test]
    fn then_skips_body_on_failure() {
        let pool = pool();
        let p = Promise::<i32>::new();
        let f = p.future().then_on(&pool, |_| -> i32 {
            panic!("continuation must not run")
        });
        p.fail(Failure::new("upstream"));
        assert_eq!(
            f.error().unwrap().downcast::<&'static str>(),
            Some("upstream")
        );
    }

    #[test]
    fn panic_in_continuation_fails_output() {
        let pool = pool();
        let p = Promise::new();
        let f = p.future().then_on(&pool, |x: &i32| -> i32 {
            std::panic::panic_any(x + 1)
        });
        p.set(10);
        assert_eq!(f.error().unwrap().downcast::<i32>(), Some(11));
    }

    #[test]
    fn then_async_flattens() {
        let pool = pool();
        let p = Promise::new();
        let inner_pool = pool.clone();
        let f = p
            .future()
            .then_async_on(&pool, move |x: &i32| {
                let x = *x;
                run_async_on(&inner_pool, move || x * 3)
            });
        p.set(5);
        assert_eq!(*f.get(), 15);
    }

    #[test]
    fn then_async_propagates_inner_failure() {
        let pool = pool();
        let p = Promise::new();
        let f = p
            .future()
            .then_async_on(&pool, |_: &i32| failed_future::<i32>(Failure::new(8_i32)));
        p.set(1);
        assert_eq!(f.error().unwrap().downcast::<i32>(), Some(8));
    }

    #[test]
    fn catch_all_recovers() {
        let pool = pool();
        let p = Promise::new();
        let f = p
            .future()
            .then_on(&pool, |x: &i32| -> i32 { std::panic::panic_any(x + 1) })
            .catch_typed::<i32>(|e| e + 1);
        p.set(10);
        assert_eq!(*f.get(), 12);
    }

    #[test]
    fn catch_all_forwards_success() {
        let p = Promise::new();
        let f = p.future().catch_all(|_| -1);
        p.set(4);
        assert_eq!(*f.get(), 4);
    }

    #[test]
    fn catch_typed_mismatch_forwards_failure() {
        let p = Promise::<i32>::new();
        let f = p.future().catch_typed::<String>(|_| -1);
        p.fail(Failure::new(13_i32));
        assert_eq!(f.error().unwrap().downcast::<i32>(), Some(13));
    }

    #[test]
    fn catch_all_async_recovers() {
        let pool = pool();
        let p = Promise::<i32>::new();
        let recovery_pool = pool.clone();
        let f = p.future().catch_all_async_on(&pool, move |failure| {
            let base = failure.downcast::<i32>().unwrap();
            run_async_on(&recovery_pool, move || base * 10)
        });
        p.fail(Failure::new(4_i32));
        assert_eq!(*f.get(), 40);
    }

    #[test]
    fn catch_all_async_forwards_success_without_handler() {
        let pool = pool();
        let p = Promise::new();
        let f = p
            .future()
            .catch_all_async_on(&pool, |_| -> Future<i32> { unreachable!() });
        p.set(5);
        assert_eq!(*f.get(), 5);
    }

    #[test]
    fn catch_typed_async_matches_and_recovers() {
        let pool = pool();
        let p = Promise::<i32>::new();
        let f = p
            .future()
            .catch_typed_async_on(&pool, |e: i32| completed_future(e + 2));
        p.fail(Failure::new(40_i32));
        assert_eq!(*f.get(), 42);
    }

    #[test]
    fn catch_typed_async_mismatch_forwards_failure() {
        let pool = pool();
        let p = Promise::<i32>::new();
        let f = p
            .future()
            .catch_typed_async_on(&pool, |_: String| completed_future(-1));
        p.fail(Failure::new(13_i32));
        assert_eq!(f.error().unwrap().downcast::<i32>(), Some(13));
    }

    #[test]
    fn async_loop_counts_up() {
        let pool = pool();
        let body_pool = pool.clone();
        let f = completed_future(0).then_async_loop_on(
            &pool,
            |v| *v < 10,
            move |v| {
                let v = *v;
                run_async_on(&body_pool, move || v + 1)
            },
        );
        assert_eq!(*f.get(), 10);
    }

    #[test]
    fn async_loop_zero_iterations() {
        let pool = pool();
        let f = completed_future(42).then_async_loop_on(&pool, |v| *v < 10, |_| unreachable!());
        assert_eq!(*f.get(), 42);
    }

    #[test]
    fn async_loop_failure_stops_iteration() {
        let pool = pool();
        let f = completed_future(0).then_async_loop_on(
            &pool,
            |v| *v < 10,
            |v| {
                if *v == 3 {
                    failed_future(Failure::new("third"))
                } else {
                    completed_future(v + 1)
                }
            },
        );
        assert_eq!(
            f.error().unwrap().downcast::<&'static str>(),
            Some("third")
        );
    }

    #[test]
    fn standalone_loop_runs_from_start_value() {
        let pool = pool();
        let f = execute_async_loop_on(&pool, |v| *v < 5, |v| completed_future(v + 1), 0);
        assert_eq!(*f.get(), 5);
    }

    #[test]
    fn when_all_combines_values() {
        let pool = pool();
        let pa = Promise::new();
        let pb = Promise::new();
        let f = when_all_on(&pool, |a: &i32, b: &i32| a + b + 1, (pa.future(), pb.future()));
        pa.set(20);
        pb.set(5);
        assert_eq!(*f.get(), 26);
    }

    #[test]
    fn when_all_reports_a_failure() {
        let pool = pool();
        let pa = Promise::<i32>::new();
        let pb = Promise::<i32>::new();
        let f = when_all_on(&pool, |_: &i32, _: &i32| 0, (pa.future(), pb.future()));
        pa.fail(Failure::new("left"));
        pb.set(1);
        assert!(f.error().is_some());
    }

    #[test]
    fn when_all_from_futures_sees_failures() {
        let pool = pool();
        let pa = Promise::<i32>::new();
        let pb = Promise::<i32>::new();
        let f = when_all_from_futures_on(
            &pool,
            |a: Future<i32>, b: Future<i32>| {
                let recovered = if a.is_failed() { 0 } else { *a.get() };
                recovered + *b.get()
            },
            (pa.future(), pb.future()),
        );
        pa.fail(Failure::new("ignored"));
        pb.set(2);
        assert_eq!(*f.get(), 2);
    }

    #[test]
    fn when_all_vec_waits_for_every_input() {
        let pool = pool();
        let promises: Vec<Promise<i32>> = (0..8).map(|_| Promise::new()).collect();
        let futures = promises.iter().map(Promise::future).collect();
        let f = when_all_vec_on(
            &pool,
            |futs: Vec<Future<i32>>| futs.iter().map(|f| *f.get()).sum::<i32>(),
            futures,
        );
        for (i, p) in promises.iter().enumerate() {
            std::thread::sleep(Duration::from_millis(1));
            p.set(i as i32);
        }
        assert_eq!(*f.get(), 28);
    }

    #[test]
    fn run_async_produces_value() {
        let pool = pool();
        let f = run_async_on(&pool, || 6 * 7);
        assert_eq!(*f.get(), 42);
    }

    #[test]
    fn ready_made_futures() {
        assert_eq!(*completed_future(3).get(), 3);
        assert!(failed_future::<i32>(Failure::new(())).is_failed());
    }
}
