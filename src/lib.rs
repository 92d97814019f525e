// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Eagerly-started futures with rich composition, a coroutine adaptation
//! layer with pluggable scheduling, and bounded single-producer
//! single-consumer value streams.
//!
//! # Futures
//!
//! A [`Promise`]/[`Future`] pair shares one completion cell. The producer
//! resolves it exactly once, with a value or a [`Failure`]; consumers poll,
//! block, register callbacks, or compose: [`Future::then`],
//! [`Future::then_async`], [`Future::then_async_loop`],
//! [`Future::catch_all`] and friends each synthesize a new future wired to
//! its antecedents, with user code running on an [`Executor`].
//!
//! ```
//! use forerun::{Promise, ThreadPool};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(ThreadPool::new(2));
//! let p = Promise::new();
//! let f = p.future().then_on(&pool, |x| x + 1).then_on(&pool, |x| x * 2);
//! p.set(10);
//! assert_eq!(*f.get(), 22);
//! ```
//!
//! # Coroutines
//!
//! [`spawn_future`] and [`spawn_stream`] run an `async` block eagerly and
//! resume it, after each suspension, on whatever thread its bound
//! [`Scheduler`] picks. Awaiting a [`Future`] inside a coroutine yields
//! its value; awaiting [`switch_to`] rebinds the scheduler mid-flight.
//!
//! ```
//! use forerun::{spawn_stream, ThreadPool};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(ThreadPool::new(2));
//! let stream = spawn_stream(&pool.parallel_start(), |y| async move {
//!     for i in 0..3 {
//!         y.put(10 + i).await;
//!     }
//! });
//! assert_eq!(stream.dequeue_item(), Some(10));
//! assert_eq!(stream.dequeue_item(), Some(11));
//! assert_eq!(stream.dequeue_item(), Some(12));
//! assert_eq!(stream.dequeue_item(), None);
//! ```
//!
//! # Streams
//!
//! A [`StreamSource`] delivers items in order, bounded by the channel
//! capacity, and then reports its terminal marker (End or Error) forever.
//! Generator coroutines suspend on the free-slot signal, which is what
//! backpressure means here.

pub mod coro;
pub mod executor;
pub mod failure;
pub mod future;
pub mod io;
pub mod stream;
pub mod time;

pub use coro::{spawn_future, spawn_stream, spawn_stream_with_capacity, switch_to, RunnableHandle, Yielder};
pub use executor::{
    default_executor, default_parallel_start, default_same_thread_start, default_scheduler,
    Executor, Scheduler, SchedulingInfo, SingleThreadScheduler, StartMode, ThreadPool, WaitToken,
};
pub use failure::{catching, Failure};
pub use future::{
    completed_future, execute_async_loop, execute_async_loop_on, failed_future, run_async,
    run_async_on, when_all, when_all_from_futures, when_all_from_futures_on, when_all_on,
    when_all_vec, when_all_vec_on, Completion, Future, FutureWaiter, JoinFutures, JoinValues,
    Promise,
};
pub use stream::{StreamIter, StreamSource, StreamValue};
pub use time::{alarm_clock, AlarmClock, PeriodicTimer, TimedActionCancelled, Timer};
