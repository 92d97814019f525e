// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Coroutines over eager futures and streams.
//!
//! An `async` block handed to [`spawn_future`] or [`spawn_stream`] begins
//! executing immediately on the calling thread, unless its
//! [`SchedulingInfo`] demands a hop, and from then on suspends at every
//! await whose ready-check fails. The awaited object later wakes the
//! coroutine, which asks the *currently bound* scheduler to queue a
//! resumption; the scheduler picks the thread.
//!
//! Anything implementing [`std::future::Future`] can be awaited inside a
//! coroutine. This module supplies the adapters for the crate's own types:
//! [`Future`] values via `IntoFuture`, stream elements via the accessors
//! on [`StreamSource`](crate::stream::StreamSource), and scheduler
//! rebinding via [`switch_to`].

mod task;

pub use task::RunnableHandle;
pub(crate) use task::{current_task, BindingSlot};

use crate::executor::SchedulingInfo;
use crate::future::{Future, Promise};
use crate::stream::channel::Channel;
use crate::stream::{StreamSource, StreamValue};
use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Arc;

/// Default slot count of a generator's stream.
const DEFAULT_STREAM_CAPACITY: usize = 1;

/// Starts a future-producing coroutine.
///
/// The coroutine starts eagerly: when `info` allows the calling thread, the
/// body runs right here until its first suspension. The returned future
/// resolves with the body's value, or with the failure of an unhandled
/// panic.
pub fn spawn_future<T, F>(info: &SchedulingInfo, body: F) -> Future<T>
where
    T: Send + Sync + 'static,
    F: std::future::Future<Output = T> + Send + 'static,
{
    let promise = Promise::new();
    let completer = promise.clone();
    let aborter = promise.clone();
    let binding = Arc::new(BindingSlot::new(info.scheduler().clone()));

    let frame = Box::pin(async move {
        let value = body.await;
        completer.set(value);
    });
    let handle = RunnableHandle::new(frame, binding, Box::new(move |failure| aborter.fail(failure)));

    tracing::trace!(scheduler = info.scheduler().address(), hop = info.must_hop(), "spawning coroutine");
    if info.must_hop() {
        handle.start_queued();
    } else {
        handle.resume();
    }
    promise.future()
}

/// Starts a stream-producing coroutine (a generator) with the default
/// stream capacity.
pub fn spawn_stream<Item, Eof, F, Fut>(info: &SchedulingInfo, body: F) -> StreamSource<Item, Eof>
where
    Item: Send + 'static,
    Eof: Clone + Send + 'static,
    F: FnOnce(Yielder<Item, Eof>) -> Fut,
    Fut: std::future::Future<Output = Eof> + Send + 'static,
{
    spawn_stream_with_capacity(info, DEFAULT_STREAM_CAPACITY, body)
}

/// Starts a generator whose stream buffers up to `capacity` items.
///
/// The body receives a [`Yielder`] for emitting items and returns the
/// stream's final value, which becomes the End marker. An unhandled panic
/// becomes the Error marker instead. Emitted items observe backpressure:
/// with the stream full, [`Yielder::put`] suspends until the consumer
/// frees a slot.
pub fn spawn_stream_with_capacity<Item, Eof, F, Fut>(
    info: &SchedulingInfo,
    capacity: usize,
    body: F,
) -> StreamSource<Item, Eof>
where
    Item: Send + 'static,
    Eof: Clone + Send + 'static,
    F: FnOnce(Yielder<Item, Eof>) -> Fut,
    Fut: std::future::Future<Output = Eof> + Send + 'static,
{
    let channel = Arc::new(Channel::with_capacity(capacity));
    let binding = Arc::new(BindingSlot::new(info.scheduler().clone()));
    channel.bind_cooperative(binding.clone());

    let yielder = Yielder {
        channel: channel.clone(),
    };
    let user = body(yielder);

    let ending = channel.clone();
    let frame = Box::pin(async move {
        let eof = user.await;
        ending.enqueue(StreamValue::End(eof));
    });
    let failing = channel.clone();
    let handle = RunnableHandle::new(
        frame,
        binding,
        Box::new(move |failure| failing.enqueue(StreamValue::Error(failure))),
    );

    tracing::trace!(scheduler = info.scheduler().address(), hop = info.must_hop(), "spawning generator");
    if info.must_hop() {
        handle.start_queued();
    } else {
        handle.resume();
    }
    StreamSource::from_channel(channel)
}

/// The producer handle passed to a generator body.
pub struct Yielder<Item, Eof = ()> {
    channel: Arc<Channel<Item, Eof>>,
}

// === impl Yielder ===

impl<Item, Eof> Yielder<Item, Eof>
where
    Item: Send + 'static,
    Eof: Clone + Send + 'static,
{
    /// Emits one item into the stream.
    ///
    /// Resolves once the item is enqueued; with the stream full it first
    /// suspends on the free-slot signal.
    pub fn put(&self, item: Item) -> YieldItem<'_, Item, Eof> {
        YieldItem {
            channel: &self.channel,
            item: Some(item),
            registered: false,
        }
    }

    /// True if the next [`put`][Self::put] resolves without suspending.
    pub fn is_slot_available(&self) -> bool {
        self.channel.is_slot_available()
    }
}

/// Future returned by [`Yielder::put`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct YieldItem<'a, Item, Eof> {
    channel: &'a Arc<Channel<Item, Eof>>,
    item: Option<Item>,
    registered: bool,
}

// No self-references; the pending item is plain owned data.
impl<Item, Eof> Unpin for YieldItem<'_, Item, Eof> {}

impl<Item, Eof> std::future::Future for YieldItem<'_, Item, Eof>
where
    Item: Send + 'static,
    Eof: Clone + Send + 'static,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.channel.is_slot_available() {
            // Single producer: the free slot cannot be taken by anyone
            // else between the check and the enqueue.
            let item = this.item.take().expect("yield polled after completion");
            this.channel.enqueue(StreamValue::Item(item));
            return Poll::Ready(());
        }
        if !this.registered {
            this.registered = true;
            if let Some(task) = current_task() {
                task.set_end_soon(true);
            }
            let waker = cx.waker().clone();
            this.channel
                .set_on_slot_available_once(Box::new(move || waker.wake()));
        }
        Poll::Pending
    }
}

/// Rebinds the awaiting coroutine to the scheduler in `info`.
///
/// This is the only way to change a coroutine's scheduler. The await
/// resolves immediately when the current thread is acceptable and no
/// parallel start was requested; otherwise the coroutine suspends and is
/// re-queued on the new scheduler.
pub fn switch_to(info: SchedulingInfo) -> SwitchTo {
    SwitchTo {
        info,
        suspended: false,
    }
}

/// Future returned by [`switch_to`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct SwitchTo {
    info: SchedulingInfo,
    suspended: bool,
}

impl std::future::Future for SwitchTo {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.suspended {
            return Poll::Ready(());
        }
        let task = current_task().expect("switch_to must be awaited inside a coroutine");
        task.binding().rebind(this.info.scheduler().clone());
        if this.info.must_hop() {
            tracing::trace!(scheduler = this.info.scheduler().address(), "coroutine hopping threads");
            this.suspended = true;
            task.set_end_soon(false);
            // The wake lands while this task is mid-poll, so the driver
            // re-queues it on the freshly rebound scheduler.
            cx.waker().wake_by_ref();
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

/// Future returned by awaiting a [`Future`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Awaited<T> {
    future: Future<T>,
    registered: bool,
}

impl<T> std::future::Future for Awaited<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.future.is_complete() {
            return match this.future.error() {
                Some(failure) => failure.raise(),
                None => Poll::Ready(this.future.get().clone()),
            };
        }
        if !this.registered {
            this.registered = true;
            if let Some(task) = current_task() {
                task.set_end_soon(false);
            }
            let waker = cx.waker().clone();
            this.future.on_complete(move || waker.wake());
        }
        Poll::Pending
    }
}

impl<T> std::future::IntoFuture for Future<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;
    type IntoFuture = Awaited<T>;

    /// Awaiting a [`Future`] yields its value, or re-raises its failure
    /// into the awaiting coroutine.
    fn into_future(self) -> Awaited<T> {
        Awaited {
            future: self,
            registered: false,
        }
    }
}
