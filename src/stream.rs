// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Single-producer single-consumer value streams.
//!
//! A stream carries a sequence of items followed by exactly one terminal
//! marker: an `End` with a final value, or an `Error` with a captured
//! [`Failure`]. The queue behind it is bounded, which is what gives
//! generator coroutines their backpressure: a producer that runs ahead of
//! its consumer suspends on the free-slot signal instead of buffering
//! without limit.
//!
//! [`StreamSource`] is the consumer view. It offers blocking accessors for
//! plain threads and awaitable ones for coroutine consumers; both observe
//! items in enqueue order and the terminal marker forever after.

pub(crate) mod channel;

use crate::coro::current_task;
use crate::failure::Failure;
use channel::Channel;
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Arc;

/// One element of a stream: a regular item or a terminal marker.
#[derive(Debug)]
pub enum StreamValue<Item, Eof = ()> {
    /// A regular item.
    Item(Item),
    /// The end of the stream, with its final value.
    End(Eof),
    /// The stream failed; no further items follow.
    Error(Failure),
}

// === impl StreamValue ===

impl<Item, Eof> StreamValue<Item, Eof> {
    pub fn is_item(&self) -> bool {
        matches!(self, Self::Item(_))
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn item(&self) -> Option<&Item> {
        match self {
            Self::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn into_item(self) -> Option<Item> {
        match self {
            Self::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn end(&self) -> Option<&Eof> {
        match self {
            Self::End(eof) => Some(eof),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Failure> {
        match self {
            Self::Error(failure) => Some(failure),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Item(_) => "item",
            Self::End(_) => "end",
            Self::Error(_) => "error",
        }
    }

    /// Copies a terminal marker; `None` for items.
    pub(crate) fn marker_copy(&self) -> Option<Self>
    where
        Eof: Clone,
    {
        match self {
            Self::Item(_) => None,
            Self::End(eof) => Some(Self::End(eof.clone())),
            Self::Error(failure) => Some(Self::Error(failure.clone())),
        }
    }
}

/// The consumer side of a stream.
///
/// There is exactly one consumer; the source moves but does not clone.
pub struct StreamSource<Item, Eof = ()> {
    channel: Arc<Channel<Item, Eof>>,
}

// === impl StreamSource ===

impl<Item, Eof> StreamSource<Item, Eof>
where
    Item: Send + 'static,
    Eof: Clone + Send + 'static,
{
    pub(crate) fn from_channel(channel: Arc<Channel<Item, Eof>>) -> Self {
        Self { channel }
    }

    /// True if a dequeue would return without blocking.
    pub fn is_value_available(&self) -> bool {
        self.channel.is_value_available()
    }

    /// Blocks until the next element is available and returns it. After
    /// the terminal marker, returns an equal marker copy forever.
    pub fn dequeue(&self) -> StreamValue<Item, Eof> {
        self.channel.dequeue()
    }

    /// Awaitable form of [`dequeue`][Self::dequeue], for coroutine
    /// consumers: suspends on the value-available signal instead of
    /// blocking the thread.
    pub fn next(&self) -> NextValue<'_, Item, Eof> {
        NextValue {
            channel: &self.channel,
            registered: false,
        }
    }
}

impl<Item> StreamSource<Item, ()>
where
    Item: Send + 'static,
{
    /// Blocks for the next item; `None` once the stream ends. A stream
    /// error is re-raised.
    pub fn dequeue_item(&self) -> Option<Item> {
        match self.channel.dequeue() {
            StreamValue::Item(item) => Some(item),
            StreamValue::End(()) => None,
            StreamValue::Error(failure) => failure.raise(),
        }
    }

    /// Awaitable form of [`dequeue_item`][Self::dequeue_item].
    pub fn next_item(&self) -> NextItem<'_, Item> {
        NextItem {
            inner: self.next(),
        }
    }

    /// Awaitable cursor creation: resolves to a [`StreamIter`] positioned
    /// on the first element.
    pub fn iter(self) -> IterStart<Item> {
        IterStart {
            channel: self.channel,
            registered: false,
        }
    }
}

impl<Item, Eof> fmt::Debug for StreamSource<Item, Eof> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("channel", &Arc::as_ptr(&self.channel))
            .finish()
    }
}

fn hint_end_soon() {
    if let Some(task) = current_task() {
        task.set_end_soon(true);
    }
}

/// Future returned by [`StreamSource::next`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct NextValue<'a, Item, Eof> {
    channel: &'a Arc<Channel<Item, Eof>>,
    registered: bool,
}

impl<Item, Eof> std::future::Future for NextValue<'_, Item, Eof>
where
    Item: Send + 'static,
    Eof: Clone + Send + 'static,
{
    type Output = StreamValue<Item, Eof>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.channel.is_value_available() {
            // Single consumer: availability cannot be taken away between
            // the check and the dequeue.
            return Poll::Ready(this.channel.dequeue());
        }
        if !this.registered {
            this.registered = true;
            hint_end_soon();
            let waker = cx.waker().clone();
            this.channel
                .set_on_value_available_once(Box::new(move || waker.wake()));
        }
        Poll::Pending
    }
}

/// Future returned by [`StreamSource::next_item`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct NextItem<'a, Item> {
    inner: NextValue<'a, Item, ()>,
}

impl<Item> std::future::Future for NextItem<'_, Item>
where
    Item: Send + 'static,
{
    type Output = Option<Item>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = Pin::new(&mut self.get_mut().inner);
        inner.poll(cx).map(|value| match value {
            StreamValue::Item(item) => Some(item),
            StreamValue::End(()) => None,
            StreamValue::Error(failure) => failure.raise(),
        })
    }
}

/// A cursor over a stream, created by [`StreamSource::iter`].
///
/// Holds the element it is positioned on; [`advance`][StreamIter::advance]
/// moves to the next one. Past the end the cursor stays on the terminal
/// marker.
pub struct StreamIter<Item> {
    channel: Arc<Channel<Item, ()>>,
    current: StreamValue<Item, ()>,
}

// === impl StreamIter ===

impl<Item> StreamIter<Item>
where
    Item: Send + 'static,
{
    /// The item under the cursor; `None` at end of stream. A stream error
    /// is re-raised.
    pub fn item(&self) -> Option<&Item> {
        match &self.current {
            StreamValue::Item(item) => Some(item),
            StreamValue::End(()) => None,
            StreamValue::Error(failure) => failure.raise(),
        }
    }

    /// True once the cursor reached the end marker.
    pub fn is_end(&self) -> bool {
        self.current.is_end()
    }

    /// Awaitable advance to the next element.
    pub fn advance(&mut self) -> Advance<'_, Item> {
        Advance {
            iter: self,
            registered: false,
        }
    }
}

/// Future returned by [`StreamSource::iter`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct IterStart<Item> {
    channel: Arc<Channel<Item, ()>>,
    registered: bool,
}

impl<Item> std::future::Future for IterStart<Item>
where
    Item: Send + 'static,
{
    type Output = StreamIter<Item>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.channel.is_value_available() {
            let current = this.channel.dequeue();
            return Poll::Ready(StreamIter {
                channel: this.channel.clone(),
                current,
            });
        }
        if !this.registered {
            this.registered = true;
            hint_end_soon();
            let waker = cx.waker().clone();
            this.channel
                .set_on_value_available_once(Box::new(move || waker.wake()));
        }
        Poll::Pending
    }
}

/// Future returned by [`StreamIter::advance`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Advance<'a, Item> {
    iter: &'a mut StreamIter<Item>,
    registered: bool,
}

impl<Item> std::future::Future for Advance<'_, Item>
where
    Item: Send + 'static,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.iter.channel.is_value_available() {
            this.iter.current = this.iter.channel.dequeue();
            return Poll::Ready(());
        }
        if !this.registered {
            this.registered = true;
            hint_end_soon();
            let waker = cx.waker().clone();
            this.iter
                .channel
                .set_on_value_available_once(Box::new(move || waker.wake()));
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn raw_channel<Item: Send + 'static, Eof: Clone + Send + 'static>(
        capacity: usize,
    ) -> (Arc<Channel<Item, Eof>>, StreamSource<Item, Eof>) {
        let channel = Arc::new(Channel::with_capacity(capacity));
        (channel.clone(), StreamSource::from_channel(channel))
    }

    #[test]
    fn items_arrive_in_order() {
        let (tx, rx) = raw_channel::<i32, ()>(4);
        for i in 0..4 {
            tx.enqueue(StreamValue::Item(i));
        }
        tx.enqueue(StreamValue::End(()));
        assert_eq!(rx.dequeue_item(), Some(0));
        assert_eq!(rx.dequeue_item(), Some(1));
        assert_eq!(rx.dequeue_item(), Some(2));
        assert_eq!(rx.dequeue_item(), Some(3));
        assert_eq!(rx.dequeue_item(), None);
    }

    #[test]
    fn end_marker_repeats() {
        let (tx, rx) = raw_channel::<i32, ()>(1);
        tx.enqueue(StreamValue::End(()));
        assert!(rx.dequeue().is_end());
        assert!(rx.dequeue().is_end());
        assert!(rx.dequeue().is_end());
    }

    #[test]
    fn error_marker_repeats_and_raises() {
        let (tx, rx) = raw_channel::<i32, ()>(1);
        tx.enqueue(StreamValue::Error(Failure::new(123_i32)));
        let first = rx.dequeue();
        assert_eq!(first.error().unwrap().downcast::<i32>(), Some(123));
        let second = rx.dequeue();
        assert!(second.is_error());
        let caught = crate::failure::catching(|| rx.dequeue_item()).unwrap_err();
        assert_eq!(caught.downcast::<i32>(), Some(123));
    }

    #[test]
    fn bounded_enqueue_blocks_until_slot_frees() {
        let (tx, rx) = raw_channel::<i32, ()>(1);
        tx.enqueue(StreamValue::Item(1));
        assert!(!tx.is_slot_available());

        let producer = thread::spawn(move || {
            // Full queue: this enqueue parks until the consumer takes one.
            tx.enqueue(StreamValue::Item(2));
            tx.enqueue(StreamValue::End(()));
        });
        thread::sleep(Duration::from_millis(10));
        assert_eq!(rx.dequeue_item(), Some(1));
        assert_eq!(rx.dequeue_item(), Some(2));
        assert_eq!(rx.dequeue_item(), None);
        producer.join().unwrap();
    }

    #[test]
    fn dequeue_blocks_until_value_arrives() {
        let (tx, rx) = raw_channel::<i32, ()>(1);
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.enqueue(StreamValue::Item(7));
            tx.enqueue(StreamValue::End(()));
        });
        assert_eq!(rx.dequeue_item(), Some(7));
        producer.join().unwrap();
    }

    #[test]
    fn value_callback_runs_inline_when_value_present() {
        let (tx, _rx) = raw_channel::<i32, ()>(1);
        tx.enqueue(StreamValue::Item(1));
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = fired.clone();
        tx.set_on_value_available_once(Box::new(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn slot_callback_fires_on_dequeue() {
        let (tx, rx) = raw_channel::<i32, ()>(1);
        tx.enqueue(StreamValue::Item(1));
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = fired.clone();
        tx.set_on_slot_available_once(Box::new(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(rx.dequeue_item(), Some(1));
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "terminal marker")]
    fn producing_after_end_asserts() {
        let (tx, _rx) = raw_channel::<i32, ()>(1);
        tx.enqueue(StreamValue::End(()));
        tx.enqueue(StreamValue::Item(1));
    }
}
