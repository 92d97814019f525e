// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::StreamValue;
use crate::coro::BindingSlot;
use crate::executor::WaitToken;
use crate::future::Callback;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// The bounded single-producer single-consumer queue behind a stream.
///
/// Exactly one producer and one consumer touch the queue at a time; the
/// channel serializes them against each other but does not arbitrate
/// between multiple producers. A terminal marker (End or Error) is never
/// consumed: every dequeue after the first returns an equal copy.
///
/// One `on_value` and one `on_slot` one-shot callback slot exist per
/// channel. With a single party on each side, one slot per direction is
/// all there can ever be; arming a second callback is a contract violation
/// and asserts.
pub(crate) struct Channel<Item, Eof> {
    capacity: usize,
    state: Mutex<State<Item, Eof>>,
    value_cv: Condvar,
    slot_cv: Condvar,
    /// Scheduler binding of the producing coroutine, when there is one.
    /// A blocking dequeue parks through it so a scheduler thread waiting
    /// on its own producer keeps draining work instead of deadlocking.
    coop: Mutex<Option<Arc<BindingSlot>>>,
}

struct State<Item, Eof> {
    queue: VecDeque<StreamValue<Item, Eof>>,
    closed: bool,
    on_value: Option<Callback>,
    on_slot: Option<Callback>,
}

// === impl Channel ===

impl<Item, Eof> Channel<Item, Eof>
where
    Item: Send + 'static,
    Eof: Clone + Send + 'static,
{
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 1, "a stream needs at least one slot");
        Self {
            capacity,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                closed: false,
                on_value: None,
                on_slot: None,
            }),
            value_cv: Condvar::new(),
            slot_cv: Condvar::new(),
            coop: Mutex::new(None),
        }
    }

    pub(crate) fn bind_cooperative(&self, binding: Arc<BindingSlot>) {
        *self.coop.lock().unwrap() = Some(binding);
    }

    /// True if a dequeue would not block. Once true it stays true until the
    /// single consumer dequeues.
    pub(crate) fn is_value_available(&self) -> bool {
        !self.state.lock().unwrap().queue.is_empty()
    }

    /// True if an item enqueue would not block. Once true it stays true
    /// until the single producer enqueues.
    pub(crate) fn is_slot_available(&self) -> bool {
        self.state.lock().unwrap().queue.len() < self.capacity
    }

    /// Arms the value-available one-shot, or runs `callback` inline when a
    /// value is already there.
    pub(crate) fn set_on_value_available_once(&self, callback: Callback) {
        {
            let mut state = self.state.lock().unwrap();
            if state.queue.is_empty() {
                assert!(
                    state.on_value.is_none(),
                    "value-available callback already armed"
                );
                state.on_value = Some(callback);
                return;
            }
        }
        callback();
    }

    /// Arms the slot-available one-shot, or runs `callback` inline when a
    /// slot is already free.
    pub(crate) fn set_on_slot_available_once(&self, callback: Callback) {
        {
            let mut state = self.state.lock().unwrap();
            if state.queue.len() >= self.capacity {
                assert!(
                    state.on_slot.is_none(),
                    "slot-available callback already armed"
                );
                state.on_slot = Some(callback);
                return;
            }
        }
        callback();
    }

    /// Enqueues a stream value.
    ///
    /// An item on a full queue blocks until the consumer frees a slot;
    /// markers always go through and close the channel. Producing anything
    /// after a marker asserts.
    pub(crate) fn enqueue(&self, value: StreamValue<Item, Eof>) {
        let mut state = self.state.lock().unwrap();
        assert!(!state.closed, "stream already carries a terminal marker");
        if value.is_item() {
            while state.queue.len() >= self.capacity {
                state = self.slot_cv.wait(state).unwrap();
            }
        } else {
            state.closed = true;
        }
        tracing::trace!(
            channel = ?(self as *const Self),
            kind = value.kind(),
            "stream value enqueued"
        );
        state.queue.push_back(value);
        self.value_cv.notify_all();
        let callback = state.on_value.take();
        drop(state);
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Dequeues the next stream value, blocking while the queue is empty.
    ///
    /// Items are consumed; a terminal marker is copied out and left in
    /// place, so the channel keeps reporting it forever.
    pub(crate) fn dequeue(&self) -> StreamValue<Item, Eof> {
        let mut state = self.state.lock().unwrap();
        while state.queue.is_empty() {
            state = self.wait_for_value(state);
        }
        if let Some(marker) = state.queue.front().and_then(StreamValue::marker_copy) {
            tracing::trace!(channel = ?(self as *const Self), kind = marker.kind(), "stream marker observed");
            return marker;
        }
        let value = state.queue.pop_front().unwrap();
        self.slot_cv.notify_all();
        let callback = state.on_slot.take();
        drop(state);
        if let Some(callback) = callback {
            callback();
        }
        value
    }

    /// Blocks until a value arrives, through the producer's scheduler when
    /// one is bound, on the channel condvar otherwise.
    fn wait_for_value<'a>(
        &'a self,
        mut state: MutexGuard<'a, State<Item, Eof>>,
    ) -> MutexGuard<'a, State<Item, Eof>> {
        let coop = self.coop.lock().unwrap().clone();
        match coop {
            Some(binding) => {
                let scheduler = binding.current();
                let token = WaitToken::next();
                assert!(
                    state.on_value.is_none(),
                    "value-available callback already armed"
                );
                let notifier = scheduler.clone();
                state.on_value = Some(Box::new(move || notifier.mark_completed(token)));
                drop(state);
                tracing::trace!(channel = ?(self as *const Self), "parking dequeue on scheduler");
                scheduler.wait_for(token);
                self.state.lock().unwrap()
            }
            None => self.value_cv.wait(state).unwrap(),
        }
    }
}
