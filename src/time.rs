// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Wall-clock timers.
//!
//! An [`AlarmClock`] owns one worker thread and an ordered set of pending
//! deadlines. A one-shot timer resolves a `Future<bool>` whose value tells
//! fired (`true`) apart from cancelled (`false`); a periodic timer feeds a
//! stream of tick timestamps whose End marker is the cancellation signal.
//!
//! Firing and cancelling race benignly: the first resolution wins and the
//! loser is a no-op.

use crate::future::{Future, Promise};
use crate::stream::channel::Channel;
use crate::stream::{StreamSource, StreamValue};
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Slots buffered by a periodic timer's stream. Ticks that find the stream
/// full are dropped rather than stalling the clock thread.
const PERIODIC_STREAM_CAPACITY: usize = 4;

type TimerKey = (Instant, u64);

/// A scheduler of one-shot and periodic wall-clock events.
pub struct AlarmClock {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    state: Mutex<State>,
    cv: Condvar,
}

struct State {
    entries: BTreeMap<TimerKey, Entry>,
    next_seq: u64,
    closed: bool,
}

enum Entry {
    Once(Promise<bool>),
    Periodic {
        channel: Arc<Channel<Instant, ()>>,
        period: Duration,
    },
}

/// Failure payload of a timed action whose timer was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedActionCancelled;

/// Handle on a pending one-shot timer.
pub struct Timer {
    shared: Arc<Shared>,
    key: TimerKey,
    promise: Promise<bool>,
}

/// Handle on a pending periodic timer.
pub struct PeriodicTimer {
    shared: Arc<Shared>,
    key: TimerKey,
    channel: Arc<Channel<Instant, ()>>,
}

// === impl AlarmClock ===

impl AlarmClock {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                entries: BTreeMap::new(),
                next_seq: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        });
        let worker = shared.clone();
        let thread = std::thread::Builder::new()
            .name("alarm-clock".into())
            .spawn(move || worker.run())
            .expect("failed to spawn alarm clock thread");
        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Arms a one-shot timer for the given deadline.
    pub fn set_timer(&self, when: Instant) -> Timer {
        let promise = Promise::new();
        let key = {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                drop(state);
                promise.set_if_pending(false);
                return Timer {
                    shared: self.shared.clone(),
                    key: (when, 0),
                    promise,
                };
            }
            let key = (when, state.next_seq);
            state.next_seq += 1;
            state.entries.insert(key, Entry::Once(promise.clone()));
            self.shared.cv.notify_all();
            key
        };
        Timer {
            shared: self.shared.clone(),
            key,
            promise,
        }
    }

    /// Arms a one-shot timer `delta` from now.
    pub fn set_timer_after(&self, delta: Duration) -> Timer {
        self.set_timer(Instant::now() + delta)
    }

    /// Arms a periodic timer: a tick at `first`, then one every `period`.
    ///
    /// The returned stream carries the tick timestamps; cancellation ends
    /// it. A tick that finds the stream buffer full is dropped.
    pub fn set_periodic(&self, first: Instant, period: Duration) -> (PeriodicTimer, StreamSource<Instant, ()>) {
        assert!(period > Duration::ZERO, "a periodic timer needs a non-zero period");
        let channel = Arc::new(Channel::with_capacity(PERIODIC_STREAM_CAPACITY));
        let key = {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                channel.enqueue(StreamValue::End(()));
                (first, 0)
            } else {
                let key = (first, state.next_seq);
                state.next_seq += 1;
                state.entries.insert(
                    key,
                    Entry::Periodic {
                        channel: channel.clone(),
                        period,
                    },
                );
                self.shared.cv.notify_all();
                key
            }
        };
        (
            PeriodicTimer {
                shared: self.shared.clone(),
                key,
                channel: channel.clone(),
            },
            StreamSource::from_channel(channel),
        )
    }

    /// Schedules `f` to run on `exec` at `when`, returning the future of
    /// its result.
    ///
    /// Cancelling the underlying timer before it fires fails the returned
    /// future with the [`TimedActionCancelled`] payload.
    pub fn set_timed_action<E, R>(
        &self,
        when: Instant,
        exec: &Arc<E>,
        f: impl FnOnce() -> R + Send + 'static,
    ) -> (Timer, Future<R>)
    where
        E: crate::executor::Executor + ?Sized + 'static,
        R: Send + Sync + 'static,
    {
        let timer = self.set_timer(when);
        let future = timer.future().then_on(exec, move |fired| {
            if *fired {
                f()
            } else {
                crate::failure::Failure::new(TimedActionCancelled).raise()
            }
        });
        (timer, future)
    }

    /// Cancels everything pending and stops the clock thread.
    pub fn close(&self) {
        let entries = {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
            self.shared.cv.notify_all();
            std::mem::take(&mut state.entries)
        };
        for (_, entry) in entries {
            match entry {
                Entry::Once(promise) => {
                    promise.set_if_pending(false);
                }
                Entry::Periodic { channel, .. } => channel.enqueue(StreamValue::End(())),
            }
        }
    }
}

impl Default for AlarmClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AlarmClock {
    fn drop(&mut self) {
        self.close();
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

// === impl Shared ===

impl Shared {
    fn run(&self) {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return;
            }
            let next_deadline = state.entries.first_key_value().map(|(&(when, _), _)| when);
            let Some(when) = next_deadline else {
                state = self.cv.wait(state).unwrap();
                continue;
            };
            let now = Instant::now();
            if when > now {
                let (next, _timed_out) = self.cv.wait_timeout(state, when - now).unwrap();
                state = next;
                continue;
            }

            let ((when, seq), entry) = state.entries.pop_first().unwrap();
            match entry {
                Entry::Once(promise) => {
                    tracing::trace!(?when, "one-shot timer fired");
                    drop(state);
                    promise.set_if_pending(true);
                    state = self.state.lock().unwrap();
                }
                Entry::Periodic { channel, period } => {
                    // Under the clock lock, so a concurrent cancel cannot
                    // slip its End marker in between check and enqueue.
                    if channel.is_slot_available() {
                        channel.enqueue(StreamValue::Item(now));
                    } else {
                        tracing::debug!(?when, "periodic tick dropped, stream full");
                    }
                    state.entries.insert((when + period, seq), Entry::Periodic { channel, period });
                }
            }
        }
    }
}

// === impl Timer ===

impl Timer {
    /// The future of this timer: `true` when fired, `false` when cancelled.
    pub fn future(&self) -> Future<bool> {
        self.promise.future()
    }

    /// Cancels the timer. Resolves the future with `false` unless it
    /// already fired.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.entries.remove(&self.key);
            self.shared.cv.notify_all();
        }
        self.promise.set_if_pending(false);
    }
}

// === impl PeriodicTimer ===

impl PeriodicTimer {
    /// Stops the ticks and ends the stream. Idempotent.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.entries.remove(&self.key).is_some() {
            self.channel.enqueue(StreamValue::End(()));
        }
        self.shared.cv.notify_all();
    }
}

/// The process-wide default clock.
pub fn alarm_clock() -> &'static AlarmClock {
    static CLOCK: OnceLock<AlarmClock> = OnceLock::new();
    CLOCK.get_or_init(AlarmClock::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_after_deadline() {
        let clock = AlarmClock::new();
        let begin = Instant::now();
        let timer = clock.set_timer_after(Duration::from_millis(50));
        let f = timer.future();
        assert!(!f.is_complete() || begin.elapsed() >= Duration::from_millis(50));
        assert!(*f.get());
        assert!(begin.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn cancel_resolves_false_quickly() {
        let clock = AlarmClock::new();
        let timer = clock.set_timer_after(Duration::from_millis(500));
        let begin = Instant::now();
        timer.cancel();
        assert!(!*timer.future().get());
        assert!(begin.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn cancel_after_fire_keeps_true() {
        let clock = AlarmClock::new();
        let timer = clock.set_timer_after(Duration::from_millis(5));
        assert!(*timer.future().get());
        timer.cancel();
        assert!(*timer.future().get());
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let clock = AlarmClock::new();
        let late = clock.set_timer_after(Duration::from_millis(60));
        let early = clock.set_timer_after(Duration::from_millis(20));
        assert!(*early.future().get());
        assert!(!late.future().is_complete());
        assert!(*late.future().get());
    }

    #[test]
    fn periodic_ticks_then_end_on_cancel() {
        let clock = AlarmClock::new();
        let (timer, stream) =
            clock.set_periodic(Instant::now() + Duration::from_millis(10), Duration::from_millis(10));
        assert!(stream.dequeue().is_item());
        assert!(stream.dequeue().is_item());
        timer.cancel();
        // Buffered ticks may still be in flight; the End marker follows
        // them.
        loop {
            let value = stream.dequeue();
            if value.is_end() {
                break;
            }
            assert!(value.is_item());
        }
        assert!(stream.dequeue().is_end());
    }

    #[test]
    fn timed_action_runs_at_the_deadline() {
        let pool = Arc::new(crate::executor::ThreadPool::new(1));
        let clock = AlarmClock::new();
        let begin = Instant::now();
        let (_timer, f) =
            clock.set_timed_action(Instant::now() + Duration::from_millis(20), &pool, || 6 * 7);
        assert_eq!(*f.get(), 42);
        assert!(begin.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancelled_timed_action_fails() {
        let pool = Arc::new(crate::executor::ThreadPool::new(1));
        let clock = AlarmClock::new();
        let (timer, f) =
            clock.set_timed_action(Instant::now() + Duration::from_secs(60), &pool, || 0);
        timer.cancel();
        assert!(f.error().unwrap().is::<TimedActionCancelled>());
    }

    #[test]
    fn close_cancels_pending_timers() {
        let clock = AlarmClock::new();
        let timer = clock.set_timer_after(Duration::from_secs(60));
        clock.close();
        assert!(!*timer.future().get());
    }

    #[test]
    fn default_clock_is_usable() {
        let timer = alarm_clock().set_timer_after(Duration::from_millis(5));
        assert!(*timer.future().get());
    }
}
